//! Activation strategies.
//!
//! A strategy decides whether a feature is active for a context, given the parameters configured
//! on the server. Strategies are looked up by name in a [`StrategyRegistry`] built once when the
//! client is created.
use std::{collections::HashMap, fmt, sync::Arc};

use rand::Rng;

use crate::{api::Parameters, Context};

mod application_hostname;
mod default;
mod flexible_rollout;
mod gradual_rollout;
mod remote_address;
mod user_with_id;

pub(crate) use application_hostname::resolve_hostname;
pub use application_hostname::ApplicationHostnameStrategy;
pub use default::DefaultStrategy;
pub use flexible_rollout::FlexibleRolloutStrategy;
pub use gradual_rollout::{
    GradualRolloutRandomStrategy, GradualRolloutSessionIdStrategy, GradualRolloutUserIdStrategy,
};
pub use remote_address::RemoteAddressStrategy;
pub use user_with_id::UserWithIdStrategy;

pub const PARAM_HOST_NAMES: &str = "hostNames";
pub const PARAM_PERCENTAGE: &str = "percentage";
pub const PARAM_GROUP_ID: &str = "groupId";
pub const PARAM_IPS: &str = "IPs";
pub const PARAM_USER_IDS: &str = "userIds";
pub const PARAM_ROLLOUT: &str = "rollout";
pub const PARAM_STICKINESS: &str = "stickiness";

/// An activation strategy.
///
/// Implementations must be side-effect free and must return `false` (rather than fail) when
/// parameters are missing or malformed.
///
/// # Examples
///
/// ```
/// # use unleash_client::{Context, Parameters, Strategy};
/// struct TenantStrategy;
///
/// impl Strategy for TenantStrategy {
///     fn name(&self) -> &str {
///         "tenant"
///     }
///
///     fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool {
///         parameters.get_str("tenant").as_deref() == context.field("tenant")
///     }
/// }
/// ```
pub trait Strategy: Send + Sync {
    /// Name used by the server to reference this strategy.
    fn name(&self) -> &str;

    fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool;
}

/// Name-keyed table of strategies.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Registry containing built-in strategies, then `custom` ones. A custom strategy replaces a
    /// built-in one with the same name.
    pub fn new(custom: impl IntoIterator<Item = Arc<dyn Strategy>>) -> StrategyRegistry {
        let builtin: [Arc<dyn Strategy>; 8] = [
            Arc::new(DefaultStrategy),
            Arc::new(UserWithIdStrategy),
            Arc::new(RemoteAddressStrategy),
            Arc::new(ApplicationHostnameStrategy::new()),
            Arc::new(GradualRolloutRandomStrategy),
            Arc::new(GradualRolloutSessionIdStrategy),
            Arc::new(GradualRolloutUserIdStrategy),
            Arc::new(FlexibleRolloutStrategy),
        ];

        let strategies = builtin
            .into_iter()
            .chain(custom)
            .map(|strategy| (strategy.name().to_owned(), strategy))
            .collect();

        StrategyRegistry { strategies }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Strategy> {
        self.strategies.get(name).map(|s| s.as_ref())
    }

    /// Sorted names of all registered strategies.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        StrategyRegistry::new([])
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

/// Comma-separated list parameter, entries trimmed.
fn param_list(parameters: &Parameters, name: &str) -> Option<Vec<String>> {
    let value = parameters.get_str(name)?;
    Some(value.split(',').map(|s| s.trim().to_owned()).collect())
}

/// Whether a normalized bucket falls within a rollout `percentage`.
fn in_rollout(percentage: f64, normalized: u32) -> bool {
    percentage > 0.0 && f64::from(normalized) <= percentage
}

/// A random identifier used when no sticky identifier is available.
pub(crate) fn random_id() -> String {
    rand::thread_rng().gen_range(1..=100_000u32).to_string()
}
