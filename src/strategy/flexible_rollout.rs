use crate::{
    api::Parameters,
    normalize::{normalized_value, STRATEGY_SEED},
    Context,
};

use super::{in_rollout, random_id, Strategy, PARAM_GROUP_ID, PARAM_ROLLOUT, PARAM_STICKINESS};

/// Percentage rollout with configurable stickiness.
///
/// `stickiness` is one of `default` (user id, then session id, then random), `random`, or the
/// name of any context field.
pub struct FlexibleRolloutStrategy;

impl Strategy for FlexibleRolloutStrategy {
    fn name(&self) -> &str {
        "flexibleRollout"
    }

    fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool {
        let Some(rollout) = parameters.get_f64(PARAM_ROLLOUT) else {
            return false;
        };
        let group_id = parameters.get_str(PARAM_GROUP_ID).unwrap_or_default();
        let stickiness = parameters
            .get_str(PARAM_STICKINESS)
            .unwrap_or_else(|| "default".to_owned());

        let Some(identifier) = resolve_stickiness(&stickiness, context) else {
            return false;
        };

        in_rollout(
            rollout,
            normalized_value(&identifier, &group_id, 100, STRATEGY_SEED),
        )
    }
}

/// Identifier used to bucket `context` under `stickiness`. `None` when the configured field is
/// absent or empty.
pub(crate) fn resolve_stickiness(stickiness: &str, context: &Context) -> Option<String> {
    let identifier = match stickiness {
        "default" => context
            .user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or(context.session_id.as_deref().filter(|id| !id.is_empty()))
            .map(str::to_owned)
            .unwrap_or_else(random_id),
        "random" => random_id(),
        field => context.field(field)?.to_owned(),
    };
    Some(identifier).filter(|id| !id.is_empty())
}
