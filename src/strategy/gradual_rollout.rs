use rand::Rng;

use crate::{
    api::Parameters,
    normalize::{normalized_value, STRATEGY_SEED},
    Context,
};

use super::{in_rollout, Strategy, PARAM_GROUP_ID, PARAM_PERCENTAGE};

/// Enabled for a random `percentage` of evaluations.
pub struct GradualRolloutRandomStrategy;

impl Strategy for GradualRolloutRandomStrategy {
    fn name(&self) -> &str {
        "gradualRolloutRandom"
    }

    fn is_enabled(&self, parameters: &Parameters, _context: &Context) -> bool {
        let Some(percentage) = parameters.get_f64(PARAM_PERCENTAGE) else {
            return false;
        };
        percentage >= f64::from(rand::thread_rng().gen_range(1..=100u32))
    }
}

/// Enabled for a stable `percentage` of sessions.
pub struct GradualRolloutSessionIdStrategy;

impl Strategy for GradualRolloutSessionIdStrategy {
    fn name(&self) -> &str {
        "gradualRolloutSessionId"
    }

    fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool {
        sticky_rollout(parameters, context.session_id.as_deref())
    }
}

/// Enabled for a stable `percentage` of users.
pub struct GradualRolloutUserIdStrategy;

impl Strategy for GradualRolloutUserIdStrategy {
    fn name(&self) -> &str {
        "gradualRolloutUserId"
    }

    fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool {
        sticky_rollout(parameters, context.user_id.as_deref())
    }
}

fn sticky_rollout(parameters: &Parameters, identifier: Option<&str>) -> bool {
    let Some(identifier) = identifier.filter(|id| !id.is_empty()) else {
        return false;
    };
    let Some(percentage) = parameters.get_f64(PARAM_PERCENTAGE) else {
        return false;
    };
    let Some(group_id) = parameters.get_str(PARAM_GROUP_ID) else {
        return false;
    };
    in_rollout(
        percentage,
        normalized_value(identifier, &group_id, 100, STRATEGY_SEED),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        api::Parameters,
        normalize::{normalized_value, STRATEGY_SEED},
        strategy::Strategy,
        Context,
    };

    use super::{
        GradualRolloutRandomStrategy, GradualRolloutSessionIdStrategy, GradualRolloutUserIdStrategy,
    };

    fn params(percentage: impl Into<serde_json::Value>, group_id: &str) -> Parameters {
        serde_json::from_value(json!({"percentage": percentage.into(), "groupId": group_id})).unwrap()
    }

    fn ratio(count: usize, rounds: usize) -> f64 {
        100.0 * count as f64 / rounds as f64
    }

    #[test]
    fn names() {
        assert_eq!(GradualRolloutRandomStrategy.name(), "gradualRolloutRandom");
        assert_eq!(GradualRolloutSessionIdStrategy.name(), "gradualRolloutSessionId");
        assert_eq!(GradualRolloutUserIdStrategy.name(), "gradualRolloutUserId");
    }

    #[test]
    fn user_id_bounds() {
        let s = GradualRolloutUserIdStrategy;
        let user = Context::new().user_id("123");

        assert!(s.is_enabled(&params(100, "gr1"), &user));
        assert!(!s.is_enabled(&params(0, "gr1"), &user));

        // "123" in "gr1" normalizes to 73.
        assert!(s.is_enabled(&params(73, "gr1"), &user));
        assert!(!s.is_enabled(&params(72, "gr1"), &user));
        assert!(s.is_enabled(&params("73", "gr1"), &user));
    }

    #[test]
    fn session_id_bounds() {
        let s = GradualRolloutSessionIdStrategy;
        let session = Context::new().session_id("123123");
        let percentage = normalized_value("123123", "group1", 100, STRATEGY_SEED);

        assert!(s.is_enabled(&params(percentage, "group1"), &session));
        assert!(!s.is_enabled(&params(percentage - 1, "group1"), &session));
        assert!(s.is_enabled(&params(100, "group1"), &session));
        assert!(!s.is_enabled(&params(0, "group1"), &session));
    }

    #[test]
    fn missing_inputs_disable() {
        let s = GradualRolloutUserIdStrategy;
        assert!(!s.is_enabled(&params(100, "gr1"), &Context::new()));
        assert!(!s.is_enabled(&params(100, "gr1"), &Context::new().user_id("")));
        assert!(!s.is_enabled(&params("lots", "gr1"), &Context::new().user_id("1")));

        let no_group: Parameters = serde_json::from_value(json!({"percentage": 100})).unwrap();
        assert!(!s.is_enabled(&no_group, &Context::new().user_id("1")));

        assert!(!GradualRolloutSessionIdStrategy.is_enabled(&params(100, "gr1"), &Context::new()));
        assert!(!GradualRolloutRandomStrategy.is_enabled(&Parameters::default(), &Context::new()));
    }

    #[test]
    fn session_id_is_well_distributed() {
        let s = GradualRolloutSessionIdStrategy;
        let rounds = 200_000;
        for expected in [0u32, 10, 33, 50, 87, 100] {
            let p = params(expected, "gr1");
            let enabled = (0..rounds)
                .filter(|i| s.is_enabled(&p, &Context::new().session_id(i.to_string())))
                .count();
            let actual = ratio(enabled, rounds);
            assert!((actual - f64::from(expected)).abs() <= 1.0, "{expected}: {actual}");
        }
    }

    #[test]
    fn user_id_is_well_distributed() {
        let s = GradualRolloutUserIdStrategy;
        let rounds = 200_000;
        for expected in [0u32, 10, 33, 50, 87, 100] {
            let p = params(expected, "test");
            let enabled = (0..rounds)
                .filter(|i| s.is_enabled(&p, &Context::new().user_id(i.to_string())))
                .count();
            let actual = ratio(enabled, rounds);
            assert!((actual - f64::from(expected)).abs() <= 1.0, "{expected}: {actual}");
        }
    }

    #[test]
    fn random_is_well_distributed() {
        let s = GradualRolloutRandomStrategy;
        let rounds = 200_000;
        for expected in [0u32, 10, 33, 50, 87, 100] {
            let p = params(expected, "groupId");
            let enabled = (0..rounds)
                .filter(|_| s.is_enabled(&p, &Context::new()))
                .count();
            let actual = ratio(enabled, rounds);
            assert!((actual - f64::from(expected)).abs() <= 1.0, "{expected}: {actual}");
        }
    }
}
