use crate::{api::Parameters, Context};

use super::{param_list, Strategy, PARAM_USER_IDS};

/// Enabled for an explicit comma-separated list of user ids.
pub struct UserWithIdStrategy;

impl Strategy for UserWithIdStrategy {
    fn name(&self) -> &str {
        "userWithId"
    }

    fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool {
        let Some(user_id) = context.user_id.as_deref() else {
            return false;
        };
        param_list(parameters, PARAM_USER_IDS)
            .is_some_and(|ids| ids.iter().any(|id| id == user_id))
    }
}
