use crate::{api::Parameters, Context};

use super::Strategy;

/// Always enabled.
pub struct DefaultStrategy;

impl Strategy for DefaultStrategy {
    fn name(&self) -> &str {
        "default"
    }

    fn is_enabled(&self, _parameters: &Parameters, _context: &Context) -> bool {
        true
    }
}
