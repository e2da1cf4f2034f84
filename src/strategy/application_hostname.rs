use std::env;

use crate::{api::Parameters, Context};

use super::{param_list, Strategy, PARAM_HOST_NAMES};

/// Enabled on hosts whose name is listed (case-insensitive).
pub struct ApplicationHostnameStrategy {
    hostname: String,
}

impl ApplicationHostnameStrategy {
    /// Resolve the host name from `HOSTNAME`, falling back to the operating system.
    pub fn new() -> ApplicationHostnameStrategy {
        ApplicationHostnameStrategy::with_hostname(resolve_hostname())
    }

    pub fn with_hostname(hostname: impl AsRef<str>) -> ApplicationHostnameStrategy {
        ApplicationHostnameStrategy {
            hostname: hostname.as_ref().to_lowercase(),
        }
    }
}

impl Default for ApplicationHostnameStrategy {
    fn default() -> Self {
        ApplicationHostnameStrategy::new()
    }
}

impl Strategy for ApplicationHostnameStrategy {
    fn name(&self) -> &str {
        "applicationHostname"
    }

    fn is_enabled(&self, parameters: &Parameters, _context: &Context) -> bool {
        param_list(parameters, PARAM_HOST_NAMES)
            .is_some_and(|hosts| hosts.iter().any(|h| h.to_lowercase() == self.hostname))
    }
}

pub(crate) fn resolve_hostname() -> String {
    match env::var("HOSTNAME") {
        Ok(hostname) if !hostname.is_empty() => hostname,
        _ => hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "undefined".to_owned()),
    }
}
