use std::net::IpAddr;

use ipnet::IpNet;

use crate::{api::Parameters, Context};

use super::{param_list, Strategy, PARAM_IPS};

/// Enabled when the context's remote address equals a listed IP or falls in a listed CIDR range.
pub struct RemoteAddressStrategy;

impl Strategy for RemoteAddressStrategy {
    fn name(&self) -> &str {
        "remoteAddress"
    }

    fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool {
        let Some(remote_address) = context
            .remote_address
            .as_deref()
            .and_then(|addr| addr.trim().parse::<IpAddr>().ok())
        else {
            return false;
        };

        let Some(entries) = param_list(parameters, PARAM_IPS) else {
            return false;
        };

        entries.iter().any(|entry| {
            if let Ok(ip) = entry.parse::<IpAddr>() {
                ip == remote_address
            } else if let Ok(net) = entry.parse::<IpNet>() {
                net.contains(&remote_address)
            } else {
                false
            }
        })
    }
}
