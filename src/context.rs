use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The context in which a feature toggle is evaluated.
///
/// Well-known fields are typed; anything else goes into `properties`. A context is an immutable
/// value built per evaluation call.
///
/// ```
/// # use unleash_client::Context;
/// let context = Context::new()
///     .user_id("user-1")
///     .property("country", "norway");
/// assert_eq!(context.field("userId"), Some("user-1"));
/// assert_eq!(context.field("country"), Some("norway"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Explicit evaluation time as an RFC3339 string. Date constraints use "now" when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Context {
        Context::default()
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Context {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Context {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn remote_address(mut self, remote_address: impl Into<String>) -> Context {
        self.remote_address = Some(remote_address.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Context {
        self.environment = Some(environment.into());
        self
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Context {
        self.app_name = Some(app_name.into());
        self
    }

    /// Pin the evaluation time used by date constraints.
    pub fn current_time(mut self, current_time: DateTime<Utc>) -> Context {
        self.current_time = Some(current_time.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Context {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Resolve a context field by name. Typed fields take precedence over properties.
    pub fn field(&self, name: &str) -> Option<&str> {
        let typed = match name {
            "userId" => &self.user_id,
            "sessionId" => &self.session_id,
            "remoteAddress" => &self.remote_address,
            "environment" => &self.environment,
            "appName" => &self.app_name,
            "currentTime" => &self.current_time,
            _ => return self.properties.get(name).map(String::as_str),
        };
        typed.as_deref()
    }

    /// Return a new context where every field set in `other` replaces the value from `self`.
    /// Properties are merged, `other` winning on conflicts.
    pub fn override_with(&self, other: &Context) -> Context {
        fn pick(base: &Option<String>, other: &Option<String>) -> Option<String> {
            other.clone().or_else(|| base.clone())
        }

        let mut properties = self.properties.clone();
        properties.extend(
            other
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        Context {
            user_id: pick(&self.user_id, &other.user_id),
            session_id: pick(&self.session_id, &other.session_id),
            remote_address: pick(&self.remote_address, &other.remote_address),
            environment: pick(&self.environment, &other.environment),
            app_name: pick(&self.app_name, &other.app_name),
            current_time: pick(&self.current_time, &other.current_time),
            properties,
        }
    }
}
