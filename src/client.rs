use std::{sync::Arc, time::Duration};

use chrono::Utc;
use regex::Regex;

use crate::{
    api::Feature,
    eval::{Evaluation, Evaluator, WarnOnce},
    events::{EventDispatcher, EventSender},
    feature_store::Snapshot,
    http::{normalize_base_url, HttpClient, HttpClientConfig, SDK_VERSION},
    metrics::{ClientData, Metrics, MetricsThread},
    repository::{HttpRepository, HttpRepositoryConfig, Repository},
    strategy::StrategyRegistry,
    ClientConfig, Context, Error, Result, Variant,
};

/// A feature toggle client.
///
/// The client keeps a local copy of all features, refreshed in the background, so evaluation
/// never waits on the network. Create it with [`ClientConfig::to_client`] and share it between
/// threads (it is `Send + Sync`).
///
/// # Examples
/// ```no_run
/// # use unleash_client::{ClientConfig, Context, FeatureOptions};
/// let client = ClientConfig::new("my-app", "http://localhost:4242/api")
///     .custom_header("Authorization", "secret")
///     .to_client()?;
/// client.wait_for_ready()?;
///
/// let context = Context::new().user_id("user-1");
/// if client.is_enabled("new-checkout", &FeatureOptions::new().context(&context)) {
///     // ...
/// }
/// client.close()?;
/// # Ok::<(), unleash_client::Error>(())
/// ```
pub struct Client {
    repository: Box<dyn Repository>,
    strategies: StrategyRegistry,
    static_context: Context,
    warnings: WarnOnce,
    metrics: Option<Arc<Metrics>>,
    metrics_thread: Option<MetricsThread>,
    events: EventSender,
    dispatcher: EventDispatcher,
}

impl Client {
    /// Create a new `Client` using the specified configuration and start its background threads.
    pub fn new(config: ClientConfig) -> Result<Client> {
        if config.app_name.is_empty() {
            return Err(Error::MissingAppName);
        }
        let base_url = normalize_base_url(&config.url)?;
        let http = HttpClient::new(
            base_url,
            HttpClientConfig {
                app_name: &config.app_name,
                instance_id: &config.instance_id,
                custom_headers: &config.custom_headers,
                timeout: config.request_timeout,
            },
        )?;
        let strategies = StrategyRegistry::new(config.strategies);

        let (dispatcher, events) = EventDispatcher::start(config.listener)?;

        let repository: Box<dyn Repository> = match config.repository {
            Some(repository) => repository,
            None => Box::new(HttpRepository::start(HttpRepositoryConfig {
                http: http.clone(),
                storage: config.storage,
                backup_path: config.backup_path,
                app_name: config.app_name.clone(),
                refresh_interval: config.refresh_interval,
                project_name: config.project_name,
                environment: config.environment.clone(),
                events: events.clone(),
            })?),
        };

        let (metrics, metrics_thread) =
            if config.disable_metrics || config.metrics_interval.is_zero() {
                log::debug!(target: "unleash", "metrics are disabled");
                (None, None)
            } else {
                let metrics = Arc::new(Metrics::new(
                    http,
                    config.app_name.clone(),
                    config.instance_id.clone(),
                    events.clone(),
                ));
                let client_data = ClientData {
                    app_name: config.app_name.clone(),
                    instance_id: config.instance_id,
                    sdk_version: SDK_VERSION.to_owned(),
                    strategies: strategies.names(),
                    started: Utc::now(),
                    interval: millis(config.metrics_interval),
                };
                let thread =
                    MetricsThread::start(Arc::clone(&metrics), client_data, config.metrics_interval)?;
                (Some(metrics), Some(thread))
            };

        let mut static_context = Context::new().app_name(config.app_name);
        if let Some(environment) = config.environment {
            static_context = static_context.environment(environment);
        }

        Ok(Client {
            repository,
            strategies,
            static_context,
            warnings: WarnOnce::default(),
            metrics,
            metrics_thread,
            events,
            dispatcher,
        })
    }

    /// Check whether the feature is enabled. Unknown features resolve to the fallback, `false`
    /// by default.
    pub fn is_enabled(&self, name: &str, options: &FeatureOptions) -> bool {
        let context = self.context(options.context);
        let snapshot = self.repository.snapshot();
        let enabled = match snapshot.feature(name) {
            Some(feature) => self.evaluator(&snapshot).evaluate(feature, &context).enabled,
            None => options
                .fallback
                .as_ref()
                .map_or(false, |fallback| fallback.resolve(name, &context)),
        };

        log::trace!(target: "unleash", feature = name, enabled; "evaluated a feature");
        if let Some(metrics) = &self.metrics {
            metrics.count(name, enabled);
        }
        enabled
    }

    /// Resolve the variant of the feature. Unknown features resolve to the fallback, the
    /// disabled variant by default.
    pub fn get_variant(&self, name: &str, options: &VariantOptions) -> Variant {
        let context = self.context(options.context);
        let snapshot = self.repository.snapshot();
        let evaluation = match snapshot.feature(name) {
            Some(feature) => self.evaluator(&snapshot).evaluate(feature, &context),
            None => Evaluation {
                enabled: false,
                variant: options
                    .fallback
                    .as_ref()
                    .map_or_else(Variant::disabled, |fallback| fallback.resolve(name, &context)),
            },
        };

        self.count(name, &evaluation);
        evaluation.variant
    }

    /// Evaluate the feature and its variant at once. Unknown features resolve to the fallback,
    /// a disabled evaluation by default.
    pub fn evaluate(&self, name: &str, options: &EvaluationOptions) -> Evaluation {
        let context = self.context(options.context);
        let snapshot = self.repository.snapshot();
        let evaluation = match snapshot.feature(name) {
            Some(feature) => self.evaluator(&snapshot).evaluate(feature, &context),
            None => options
                .fallback
                .as_ref()
                .map_or_else(Evaluation::disabled, |fallback| fallback.resolve(name, &context)),
        };

        self.count(name, &evaluation);
        evaluation
    }

    /// The feature named `name`, as received from the server.
    pub fn feature(&self, name: &str) -> Option<Arc<Feature>> {
        self.repository.get_toggle(name)
    }

    /// All known features, sorted by name.
    pub fn list_features(&self) -> Vec<Arc<Feature>> {
        let mut features = self.repository.list_toggles();
        features.sort_by(|a, b| a.name.cmp(&b.name));
        features
    }

    /// Features whose name matches the regular expression `pattern`.
    pub fn features_by_pattern(&self, pattern: &str) -> Result<Vec<Arc<Feature>>> {
        let pattern = Regex::new(pattern)?;
        Ok(self
            .list_features()
            .into_iter()
            .filter(|feature| pattern.is_match(&feature.name))
            .collect())
    }

    /// Features having at least one strategy named `strategy`.
    pub fn features_by_strategy(&self, strategy: &str) -> Vec<Arc<Feature>> {
        self.list_features()
            .into_iter()
            .filter(|feature| feature.strategies.iter().any(|s| s.name == strategy))
            .collect()
    }

    /// Raw configuration from the repository. Not supported when polling the server.
    pub fn config(&self, key: &str) -> Result<String> {
        self.repository.get_config(key)
    }

    /// Block waiting for the first successful fetch of features.
    ///
    /// Returns an error if the server rejects the client configuration (for example a bad API
    /// token) or if the client is closed before features arrive.
    pub fn wait_for_ready(&self) -> Result<()> {
        self.repository.wait_for_ready()
    }

    /// Stop all background threads and block waiting for them to exit.
    ///
    /// Features are persisted to storage and pending events are delivered to the listener before
    /// this returns.
    pub fn close(self) -> Result<()> {
        let repository = self.repository.close();
        let metrics = match self.metrics_thread {
            Some(thread) => thread.shutdown(),
            None => Ok(()),
        };

        // The dispatcher exits once every sender is gone.
        drop(self.metrics);
        drop(self.events);
        let dispatcher = self.dispatcher.shutdown();

        log::debug!(target: "unleash", "client closed");
        repository.and(metrics).and(dispatcher)
    }

    fn context(&self, context: Option<&Context>) -> Context {
        match context {
            Some(context) => self.static_context.override_with(context),
            None => self.static_context.clone(),
        }
    }

    fn evaluator<'a>(&'a self, snapshot: &'a Snapshot) -> Evaluator<'a> {
        Evaluator {
            snapshot,
            strategies: &self.strategies,
            warnings: &self.warnings,
            events: &self.events,
        }
    }

    fn count(&self, name: &str, evaluation: &Evaluation) {
        log::trace!(target: "unleash",
                    feature = name,
                    enabled = evaluation.enabled,
                    variant:display = evaluation.variant.name;
                    "evaluated a feature");
        if let Some(metrics) = &self.metrics {
            metrics.count(name, evaluation.enabled);
            metrics.count_variant(name, &evaluation.variant.name);
        }
    }
}

fn millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

/// Value used when a feature is not known to the client.
enum Fallback<'a, T> {
    Value(T),
    Function(Box<dyn Fn(&str, &Context) -> T + 'a>),
}

impl<T: Clone> Fallback<'_, T> {
    fn resolve(&self, name: &str, context: &Context) -> T {
        match self {
            Fallback::Value(value) => value.clone(),
            Fallback::Function(f) => f(name, context),
        }
    }
}

/// Options of [`Client::is_enabled`].
///
/// ```
/// # use unleash_client::{Context, FeatureOptions};
/// let context = Context::new().user_id("user-1");
/// let options = FeatureOptions::new()
///     .context(&context)
///     .fallback_fn(|name, _context| name.starts_with("ops-"));
/// ```
#[derive(Default)]
pub struct FeatureOptions<'a> {
    context: Option<&'a Context>,
    fallback: Option<Fallback<'a, bool>>,
}

impl<'a> FeatureOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate against `context`, merged over the client's app name and environment.
    pub fn context(mut self, context: &'a Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = Some(Fallback::Value(fallback));
        self
    }

    /// Compute the fallback from the feature name and the evaluation context.
    pub fn fallback_fn(mut self, fallback: impl Fn(&str, &Context) -> bool + 'a) -> Self {
        self.fallback = Some(Fallback::Function(Box::new(fallback)));
        self
    }
}

/// Options of [`Client::get_variant`].
#[derive(Default)]
pub struct VariantOptions<'a> {
    context: Option<&'a Context>,
    fallback: Option<Fallback<'a, Variant>>,
}

impl<'a> VariantOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(mut self, context: &'a Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn fallback(mut self, fallback: Variant) -> Self {
        self.fallback = Some(Fallback::Value(fallback));
        self
    }

    pub fn fallback_fn(mut self, fallback: impl Fn(&str, &Context) -> Variant + 'a) -> Self {
        self.fallback = Some(Fallback::Function(Box::new(fallback)));
        self
    }
}

/// Options of [`Client::evaluate`].
#[derive(Default)]
pub struct EvaluationOptions<'a> {
    context: Option<&'a Context>,
    fallback: Option<Fallback<'a, Evaluation>>,
}

impl<'a> EvaluationOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(mut self, context: &'a Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn fallback(mut self, fallback: Evaluation) -> Self {
        self.fallback = Some(Fallback::Value(fallback));
        self
    }

    pub fn fallback_fn(mut self, fallback: impl Fn(&str, &Context) -> Evaluation + 'a) -> Self {
        self.fallback = Some(Fallback::Function(Box::new(fallback)));
        self
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use crate::{
        api::{FeatureResponse, Parameters, Payload},
        feature_store::Snapshot,
        ClientConfig, Context, Error, Evaluation, Event, Repository, Result, Strategy, Variant,
    };

    use super::{Client, EvaluationOptions, FeatureOptions, VariantOptions};

    struct StaticRepository {
        snapshot: Arc<Snapshot>,
        config: HashMap<String, String>,
    }

    impl Repository for StaticRepository {
        fn snapshot(&self) -> Arc<Snapshot> {
            Arc::clone(&self.snapshot)
        }

        fn get_config(&self, key: &str) -> Result<String> {
            self.config
                .get(key)
                .cloned()
                .ok_or(Error::Unsupported("missing key"))
        }
    }

    struct TenantStrategy;

    impl Strategy for TenantStrategy {
        fn name(&self) -> &str {
            "tenant"
        }

        fn is_enabled(&self, parameters: &Parameters, context: &Context) -> bool {
            let Some(tenants) = parameters.get_str("tenants") else {
                return false;
            };
            context
                .field("tenant")
                .map_or(false, |tenant| tenants.split(',').any(|t| t == tenant))
        }
    }

    fn config() -> ClientConfig {
        let response: FeatureResponse =
            serde_json::from_str(include_str!("../tests/data/features.json")).unwrap();
        ClientConfig::new("test-app", "http://localhost:4242/api")
            .disable_metrics(true)
            .repository(StaticRepository {
                snapshot: Arc::new(Snapshot::from(response)),
                config: HashMap::from([("region".to_owned(), "eu".to_owned())]),
            })
    }

    fn client() -> Client {
        config().to_client().unwrap()
    }

    #[test]
    fn missing_app_name() {
        let result = ClientConfig::new("", "http://localhost:4242/api")
            .disable_metrics(true)
            .to_client();
        assert!(matches!(result, Err(Error::MissingAppName)));
    }

    #[test]
    fn invalid_url() {
        let result = ClientConfig::new("app", "not a url")
            .disable_metrics(true)
            .to_client();
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn evaluates_features() {
        let client = client();
        let options = FeatureOptions::new();

        assert!(client.is_enabled("feature-enabled", &options));
        assert!(!client.is_enabled("feature-disabled", &options));
        assert!(client.is_enabled("feature-with-dependency", &options));
        assert!(!client.is_enabled("feature-with-missing-segment", &options));
        client.close().unwrap();
    }

    #[test]
    fn segments_use_context() {
        let client = client();
        let norway = Context::new().property("country", "no");
        let sweden = Context::new().property("country", "se");

        assert!(client.is_enabled(
            "feature-with-segment",
            &FeatureOptions::new().context(&norway)
        ));
        assert!(!client.is_enabled(
            "feature-with-segment",
            &FeatureOptions::new().context(&sweden)
        ));
    }

    #[test]
    fn static_environment_is_part_of_context() {
        let production = config().environment("production").to_client().unwrap();
        let development = client();
        let user = Context::new().user_id("2");

        let options = FeatureOptions::new().context(&user);
        assert!(production.is_enabled("feature-for-users", &options));
        assert!(!development.is_enabled("feature-for-users", &options));

        // Per-call values win over the static ones.
        let staging = Context::new().user_id("2").environment("staging");
        assert!(!production.is_enabled("feature-for-users", &FeatureOptions::new().context(&staging)));
    }

    #[test]
    fn unknown_feature_uses_fallback() {
        let client = client();

        assert!(!client.is_enabled("unknown", &FeatureOptions::new()));
        assert!(client.is_enabled("unknown", &FeatureOptions::new().fallback(true)));
        assert!(client.is_enabled(
            "ops-unknown",
            &FeatureOptions::new().fallback_fn(|name, context| {
                name.starts_with("ops-") && context.app_name.as_deref() == Some("test-app")
            })
        ));
        // Fallback only applies to unknown features.
        assert!(!client.is_enabled("feature-disabled", &FeatureOptions::new().fallback(true)));
    }

    #[test]
    fn variants() {
        let client = client();
        let user = Context::new().user_id("override-user");

        let variant = client.get_variant("feature-with-variants", &VariantOptions::new().context(&user));
        assert_eq!(variant.name, "green");
        assert!(variant.enabled);
        assert!(variant.feature_enabled);
        assert_eq!(variant.payload.unwrap().payload_type, "json");

        let variant = client.get_variant("feature-enabled", &VariantOptions::new());
        assert_eq!(variant.name, "disabled");
        assert!(!variant.enabled);
        assert!(variant.feature_enabled);

        let variant = client.get_variant("feature-disabled", &VariantOptions::new());
        assert_eq!(variant, Variant::disabled());
    }

    #[test]
    fn unknown_variant_uses_fallback() {
        let client = client();
        let fallback = Variant {
            name: "fallback".to_owned(),
            payload: Some(Payload {
                payload_type: "string".to_owned(),
                value: "safe".to_owned(),
            }),
            enabled: true,
            feature_enabled: false,
        };

        assert_eq!(
            client.get_variant("unknown", &VariantOptions::new()),
            Variant::disabled()
        );
        assert_eq!(
            client.get_variant("unknown", &VariantOptions::new().fallback(fallback.clone())),
            fallback
        );
        assert_eq!(
            client
                .get_variant(
                    "unknown",
                    &VariantOptions::new().fallback_fn(|name, _| Variant {
                        name: format!("{name}-fallback"),
                        ..Variant::disabled()
                    })
                )
                .name,
            "unknown-fallback"
        );
    }

    #[test]
    fn evaluate_returns_state_and_variant() {
        let client = client();

        let user = Context::new().user_id("override-user");
        let evaluation = client.evaluate(
            "feature-with-variants",
            &EvaluationOptions::new().context(&user),
        );
        assert!(evaluation.enabled);
        assert_eq!(evaluation.variant.name, "green");

        let evaluation = client.evaluate("unknown", &EvaluationOptions::new());
        assert!(!evaluation.enabled);
        assert_eq!(evaluation.variant, Variant::disabled());
    }

    #[test]
    fn unknown_evaluation_uses_fallback() {
        let client = client();
        let fallback = Evaluation {
            enabled: true,
            variant: Variant {
                name: "fallback".to_owned(),
                payload: None,
                enabled: true,
                feature_enabled: true,
            },
        };

        assert_eq!(
            client.evaluate("unknown", &EvaluationOptions::new().fallback(fallback.clone())),
            fallback
        );
        let evaluation = client.evaluate(
            "unknown",
            &EvaluationOptions::new().fallback_fn(|name, context| Evaluation {
                enabled: context.app_name.as_deref() == Some("test-app"),
                variant: Variant {
                    name: format!("{name}-fallback"),
                    ..Variant::disabled()
                },
            }),
        );
        assert!(evaluation.enabled);
        assert_eq!(evaluation.variant.name, "unknown-fallback");

        // Known features never use the fallback.
        assert_eq!(
            client.evaluate("feature-disabled", &EvaluationOptions::new().fallback(fallback)),
            Evaluation::disabled()
        );
    }

    #[test]
    fn custom_strategy() {
        let client = config().strategy(TenantStrategy).to_client().unwrap();
        let acme = Context::new().property("tenant", "acme");
        let other = Context::new().property("tenant", "other");

        assert!(client.is_enabled(
            "feature-with-custom-strategy",
            &FeatureOptions::new().context(&acme)
        ));
        assert!(!client.is_enabled(
            "feature-with-custom-strategy",
            &FeatureOptions::new().context(&other)
        ));
    }

    #[test]
    fn queries_features() {
        let client = client();

        assert!(client.feature("feature-enabled").unwrap().enabled);
        assert!(client.feature("unknown").is_none());

        let names: Vec<String> = client
            .list_features()
            .iter()
            .map(|f| f.name.clone())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"feature-with-variants".to_owned()));

        let by_pattern = client.features_by_pattern("^feature-with-(segment|dependency)$").unwrap();
        assert_eq!(by_pattern.len(), 2);
        assert!(matches!(
            client.features_by_pattern("("),
            Err(Error::InvalidPattern(_))
        ));

        let by_strategy = client.features_by_strategy("flexibleRollout");
        assert_eq!(by_strategy.len(), 1);
        assert_eq!(by_strategy[0].name, "feature-with-variants");

        assert_eq!(client.config("region").unwrap(), "eu");
    }

    #[test]
    fn diagnostics_reach_listener_before_close_returns() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let client = config()
            .listener({
                let events = Arc::clone(&events);
                move |event: &Event| events.lock().unwrap().push(format!("{event:?}"))
            })
            .to_client()
            .unwrap();

        assert!(!client.is_enabled("feature-with-missing-segment", &FeatureOptions::new()));
        assert!(!client.is_enabled("feature-with-custom-strategy", &FeatureOptions::new()));
        client.close().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].starts_with("Error(SegmentNotFound"));
        assert!(events[1].starts_with("Warning(UnknownStrategy"));
    }

    #[test]
    fn wait_for_ready_with_static_repository() {
        let client = client();
        client.wait_for_ready().unwrap();
    }
}
