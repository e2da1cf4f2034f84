use std::{env, io::Read, path::PathBuf, sync::Arc, time::Duration};

use rand::Rng;

use crate::{
    storage::{BootstrapStorage, DefaultStorage, Storage},
    strategy::resolve_hostname,
    Client, Listener, LogListener, Repository, Result, Strategy,
};

/// Configuration for [`Client`].
///
/// ```
/// # use std::time::Duration;
/// # use unleash_client::ClientConfig;
/// let config = ClientConfig::new("my-app", "https://unleash.example.com/api")
///     .instance_id("instance-1")
///     .refresh_interval(Duration::from_secs(30))
///     .custom_header("Authorization", "secret-token");
/// ```
pub struct ClientConfig {
    pub(crate) app_name: String,
    pub(crate) url: String,
    pub(crate) instance_id: String,
    pub(crate) refresh_interval: Duration,
    pub(crate) metrics_interval: Duration,
    pub(crate) disable_metrics: bool,
    pub(crate) backup_path: PathBuf,
    pub(crate) strategies: Vec<Arc<dyn Strategy>>,
    pub(crate) listener: Arc<dyn Listener>,
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) repository: Option<Box<dyn Repository>>,
    pub(crate) custom_headers: Vec<(String, String)>,
    pub(crate) project_name: Option<String>,
    pub(crate) environment: Option<String>,
    pub(crate) request_timeout: Duration,
}

impl ClientConfig {
    /// Default interval between feature fetches.
    pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

    /// Default interval between metrics reports.
    pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

    /// Default deadline of a single HTTP request.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a configuration for application `app_name` talking to the server API at `url`.
    pub fn new(app_name: impl Into<String>, url: impl Into<String>) -> ClientConfig {
        ClientConfig {
            app_name: app_name.into(),
            url: url.into(),
            instance_id: generate_instance_id(),
            refresh_interval: ClientConfig::DEFAULT_REFRESH_INTERVAL,
            metrics_interval: ClientConfig::DEFAULT_METRICS_INTERVAL,
            disable_metrics: false,
            backup_path: env::temp_dir(),
            strategies: Vec::new(),
            listener: Arc::new(LogListener),
            storage: Box::new(DefaultStorage::new()),
            repository: None,
            custom_headers: Vec::new(),
            project_name: None,
            environment: None,
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Identifier of this client instance. Defaults to `{user}-{hostname}`.
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Interval between feature fetches. A zero interval is ignored.
    pub fn refresh_interval(mut self, refresh_interval: Duration) -> Self {
        if refresh_interval.is_zero() {
            log::warn!(target: "unleash", "ignoring zero refresh interval");
            return self;
        }
        self.refresh_interval = refresh_interval;
        self
    }

    /// Interval between metrics reports. A zero interval disables metrics.
    pub fn metrics_interval(mut self, metrics_interval: Duration) -> Self {
        self.metrics_interval = metrics_interval;
        self
    }

    pub fn disable_metrics(mut self, disable_metrics: bool) -> Self {
        self.disable_metrics = disable_metrics;
        self
    }

    /// Directory the last fetched features are persisted to. Defaults to the OS temp directory.
    pub fn backup_path(mut self, backup_path: impl Into<PathBuf>) -> Self {
        self.backup_path = backup_path.into();
        self
    }

    /// Register a custom strategy. It replaces a built-in strategy with the same name.
    pub fn strategy(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Set the listener receiving client events. Defaults to [`LogListener`].
    ///
    /// ```
    /// # use unleash_client::{ClientConfig, Event};
    /// let config = ClientConfig::new("my-app", "http://localhost:4242/api").listener(|event: &Event| {
    ///     println!("{:?}", event);
    /// });
    /// ```
    pub fn listener(mut self, listener: impl Listener + 'static) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Box::new(storage);
        self
    }

    /// Start from the features in `reader` when nothing has been persisted yet. The reader must
    /// yield a `client/features` response body.
    pub fn bootstrap(self, reader: impl Read + Send + 'static) -> Self {
        self.storage(BootstrapStorage::new(reader))
    }

    /// Read features from `repository` instead of polling the server. Storage and refresh
    /// settings are ignored; metrics are still reported to the server.
    pub fn repository(mut self, repository: impl Repository + 'static) -> Self {
        self.repository = Some(Box::new(repository));
        self
    }

    /// Add a header sent with every request, typically `Authorization`.
    pub fn custom_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Only fetch features of this project.
    pub fn project_name(mut self, project_name: impl Into<String>) -> Self {
        self.project_name = Some(project_name.into());
        self
    }

    /// Fetch features for this environment. It is also part of every evaluation context.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Create a new [`Client`] using this configuration and start its background threads.
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}

/// `{user}-{hostname}`, or a random prefix when the user is unknown.
fn generate_instance_id() -> String {
    let prefix = match env::var("USER").or_else(|_| env::var("USERNAME")) {
        Ok(user) if !user.is_empty() => user,
        _ => format!(
            "generated-{}-{}",
            rand::thread_rng().gen_range(0..1_000_000),
            std::process::id()
        ),
    };
    format!("{prefix}-{}", resolve_hostname())
}
