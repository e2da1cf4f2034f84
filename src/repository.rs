//! Sources of features: the polling HTTP repository and the trait for custom backends.
use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender},
        Arc, Condvar, Mutex, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

use rand::{thread_rng, Rng};
use reqwest::{
    header::{ETAG, IF_NONE_MATCH},
    StatusCode, Url,
};

use crate::{
    api::{Constraint, Feature, FeatureResponse},
    events::{Event, EventSender},
    feature_store::{FeatureStore, Snapshot},
    http::{check_status, HttpClient},
    storage::Storage,
    Error, Result,
};

const FEATURES_ENDPOINT: &str = "client/features";

/// Upper bound of the backoff counter. Each unit skips one refresh tick.
const MAX_BACKOFF: u32 = 10;

/// Provides the features the client evaluates.
///
/// Only [`Repository::snapshot`] and [`Repository::get_config`] are required. Evaluation always
/// works on a single snapshot, so implementations should swap whole snapshots rather than mutate
/// one in place.
pub trait Repository: Send + Sync {
    /// The current set of features and segments.
    fn snapshot(&self) -> Arc<Snapshot>;

    fn get_toggle(&self, name: &str) -> Option<Arc<Feature>> {
        self.snapshot().feature(name).cloned()
    }

    fn get_segment(&self, id: i64) -> Option<Vec<Constraint>> {
        self.snapshot().segment(id).map(<[Constraint]>::to_vec)
    }

    fn list_toggles(&self) -> Vec<Arc<Feature>> {
        self.snapshot().features().cloned().collect()
    }

    /// Raw configuration stored under `key`, for backends that carry more than features.
    fn get_config(&self, key: &str) -> Result<String>;

    /// Block until features are available.
    fn wait_for_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Stop background work and release resources. Called once when the client closes.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct HttpRepositoryConfig {
    pub http: HttpClient,
    pub storage: Box<dyn Storage>,
    pub backup_path: PathBuf,
    pub app_name: String,
    pub refresh_interval: Duration,
    pub project_name: Option<String>,
    pub environment: Option<String>,
    pub events: EventSender,
}

/// Holds `None` until the first fetch completes. Holds `Some(Ok(()))` once features have been
/// fetched, and `Some(Err(..))` if the server rejected the client configuration or the
/// repository was closed first.
type ReadyState = Arc<(Mutex<Option<Result<()>>>, Condvar)>;

/// Repository polling `client/features` on a background thread.
pub struct HttpRepository {
    store: Arc<FeatureStore>,
    ready: ReadyState,
    closed: Arc<AtomicBool>,
    stop_sender: SyncSender<()>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl HttpRepository {
    /// Load persisted features into the store, then start the poller thread.
    pub(crate) fn start(config: HttpRepositoryConfig) -> Result<HttpRepository> {
        let (stop_sender, stop_receiver) = sync_channel::<()>(1);
        let store = Arc::new(FeatureStore::default());
        let ready: ReadyState = Arc::new((Mutex::new(None), Condvar::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let refresh_interval = config.refresh_interval;

        let poller = Poller::new(config, Arc::clone(&store), Arc::clone(&ready), Arc::clone(&closed))?;

        let join_handle = std::thread::Builder::new()
            .name("unleash-poller".to_owned())
            .spawn(move || poller.run(stop_receiver, refresh_interval))?;

        Ok(HttpRepository {
            store,
            ready,
            closed,
            stop_sender,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }
}

impl Repository for HttpRepository {
    fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    fn get_toggle(&self, name: &str) -> Option<Arc<Feature>> {
        self.store.get(name)
    }

    fn get_config(&self, _key: &str) -> Result<String> {
        Err(Error::Unsupported("configuration parameters"))
    }

    /// Block waiting for the first successful fetch.
    fn wait_for_ready(&self) -> Result<()> {
        let (lock, condvar) = &*self.ready;
        let mut result = lock.lock().map_err(|_| Error::ThreadPanicked("poller"))?;
        loop {
            match &*result {
                Some(result) => return result.clone(),
                None => {
                    result = condvar
                        .wait(result)
                        .map_err(|_| Error::ThreadPanicked("poller"))?;
                }
            }
        }
    }

    /// Stop the poller thread and block waiting for it to persist features and exit.
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Error means the thread is already gone or a stop is pending.
        let _ = self.stop_sender.try_send(());

        let join_handle = self
            .join_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match join_handle {
            Some(join_handle) => join_handle
                .join()
                .map_err(|_| Error::ThreadPanicked("poller")),
            None => Ok(()),
        }
    }
}

/// Error counter driving how many refresh ticks are skipped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Backoff {
    errors: u32,
    skips: u32,
}

impl Backoff {
    /// Consume one pending skip. Returns `false` when the tick should fetch.
    fn skip(&mut self) -> bool {
        if self.skips > 0 {
            self.skips -= 1;
            true
        } else {
            false
        }
    }

    fn record(&mut self, result: &Result<()>) {
        match result {
            Ok(()) => self.errors = self.errors.saturating_sub(1),
            Err(err) if err.is_configuration_error() => self.errors = MAX_BACKOFF,
            Err(err) if err.is_transient() => self.errors = (self.errors + 1).min(MAX_BACKOFF),
            Err(_) => return,
        }
        self.skips = self.errors;
    }
}

/// State owned by the poller thread.
struct Poller {
    http: HttpClient,
    url: Url,
    storage: Box<dyn Storage>,
    store: Arc<FeatureStore>,
    etag: Option<String>,
    backoff: Backoff,
    is_ready: bool,
    ready: ReadyState,
    closed: Arc<AtomicBool>,
    events: EventSender,
}

impl Poller {
    fn new(
        config: HttpRepositoryConfig,
        store: Arc<FeatureStore>,
        ready: ReadyState,
        closed: Arc<AtomicBool>,
    ) -> Result<Poller> {
        let mut url = config.http.endpoint(FEATURES_ENDPOINT)?;
        if config.project_name.is_some() || config.environment.is_some() {
            let mut query = url.query_pairs_mut();
            if let Some(project) = &config.project_name {
                query.append_pair("project", project);
            }
            if let Some(environment) = &config.environment {
                query.append_pair("environment", environment);
            }
        }

        let mut storage = config.storage;
        storage.init(&config.backup_path, &config.app_name);
        match storage.load() {
            Ok(()) => {}
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!(target: "unleash", "no persisted features found");
            }
            Err(err) => config.events.warning(err),
        }
        let features: HashMap<String, Feature> = storage
            .list()
            .into_iter()
            .map(|feature| (feature.name.clone(), feature.clone()))
            .collect();
        log::debug!(target: "unleash", features = features.len(); "loaded features from storage");
        store.swap(Snapshot::new(features, HashMap::new()));

        Ok(Poller {
            http: config.http,
            url,
            storage,
            store,
            etag: None,
            backoff: Backoff::default(),
            is_ready: false,
            ready,
            closed,
            events: config.events,
        })
    }

    fn run(mut self, stop_receiver: Receiver<()>, interval: Duration) {
        self.poll();
        loop {
            match stop_receiver.recv_timeout(jitter(interval, interval / 10)) {
                Err(RecvTimeoutError::Timeout) => {
                    if self.backoff.skip() {
                        log::debug!(target: "unleash", skips = self.backoff.skips; "backing off, skipping fetch");
                    } else {
                        self.poll();
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::debug!(target: "unleash", "poller thread received stop command");
                    self.shutdown();
                    return;
                }
            }
        }
    }

    /// Fetch once, update the backoff and report the outcome.
    fn poll(&mut self) {
        let result = self.fetch();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.backoff.record(&result);

        match result {
            Ok(()) => {
                if !self.is_ready {
                    self.is_ready = true;
                    self.set_ready(Ok(()));
                    self.events.send(Event::Ready);
                }
            }
            Err(err @ Error::Network(_)) => self.events.warning(err),
            Err(err) => {
                if !self.is_ready && err.is_configuration_error() {
                    self.set_ready(Err(err.clone()));
                }
                self.events.error(err);
            }
        }
    }

    fn fetch(&mut self) -> Result<()> {
        log::debug!(target: "unleash", url:display = self.url; "fetching features");

        let mut request = self.http.get(self.url.clone());
        if let Some(etag) = &self.etag {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }
        let response = request.send()?;

        if response.status() == StatusCode::NOT_MODIFIED {
            log::debug!(target: "unleash", "features not modified");
            return Ok(());
        }
        let response = check_status("GET", &self.url, response)?;

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes()?;
        let features: FeatureResponse = serde_json::from_slice(&body)?;

        let feature_map = features.feature_map();
        log::debug!(target: "unleash", features = feature_map.len(), segments = features.segments.len(); "successfully fetched features");
        self.store
            .swap(Snapshot::new(feature_map.clone(), features.segment_map()));
        self.etag = etag;

        if let Err(err) = self.storage.reset(feature_map, true) {
            self.events.error(err);
        }
        Ok(())
    }

    fn set_ready(&self, value: Result<()>) {
        let (lock, condvar) = &*self.ready;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        condvar.notify_all();
    }

    fn shutdown(&mut self) {
        if let Err(err) = self.storage.persist() {
            self.events.error(err);
        }
        if !self.is_ready {
            self.set_ready(Err(Error::Closed));
        }
    }
}

/// Apply a random jitter to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    interval + thread_rng().gen_range(Duration::ZERO..jitter)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::AtomicBool, mpsc, Arc, Condvar, Mutex},
        time::Duration,
    };

    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::{
        events::{Event, EventSender},
        feature_store::FeatureStore,
        http::test_client,
        storage::DefaultStorage,
        Error,
    };

    use super::{
        Backoff, HttpRepository, HttpRepositoryConfig, Poller, Repository, MAX_BACKOFF,
    };

    const FEATURES: &str = include_str!("../tests/data/features.json");

    struct Fixture {
        server: MockServer,
        runtime: tokio::runtime::Runtime,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Fixture {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let server = runtime.block_on(MockServer::start());
            Fixture {
                runtime,
                server,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn mount(&self, mock: Mock) {
            self.runtime.block_on(mock.mount(&self.server));
        }

        fn config(&self, events: EventSender) -> HttpRepositoryConfig {
            HttpRepositoryConfig {
                http: test_client(&self.server.uri()),
                storage: Box::new(DefaultStorage::new()),
                backup_path: self.dir.path().to_owned(),
                app_name: "test-app".to_owned(),
                refresh_interval: Duration::from_secs(60),
                project_name: None,
                environment: None,
                events,
            }
        }

        fn poller(&self) -> (Poller, mpsc::Receiver<Event>) {
            let (sender, receiver) = mpsc::channel();
            let poller = Poller::new(
                self.config(EventSender(sender)),
                Arc::new(FeatureStore::default()),
                Arc::new((Mutex::new(None), Condvar::new())),
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
            (poller, receiver)
        }

        fn backup_file(&self) -> std::path::PathBuf {
            self.dir.path().join("unleash-repo-schema-v1-test-app.json")
        }
    }

    fn features_response() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(FEATURES, "application/json")
    }

    fn ready_count(events: &mpsc::Receiver<Event>) -> usize {
        events
            .try_iter()
            .filter(|e| matches!(e, Event::Ready))
            .count()
    }

    #[test]
    fn fetch_replaces_snapshot_and_persists() {
        let fixture = Fixture::new();
        fixture.mount(
            Mock::given(method("GET"))
                .and(path("/client/features"))
                .and(header("unleash-appname", "test-app"))
                .and(header("unleash-instanceid", "test-instance"))
                .respond_with(features_response()),
        );
        let (mut poller, events) = fixture.poller();

        poller.poll();

        assert!(poller.store.get("feature-enabled").is_some());
        assert!(!poller.store.snapshot().segments.is_empty());
        assert!(fixture.backup_file().exists());
        assert_eq!(ready_count(&events), 1);
        assert_eq!(poller.backoff, Backoff::default());
    }

    #[test]
    fn not_modified_keeps_snapshot_and_etag() {
        let fixture = Fixture::new();
        fixture.mount(
            Mock::given(method("GET"))
                .and(path("/client/features"))
                .and(header("if-none-match", "\"v1\""))
                .respond_with(ResponseTemplate::new(304))
                .expect(2),
        );
        fixture.mount(
            Mock::given(method("GET"))
                .and(path("/client/features"))
                .respond_with(features_response().insert_header("ETag", "\"v1\""))
                .expect(1),
        );
        let (mut poller, events) = fixture.poller();

        poller.poll();
        let snapshot = poller.store.snapshot();
        assert_eq!(poller.etag.as_deref(), Some("\"v1\""));

        poller.poll();
        poller.poll();

        assert!(Arc::ptr_eq(&snapshot, &poller.store.snapshot()));
        assert_eq!(poller.etag.as_deref(), Some("\"v1\""));
        assert_eq!(ready_count(&events), 1);
        fixture.runtime.block_on(fixture.server.verify());
    }

    #[test]
    fn transient_errors_grow_backoff() {
        let fixture = Fixture::new();
        fixture.mount(
            Mock::given(method("GET"))
                .and(path("/client/features"))
                .respond_with(ResponseTemplate::new(429))
                .up_to_n_times(4),
        );
        fixture.mount(
            Mock::given(method("GET"))
                .and(path("/client/features"))
                .respond_with(features_response()),
        );
        let (mut poller, events) = fixture.poller();

        for _ in 0..4 {
            poller.poll();
        }
        assert_eq!(poller.backoff, Backoff { errors: 4, skips: 4 });
        assert_eq!(ready_count(&events), 0);

        poller.poll();
        assert_eq!(poller.backoff, Backoff { errors: 3, skips: 3 });
    }

    #[test]
    fn configuration_errors_pin_backoff_to_max() {
        for status in [401u16, 403, 404] {
            let fixture = Fixture::new();
            fixture.mount(
                Mock::given(method("GET"))
                    .and(path("/client/features"))
                    .respond_with(ResponseTemplate::new(status)),
            );
            let (mut poller, events) = fixture.poller();

            poller.poll();

            assert_eq!(
                poller.backoff,
                Backoff {
                    errors: MAX_BACKOFF,
                    skips: MAX_BACKOFF
                }
            );
            assert!(events.try_iter().any(|e| matches!(e, Event::Error(_))));
            let ready = poller.ready.0.lock().unwrap();
            assert!(matches!(&*ready, Some(Err(err)) if err.is_configuration_error()));
        }
    }

    #[test]
    fn other_statuses_leave_backoff_unchanged() {
        let fixture = Fixture::new();
        fixture.mount(
            Mock::given(method("GET"))
                .and(path("/client/features"))
                .respond_with(ResponseTemplate::new(400)),
        );
        let (mut poller, events) = fixture.poller();

        poller.poll();

        assert_eq!(poller.backoff, Backoff::default());
        assert!(events.try_iter().any(|e| matches!(
            e,
            Event::Error(Error::HttpStatus { .. })
        )));
    }

    #[test]
    fn malformed_body_is_an_error() {
        let fixture = Fixture::new();
        fixture.mount(
            Mock::given(method("GET"))
                .and(path("/client/features"))
                .respond_with(ResponseTemplate::new(200).set_body_string("{not json")),
        );
        let (mut poller, events) = fixture.poller();

        poller.poll();

        assert!(events
            .try_iter()
            .any(|e| matches!(e, Event::Error(Error::Json(_)))));
        assert!(poller.store.snapshot().features.is_empty());
    }

    #[test]
    fn transport_errors_are_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let (sender, events) = mpsc::channel();
        let mut poller = Poller::new(
            HttpRepositoryConfig {
                http: test_client("http://127.0.0.1:1"),
                storage: Box::new(DefaultStorage::new()),
                backup_path: dir.path().to_owned(),
                app_name: "test-app".to_owned(),
                refresh_interval: Duration::from_secs(60),
                project_name: None,
                environment: None,
                events: EventSender(sender),
            },
            Arc::new(FeatureStore::default()),
            Arc::new((Mutex::new(None), Condvar::new())),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        poller.poll();

        assert!(events
            .try_iter()
            .any(|e| matches!(e, Event::Warning(Error::Network(_)))));
    }

    #[test]
    fn sends_project_and_environment() {
        let fixture = Fixture::new();
        fixture.mount(
            Mock::given(method("GET"))
                .and(path("/client/features"))
                .and(query_param("project", "checkout"))
                .and(query_param("environment", "production"))
                .respond_with(features_response())
                .expect(1),
        );
        let (sender, _events) = mpsc::channel();
        let mut config = fixture.config(EventSender(sender));
        config.project_name = Some("checkout".to_owned());
        config.environment = Some("production".to_owned());
        let mut poller = Poller::new(
            config,
            Arc::new(FeatureStore::default()),
            Arc::new((Mutex::new(None), Condvar::new())),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        poller.poll();

        assert!(poller.store.get("feature-enabled").is_some());
        fixture.runtime.block_on(fixture.server.verify());
    }

    #[test]
    fn initial_snapshot_comes_from_storage() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.backup_file(),
            r#"{"persisted": {"name": "persisted", "enabled": true}}"#,
        )
        .unwrap();

        let (poller, _events) = fixture.poller();

        assert!(poller.store.get("persisted").unwrap().enabled);
    }

    #[test]
    fn backoff_skips_ticks() {
        let mut backoff = Backoff::default();
        assert!(!backoff.skip());

        backoff.record(&Err(Error::HttpStatus {
            method: "GET",
            url: "http://localhost/".to_owned(),
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        }));
        backoff.record(&Err(Error::HttpStatus {
            method: "GET",
            url: "http://localhost/".to_owned(),
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
        }));
        assert_eq!(backoff, Backoff { errors: 2, skips: 2 });

        assert!(backoff.skip());
        assert!(backoff.skip());
        assert!(!backoff.skip());
        assert_eq!(backoff.errors, 2);

        backoff.record(&Ok(()));
        backoff.record(&Ok(()));
        backoff.record(&Ok(()));
        assert_eq!(backoff, Backoff::default());
    }

    #[test]
    fn backoff_is_capped() {
        let mut backoff = Backoff::default();
        let err = Error::HttpStatus {
            method: "GET",
            url: "http://localhost/".to_owned(),
            status: reqwest::StatusCode::BAD_GATEWAY,
        };
        for _ in 0..20 {
            backoff.record(&Err(err.clone()));
        }
        assert_eq!(backoff.errors, MAX_BACKOFF);
    }

    #[test]
    fn repository_becomes_ready_and_persists_on_close() {
        let fixture = Fixture::new();
        fixture.mount(
            Mock::given(method("GET"))
                .and(path("/client/features"))
                .respond_with(features_response()),
        );
        let (sender, events) = mpsc::channel();

        let repository = HttpRepository::start(fixture.config(EventSender(sender))).unwrap();
        repository.wait_for_ready().unwrap();

        assert!(repository.get_toggle("feature-enabled").is_some());
        assert!(!repository.list_toggles().is_empty());
        assert!(matches!(
            repository.get_config("anything"),
            Err(Error::Unsupported(_))
        ));

        std::fs::remove_file(fixture.backup_file()).unwrap();
        repository.close().unwrap();
        assert!(fixture.backup_file().exists());
        assert_eq!(ready_count(&events), 1);
    }

    #[test]
    fn close_before_ready_unblocks_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let (sender, _events) = mpsc::channel();
        let repository = HttpRepository::start(HttpRepositoryConfig {
            http: test_client("http://127.0.0.1:1"),
            storage: Box::new(DefaultStorage::new()),
            backup_path: dir.path().to_owned(),
            app_name: "test-app".to_owned(),
            refresh_interval: Duration::from_secs(60),
            project_name: None,
            environment: None,
            events: EventSender(sender),
        })
        .unwrap();

        repository.close().unwrap();

        assert!(matches!(repository.wait_for_ready(), Err(Error::Closed)));
    }
}
