//! Usage metrics: counters batched into time windows and reported to the server.
use std::{
    collections::HashMap,
    mem,
    sync::{
        mpsc::{sync_channel, RecvTimeoutError, SyncSender},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    events::{Event, EventSender},
    http::HttpClient,
    Error, Result,
};

const REGISTER_ENDPOINT: &str = "client/register";
const METRICS_ENDPOINT: &str = "client/metrics";

/// Evaluation counters of a single feature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleCount {
    pub yes: u32,
    pub no: u32,
    #[serde(default)]
    pub variants: HashMap<String, u32>,
}

/// Counters collected over `[start, stop]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub toggles: HashMap<String, ToggleCount>,
}

impl Bucket {
    fn new() -> Bucket {
        let now = Utc::now();
        Bucket {
            start: now,
            stop: now,
            toggles: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.toggles.is_empty()
    }

    /// Add all counters of `other` to this bucket.
    fn merge(&mut self, other: Bucket) {
        for (name, counts) in other.toggles {
            let toggle = self.toggles.entry(name).or_default();
            toggle.yes += counts.yes;
            toggle.no += counts.no;
            for (variant, count) in counts.variants {
                *toggle.variants.entry(variant).or_default() += count;
            }
        }
    }
}

/// Body of `POST client/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsData {
    pub app_name: String,
    pub instance_id: String,
    pub bucket: Bucket,
}

/// Body of `POST client/register`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientData {
    pub app_name: String,
    pub instance_id: String,
    /// SDK name and version, `name:version`.
    pub sdk_version: String,
    /// Names of the strategies this client can evaluate.
    pub strategies: Vec<String>,
    pub started: DateTime<Utc>,
    /// Metrics reporting interval in milliseconds.
    pub interval: u64,
}

/// Aggregates evaluation counters between flushes.
pub(crate) struct Metrics {
    bucket: Mutex<Bucket>,
    http: HttpClient,
    app_name: String,
    instance_id: String,
    events: EventSender,
}

impl Metrics {
    pub fn new(
        http: HttpClient,
        app_name: String,
        instance_id: String,
        events: EventSender,
    ) -> Metrics {
        Metrics {
            bucket: Mutex::new(Bucket::new()),
            http,
            app_name,
            instance_id,
            events,
        }
    }

    fn bucket(&self) -> MutexGuard<'_, Bucket> {
        // Counters stay usable even if a thread panicked mid-update.
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self, feature: &str, enabled: bool) {
        {
            let mut bucket = self.bucket();
            let toggle = bucket.toggles.entry(feature.to_owned()).or_default();
            if enabled {
                toggle.yes += 1;
            } else {
                toggle.no += 1;
            }
        }
        self.events.send(Event::Count {
            feature: feature.to_owned(),
            enabled,
        });
    }

    pub fn count_variant(&self, feature: &str, variant: &str) {
        let mut bucket = self.bucket();
        let toggle = bucket.toggles.entry(feature.to_owned()).or_default();
        *toggle.variants.entry(variant.to_owned()).or_default() += 1;
    }

    /// Swap out the current bucket and report it. On failure the counters are merged back into
    /// the current bucket, which inherits the failed bucket's start time.
    pub fn send_metrics(&self) {
        let mut bucket = mem::replace(&mut *self.bucket(), Bucket::new());
        if bucket.is_empty() {
            return;
        }
        bucket.stop = Utc::now();

        let payload = MetricsData {
            app_name: self.app_name.clone(),
            instance_id: self.instance_id.clone(),
            bucket,
        };

        log::debug!(target: "unleash", toggles = payload.bucket.toggles.len(); "sending metrics");
        match self.http.post_json(METRICS_ENDPOINT, &payload) {
            Ok(()) => self.events.send(Event::Sent(payload)),
            Err(err) => {
                let failed = payload.bucket;
                {
                    let mut current = self.bucket();
                    current.start = failed.start;
                    current.merge(failed);
                }
                self.report(err);
            }
        }
    }

    pub fn register(&self, client_data: ClientData) {
        log::debug!(target: "unleash", "registering client");
        match self.http.post_json(REGISTER_ENDPOINT, &client_data) {
            Ok(()) => self.events.send(Event::Registered(client_data)),
            Err(err) => self.report(err),
        }
    }

    fn report(&self, err: Error) {
        if matches!(err, Error::HttpStatus { .. }) {
            self.events.warning(err);
        } else {
            self.events.error(err);
        }
    }
}

/// The thread registering the client and flushing metrics every interval.
pub(crate) struct MetricsThread {
    join_handle: JoinHandle<()>,
    stop_sender: SyncSender<()>,
}

impl MetricsThread {
    pub fn start(
        metrics: Arc<Metrics>,
        client_data: ClientData,
        interval: Duration,
    ) -> Result<MetricsThread> {
        let (stop_sender, stop_receiver) = sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("unleash-metrics".to_owned())
            .spawn(move || {
                metrics.register(client_data);
                loop {
                    match stop_receiver.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => metrics.send_metrics(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            log::debug!(target: "unleash", "metrics thread received stop command");
                            return;
                        }
                    }
                }
            })?;

        Ok(MetricsThread {
            join_handle,
            stop_sender,
        })
    }

    pub fn stop(&self) {
        // Error means the thread is already gone (or the buffer is full and a stop is pending).
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the thread and block waiting for it to exit.
    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::ThreadPanicked("metrics"))
    }
}
