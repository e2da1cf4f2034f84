use crate::{
    events::Event,
    metrics::{ClientData, MetricsData},
    Error,
};

/// Receives client events.
///
/// All methods have no-op defaults, so implementors only override what they care about. Methods
/// are called from a dedicated thread, one event at a time.
///
/// Any `Fn(&Event)` closure is a listener:
///
/// ```
/// # use unleash_client::{Event, Listener};
/// fn assert_listener(_: impl Listener) {}
/// assert_listener(|event: &Event| {
///     if let Event::Error(err) = event {
///         eprintln!("unleash: {err}");
///     }
/// });
/// ```
pub trait Listener: Send + Sync {
    /// Route `event` to the matching `on_*` method.
    fn on_event(&self, event: &Event) {
        match event {
            Event::Error(err) => self.on_error(err),
            Event::Warning(warning) => self.on_warning(warning),
            Event::Ready => self.on_ready(),
            Event::Count { feature, enabled } => self.on_count(feature, *enabled),
            Event::Sent(payload) => self.on_sent(payload),
            Event::Registered(payload) => self.on_registered(payload),
        }
    }

    fn on_error(&self, _error: &Error) {}

    fn on_warning(&self, _warning: &Error) {}

    /// Called once, after the first successful fetch.
    fn on_ready(&self) {}

    fn on_count(&self, _feature: &str, _enabled: bool) {}

    fn on_sent(&self, _payload: &MetricsData) {}

    fn on_registered(&self, _payload: &ClientData) {}
}

/// Ignores all events.
pub struct NoopListener;

impl Listener for NoopListener {}

/// Default listener: forwards events to the `log` facade.
pub struct LogListener;

impl Listener for LogListener {
    fn on_error(&self, error: &Error) {
        log::error!(target: "unleash", "{error}");
    }

    fn on_warning(&self, warning: &Error) {
        log::warn!(target: "unleash", "{warning}");
    }

    fn on_ready(&self) {
        log::info!(target: "unleash", "client is ready");
    }

    fn on_count(&self, feature: &str, enabled: bool) {
        log::trace!(target: "unleash", feature, enabled; "feature evaluated");
    }

    fn on_sent(&self, payload: &MetricsData) {
        log::debug!(target: "unleash", toggles = payload.bucket.toggles.len(); "metrics sent");
    }

    fn on_registered(&self, payload: &ClientData) {
        log::debug!(target: "unleash", app_name = payload.app_name, instance_id = payload.instance_id; "client registered");
    }
}

impl<T: Fn(&Event) + Send + Sync> Listener for T {
    fn on_event(&self, event: &Event) {
        self(event);
    }
}
