//! Client events and the thread that delivers them to a [`Listener`].
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{mpsc, Arc},
    thread::JoinHandle,
};

use crate::{
    metrics::{ClientData, MetricsData},
    Error, Listener, Result,
};

/// Something observable that happened inside the client.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Event {
    /// A failure the client recovered from by falling back to a safe default.
    Error(Error),
    /// A transient or informational problem (network hiccups, missing parents, unknown strategies).
    Warning(Error),
    /// The first successful fetch of features. Emitted exactly once.
    Ready,
    /// A feature was evaluated by the application.
    Count { feature: String, enabled: bool },
    /// A metrics batch was accepted by the server.
    Sent(MetricsData),
    /// The client registered with the server.
    Registered(ClientData),
}

/// Cheap handle used by background threads and evaluation code to publish events.
#[derive(Debug, Clone)]
pub(crate) struct EventSender(pub(crate) mpsc::Sender<Event>);

impl EventSender {
    pub fn send(&self, event: Event) {
        // Error means the dispatcher is gone (client closing), nobody is listening anymore.
        let _ = self.0.send(event);
    }

    pub fn error(&self, error: Error) {
        self.send(Event::Error(error));
    }

    pub fn warning(&self, warning: Error) {
        self.send(Event::Warning(warning));
    }
}

/// Delivers events to the listener on a dedicated thread, so that a slow listener never blocks
/// evaluation or polling.
pub(crate) struct EventDispatcher {
    join_handle: JoinHandle<()>,
}

impl EventDispatcher {
    pub fn start(listener: Arc<dyn Listener>) -> Result<(EventDispatcher, EventSender)> {
        let (sender, receiver) = mpsc::channel::<Event>();

        let join_handle = std::thread::Builder::new()
            .name("unleash-events".to_owned())
            .spawn(move || {
                // Runs until every sender has been dropped.
                for event in receiver {
                    let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
                    if result.is_err() {
                        log::error!(target: "unleash", "listener panicked while handling {event:?}");
                    }
                }
                log::debug!(target: "unleash", "event dispatcher stopped");
            })?;

        Ok((EventDispatcher { join_handle }, EventSender(sender)))
    }

    /// Wait for the dispatcher to drain pending events and exit.
    ///
    /// Returns once every [`EventSender`] has been dropped.
    pub fn shutdown(self) -> Result<()> {
        self.join_handle
            .join()
            .map_err(|_| Error::ThreadPanicked("event dispatcher"))
    }
}
