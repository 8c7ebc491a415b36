//! Observation fan-in
//!
//! Every watcher holds a clone of [`ObservationSender`]; the decision engine owns
//! the single [`ObservationReceiver`]. Both queues are unbounded so a burst of
//! log lines never stalls a producer behind a busy engine.

use tokio::sync::mpsc;

use crate::domain::{ObservedError, ObservedEvent};

/// Create the event/error channel pair
pub fn observation_channel() -> (ObservationSender, ObservationReceiver) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    (
        ObservationSender { event_tx, error_tx },
        ObservationReceiver { event_rx, error_rx },
    )
}

/// Producer side, shared by all watchers
#[derive(Debug, Clone)]
pub struct ObservationSender {
    event_tx: mpsc::UnboundedSender<ObservedEvent>,
    error_tx: mpsc::UnboundedSender<ObservedError>,
}

impl ObservationSender {
    /// Returns false once the engine has gone away
    pub fn event(&self, event: ObservedEvent) -> bool {
        self.event_tx.send(event).is_ok()
    }

    /// Returns false once the engine has gone away
    pub fn error(&self, error: ObservedError) -> bool {
        self.error_tx.send(error).is_ok()
    }

    pub fn report(&self, source: &str, detail: impl Into<String>) -> bool {
        self.error(ObservedError::new(source, detail))
    }

    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed() && self.error_tx.is_closed()
    }
}

/// Consumer side, owned by the decision engine
#[derive(Debug)]
pub struct ObservationReceiver {
    pub(crate) event_rx: mpsc::UnboundedReceiver<ObservedEvent>,
    pub(crate) error_rx: mpsc::UnboundedReceiver<ObservedError>,
}

/// One message taken off either queue
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Event(ObservedEvent),
    Error(ObservedError),
}

impl ObservationReceiver {
    /// Wait for the next message. Errors are preferred when both queues are ready.
    /// Returns `None` once every sender is dropped and both queues are empty.
    pub async fn recv(&mut self) -> Option<Observation> {
        tokio::select! {
            biased;
            Some(err) = self.error_rx.recv() => Some(Observation::Error(err)),
            Some(event) = self.event_rx.recv() => Some(Observation::Event(event)),
            else => None,
        }
    }

    /// Take a message that is already queued, without waiting
    pub fn try_recv(&mut self) -> Option<Observation> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Some(Observation::Error(err));
        }
        self.event_rx.try_recv().ok().map(Observation::Event)
    }
}
