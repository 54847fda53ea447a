//! Subscriber contract for track lifecycle events

use crate::track::TrackRecord;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, trace, warn};

/// Error type receivers may return from a callback
pub type ReceiverError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that wants to be told about tracks coming and going.
///
/// The record is only borrowed for the duration of the call; clone it to
/// keep any of its data.
pub trait TrackingReceiver {
    fn on_track_new(&mut self, track: &TrackRecord) -> Result<(), ReceiverError>;
    fn on_track_update(&mut self, track: &TrackRecord) -> Result<(), ReceiverError>;
    fn on_track_lost(&mut self, track: &TrackRecord) -> Result<(), ReceiverError>;
}

/// Shared handle under which receivers are registered
pub type SharedReceiver = Arc<Mutex<dyn TrackingReceiver + Send>>;

/// Wrap a receiver into a [`SharedReceiver`] handle
pub fn shared<R: TrackingReceiver + Send + 'static>(receiver: R) -> Arc<Mutex<R>> {
    Arc::new(Mutex::new(receiver))
}

/// Lifecycle callback selected for one track in one dispatch pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    New,
    Update,
    Lost,
}

/// Ordered list of registered receivers
#[derive(Default)]
pub struct ReceiverList {
    receivers: Vec<SharedReceiver>,
}

impl ReceiverList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receiver; registering the same handle twice is a no-op
    pub fn register(&mut self, receiver: SharedReceiver) {
        if self.contains(&receiver) {
            return;
        }
        self.receivers.push(receiver);
    }

    /// Unregister a receiver; unknown handles are ignored
    pub fn unregister(&mut self, receiver: &SharedReceiver) {
        self.receivers.retain(|r| !Arc::ptr_eq(r, receiver));
    }

    pub fn contains(&self, receiver: &SharedReceiver) -> bool {
        self.receivers.iter().any(|r| Arc::ptr_eq(r, receiver))
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    pub fn clear(&mut self) {
        self.receivers.clear();
    }

    /// Deliver one event to every receiver in registration order.
    ///
    /// A receiver that fails or panics is logged and skipped; the remaining
    /// receivers still get the event. Returns the number of receivers that
    /// handled the event successfully.
    pub fn dispatch(&self, event: LifecycleEvent, track: &TrackRecord) -> usize {
        trace!(
            "Dispatching {:?} for track {} to {} receivers",
            event,
            track.track_id,
            self.receivers.len()
        );

        let mut delivered = 0;
        for receiver in &self.receivers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut guard = receiver.lock().unwrap_or_else(PoisonError::into_inner);
                match event {
                    LifecycleEvent::New => guard.on_track_new(track),
                    LifecycleEvent::Update => guard.on_track_update(track),
                    LifecycleEvent::Lost => guard.on_track_lost(track),
                }
            }));

            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        "Tracking receiver failed on {:?} for track {}: {}",
                        event, track.track_id, e
                    );
                }
                Err(_) => {
                    error!(
                        "Tracking receiver panicked on {:?} for track {}",
                        event, track.track_id
                    );
                }
            }
        }
        delivered
    }
}
