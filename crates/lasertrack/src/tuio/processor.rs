//! Per-tick drain of the TUIO event queue into typed notifications

use super::client::{TuioBlob, TuioCursor, TuioObject};
use super::listener::{TuioEntity, TuioEventKind, TuioEventListener, TuioEventQueue};
use tracing::trace;

/// Typed TUIO notifications; implement only what you care about
#[allow(unused_variables)]
pub trait TuioEventHandler {
    fn cursor_added(&mut self, cursor: &TuioCursor) {}
    fn cursor_updated(&mut self, cursor: &TuioCursor) {}
    fn cursor_removed(&mut self, cursor: &TuioCursor) {}
    fn object_added(&mut self, object: &TuioObject) {}
    fn object_updated(&mut self, object: &TuioObject) {}
    fn object_removed(&mut self, object: &TuioObject) {}
    fn blob_added(&mut self, blob: &TuioBlob) {}
    fn blob_updated(&mut self, blob: &TuioBlob) {}
    fn blob_removed(&mut self, blob: &TuioBlob) {}
}

/// Picks up the events queued by a [`TuioEventListener`]
pub struct TuioEventProcessor {
    queue: TuioEventQueue,
}

impl TuioEventProcessor {
    pub fn new(listener: &TuioEventListener) -> Self {
        Self {
            queue: listener.queue().clone(),
        }
    }

    /// Drain the queue once and notify `handler` about each event in order.
    ///
    /// The queue lock is released before the first notification. Returns the
    /// number of events processed.
    pub fn process<H: TuioEventHandler>(&self, handler: &mut H) -> usize {
        let events = self.queue.drain();
        if !events.is_empty() {
            trace!("Processing {} TUIO events", events.len());
        }

        let count = events.len();
        for event in events {
            match (event.kind, &event.entity) {
                (TuioEventKind::Add, TuioEntity::Cursor(c)) => handler.cursor_added(c),
                (TuioEventKind::Update, TuioEntity::Cursor(c)) => handler.cursor_updated(c),
                (TuioEventKind::Remove, TuioEntity::Cursor(c)) => handler.cursor_removed(c),
                (TuioEventKind::Add, TuioEntity::Object(o)) => handler.object_added(o),
                (TuioEventKind::Update, TuioEntity::Object(o)) => handler.object_updated(o),
                (TuioEventKind::Remove, TuioEntity::Object(o)) => handler.object_removed(o),
                (TuioEventKind::Add, TuioEntity::Blob(b)) => handler.blob_added(b),
                (TuioEventKind::Update, TuioEntity::Blob(b)) => handler.blob_updated(b),
                (TuioEventKind::Remove, TuioEntity::Blob(b)) => handler.blob_removed(b),
            }
        }
        count
    }
}
