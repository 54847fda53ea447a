//! Thread-safe queue between the TUIO receive thread and the tick loop

use super::client::{TuioBlob, TuioClient, TuioCursor, TuioListener, TuioObject};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuioEventKind {
    Add,
    Update,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TuioEntity {
    Object(TuioObject),
    Cursor(TuioCursor),
    Blob(TuioBlob),
}

/// One queued TUIO notification
#[derive(Debug, Clone, PartialEq)]
pub struct TuioEvent {
    pub kind: TuioEventKind,
    pub entity: TuioEntity,
}

/// FIFO of TUIO events shared between producer and consumer.
///
/// Cloning yields another handle onto the same queue.
#[derive(Debug, Clone, Default)]
pub struct TuioEventQueue {
    events: Arc<Mutex<VecDeque<TuioEvent>>>,
}

impl TuioEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: TuioEventKind, entity: TuioEntity) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(TuioEvent { kind, entity });
    }

    /// Take every pending event in arrival order
    pub fn drain(&self) -> Vec<TuioEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TuioListener for TuioEventQueue {
    fn add_tuio_object(&self, object: &TuioObject) {
        self.push(TuioEventKind::Add, TuioEntity::Object(object.clone()));
    }

    fn update_tuio_object(&self, object: &TuioObject) {
        self.push(TuioEventKind::Update, TuioEntity::Object(object.clone()));
    }

    fn remove_tuio_object(&self, object: &TuioObject) {
        self.push(TuioEventKind::Remove, TuioEntity::Object(object.clone()));
    }

    fn add_tuio_cursor(&self, cursor: &TuioCursor) {
        self.push(TuioEventKind::Add, TuioEntity::Cursor(cursor.clone()));
    }

    fn update_tuio_cursor(&self, cursor: &TuioCursor) {
        self.push(TuioEventKind::Update, TuioEntity::Cursor(cursor.clone()));
    }

    fn remove_tuio_cursor(&self, cursor: &TuioCursor) {
        self.push(TuioEventKind::Remove, TuioEntity::Cursor(cursor.clone()));
    }

    fn add_tuio_blob(&self, blob: &TuioBlob) {
        self.push(TuioEventKind::Add, TuioEntity::Blob(blob.clone()));
    }

    fn update_tuio_blob(&self, blob: &TuioBlob) {
        self.push(TuioEventKind::Update, TuioEntity::Blob(blob.clone()));
    }

    fn remove_tuio_blob(&self, blob: &TuioBlob) {
        self.push(TuioEventKind::Remove, TuioEntity::Blob(blob.clone()));
    }
}

/// Owns a TUIO client and collects its notifications into a queue.
///
/// If the port cannot be bound the failure is logged and the listener stays
/// inert: it reports not connected and never produces events.
pub struct TuioEventListener {
    port: u16,
    queue: TuioEventQueue,
    client: Option<TuioClient>,
}

impl TuioEventListener {
    /// Start listening for TUIO data on `port`
    pub fn new(port: u16) -> Self {
        let queue = TuioEventQueue::new();
        let client = match TuioClient::connect(port, Arc::new(queue.clone())) {
            Ok(client) => {
                info!("Connection established: listening at port {} for TUIO data", port);
                Some(client)
            }
            Err(e) => {
                error!("{}. Check if the port isn't already in use.", e);
                None
            }
        };
        Self { port, queue, client }
    }

    /// A listener without a client; events can only be pushed through
    /// [`TuioEventListener::queue`]
    pub fn detached() -> Self {
        Self {
            port: 0,
            queue: TuioEventQueue::new(),
            client: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Actual bound address, if connected
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.client.as_ref().map(TuioClient::local_addr)
    }

    pub fn queue(&self) -> &TuioEventQueue {
        &self.queue
    }

    pub fn is_connected(&self) -> bool {
        match &self.client {
            Some(client) => client.is_connected(),
            None => false,
        }
    }

    /// Disconnect the client and free the port
    pub fn shutdown(&mut self) {
        match self.client.take() {
            Some(mut client) => {
                client.disconnect();
                info!("Disconnected TUIO client: port {} is now free", self.port);
            }
            None => warn!("No TUIO client to shut down"),
        }
    }
}
