//! TUIO as a tracking source
//!
//! Cursors become tracks; objects become echoes of the track whose ID equals
//! the object's symbol ID. Blobs are received but not used. Events are
//! gathered during the tick and every touched track is published once at the
//! end of [`TuioReceiveHandler::update`].

use super::client::{TuioCursor, TuioObject};
use super::listener::TuioEventListener;
use super::processor::{TuioEventHandler, TuioEventProcessor};
use crate::receiver::SharedReceiver;
use crate::registry::TrackingRegistry;
use crate::settings::{TrackingSettings, TuioSettings};
use crate::track::{TrackRecord, TrackState};
use nalgebra::Vector2;
use tracing::{debug, info};

/// Below this velocity magnitude the orientation is reported as zero
const MIN_NORMALIZE_MAGNITUDE: f32 = 1.0e-5;

/// Receives TUIO data and turns it into lifecycle events
pub struct TuioReceiveHandler {
    registry: TrackingRegistry,
    settings: TuioSettings,
    listener: Option<TuioEventListener>,
    processor: Option<TuioEventProcessor>,
    touched: Vec<i32>,
}

impl TuioReceiveHandler {
    pub fn new(settings: TuioSettings) -> Self {
        Self {
            registry: TrackingRegistry::new(),
            settings,
            listener: None,
            processor: None,
            touched: Vec::new(),
        }
    }

    /// Use an existing listener instead of opening the configured port
    pub fn with_listener(settings: TuioSettings, listener: TuioEventListener) -> Self {
        let mut handler = Self::new(settings);
        handler.attach(listener);
        handler
    }

    /// Start listening on the configured port.
    ///
    /// A bind failure leaves the handler inert; check
    /// [`TuioReceiveHandler::is_connected`].
    pub fn start(&mut self) {
        if self.is_connected() {
            return;
        }
        let listener = TuioEventListener::new(self.settings.udp_port);
        self.attach(listener);
    }

    fn attach(&mut self, listener: TuioEventListener) {
        self.processor = Some(TuioEventProcessor::new(&listener));
        self.listener = Some(listener);
    }

    pub fn is_connected(&self) -> bool {
        self.listener.as_ref().is_some_and(TuioEventListener::is_connected)
    }

    pub fn listener(&self) -> Option<&TuioEventListener> {
        self.listener.as_ref()
    }

    pub fn settings(&self) -> &TuioSettings {
        &self.settings
    }

    pub fn tracking_settings(&self) -> &TrackingSettings {
        &self.settings.tracking
    }

    pub fn registry(&self) -> &TrackingRegistry {
        &self.registry
    }

    pub fn register_receiver(&mut self, receiver: SharedReceiver) {
        self.registry.register_receiver(receiver);
    }

    pub fn unregister_receiver(&mut self, receiver: &SharedReceiver) {
        self.registry.unregister_receiver(receiver);
    }

    /// Drain pending TUIO events and publish every touched track once.
    ///
    /// `delta_time` is the tick duration in seconds, used to extrapolate the
    /// expected position. Returns the number of lifecycle events dispatched.
    pub fn update(&mut self, delta_time: f32) -> usize {
        let mut dispatched = 0;
        if let Some(processor) = &self.processor {
            let mut applier = TrackApplier {
                registry: &mut self.registry,
                touched: &mut self.touched,
                tracking: &self.settings.tracking,
                delta_time,
                dispatched: 0,
            };
            processor.process(&mut applier);
            dispatched = applier.dispatched;
        }

        for track_id in self.touched.drain(..) {
            if let Some(event) = self.registry.commit(track_id) {
                debug!("Track {} -> {:?}", track_id, event);
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Stop listening and report all live tracks as lost
    pub fn shutdown(&mut self) {
        self.processor = None;
        if let Some(mut listener) = self.listener.take() {
            if listener.is_connected() {
                listener.shutdown();
            }
        }
        self.touched.clear();
        self.registry.shutdown();
        info!("TUIO receiver stopped");
    }
}

/// Applies one tick's TUIO events to the track store
struct TrackApplier<'a> {
    registry: &'a mut TrackingRegistry,
    touched: &'a mut Vec<i32>,
    tracking: &'a TrackingSettings,
    delta_time: f32,
    /// Removals published early because their ID was reused
    dispatched: usize,
}

impl TrackApplier<'_> {
    fn touch(&mut self, track_id: i32) {
        if !self.touched.contains(&track_id) {
            self.touched.push(track_id);
        }
    }

    fn apply_cursor(&mut self, cursor: &TuioCursor, state: TrackState) {
        // A removed cursor ID handed to a new cursor in the same tick
        let id_reused = state != TrackState::Removed
            && self
                .registry
                .get(cursor.cursor_id)
                .is_some_and(TrackRecord::is_removed);
        if id_reused {
            if let Some(event) = self.registry.commit(cursor.cursor_id) {
                debug!("Track {} -> {:?} before reuse", cursor.cursor_id, event);
                self.dispatched += 1;
            }
        }

        let rel = cursor.position;
        let velocity = Vector2::new(cursor.x_speed, cursor.y_speed);

        let (track, _) = self.registry.entry(cursor.cursor_id);
        track.state = state;
        track.current_pos = self.tracking.screen_position_from_relative(rel.x, rel.y);
        track.expect_pos = rel + velocity * self.delta_time;
        track.orientation = velocity
            .try_normalize(MIN_NORMALIZE_MAGNITUDE)
            .unwrap_or_else(Vector2::zeros);
        // Sum of the components, not the magnitude
        track.speed = cursor.x_speed + cursor.y_speed;
        track.rel_pos = rel;

        self.touch(cursor.cursor_id);
    }
}

impl TuioEventHandler for TrackApplier<'_> {
    fn cursor_added(&mut self, cursor: &TuioCursor) {
        self.apply_cursor(cursor, TrackState::Added);
    }

    fn cursor_updated(&mut self, cursor: &TuioCursor) {
        self.apply_cursor(cursor, TrackState::Updated);
    }

    fn cursor_removed(&mut self, cursor: &TuioCursor) {
        self.apply_cursor(cursor, TrackState::Removed);
    }

    fn object_added(&mut self, object: &TuioObject) {
        let (track, _) = self.registry.entry(object.symbol_id);
        track.echoes.push(object.position);
    }

    // The source removes all echoes of a track together
    fn object_removed(&mut self, object: &TuioObject) {
        let Some(track) = self.registry.get_mut(object.symbol_id) else {
            return;
        };
        track.echoes.clear();

        // Echo-only records that no cursor claimed are not kept around
        if !self.touched.contains(&object.symbol_id) {
            self.registry.discard_pending(object.symbol_id);
        }
    }
}
