//! Per-track entities kept in sync with the lifecycle callbacks
//!
//! [`TrackingEntityManager`] is the consumer side of a tracking source: it
//! keeps one [`TrackingEntity`] per live track and asks an [`EntitySpawner`]
//! to create, move and destroy whatever represents the track on screen.

use crate::receiver::{ReceiverError, TrackingReceiver};
use crate::settings::TrackingSettings;
use crate::track::TrackRecord;
use nalgebra::Vector2;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Creates and destroys the visual representation of a track
pub trait EntitySpawner {
    type Visual;

    fn spawn(&mut self, track_id: i32, screen_pos: Vector2<f32>) -> Self::Visual;
    fn reposition(&mut self, visual: &mut Self::Visual, screen_pos: Vector2<f32>);
    fn despawn(&mut self, visual: Self::Visual);
}

/// Latest data of one tracked entity
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingEntity<V> {
    pub track_id: i32,
    /// Current position, grid offset removed
    pub absolute_position: Vector2<f32>,
    /// Expected position in the next frame, grid offset removed
    pub next_expected_absolute_position: Vector2<f32>,
    /// Position in relative [0, 1] coordinates
    pub relative_position: Vector2<f32>,
    /// Heading, valid above [`crate::track::MIN_ORIENTATION_SPEED`]
    pub orientation: Vector2<f32>,
    pub speed: f32,
    pub echoes: Vec<Vector2<f32>>,
    /// Calibrated screen position the visual was last placed at
    pub screen_position: Vector2<f32>,
    pub visual: V,
}

/// Maps track IDs to entities
pub struct TrackingEntityManager<S: EntitySpawner> {
    spawner: S,
    tracking: TrackingSettings,
    entities: HashMap<i32, TrackingEntity<S::Visual>>,
    /// Turn an update for an unseen track into a creation instead of dropping it
    pub add_unknown_track_on_update: bool,
    /// Subtracted from the current and expected absolute positions
    pub grid_offset: Vector2<f32>,
}

impl<S: EntitySpawner> TrackingEntityManager<S> {
    pub fn new(spawner: S, tracking: TrackingSettings) -> Self {
        Self {
            spawner,
            tracking,
            entities: HashMap::new(),
            add_unknown_track_on_update: true,
            grid_offset: Vector2::zeros(),
        }
    }

    pub fn entity(&self, track_id: i32) -> Option<&TrackingEntity<S::Visual>> {
        self.entities.get(&track_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &TrackingEntity<S::Visual>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    fn screen_position(&self, track: &TrackRecord) -> Vector2<f32> {
        self.tracking
            .screen_position_from_relative(track.rel_pos.x, track.rel_pos.y)
    }

    fn apply_track_data(
        entity: &mut TrackingEntity<S::Visual>,
        track: &TrackRecord,
        offset: Vector2<f32>,
    ) {
        entity.absolute_position = track.current_pos - offset;
        entity.next_expected_absolute_position = track.expect_pos - offset;
        entity.relative_position = track.rel_pos;
        entity.orientation = track.orientation;
        entity.speed = track.speed;
        entity.echoes.clone_from(&track.echoes);
    }

    /// Spawn an entity for `track`, replacing any entity with the same ID
    pub fn track_added(&mut self, track: &TrackRecord) {
        let screen_position = self.screen_position(track);
        let visual = self.spawner.spawn(track.track_id, screen_position);
        let mut entity = TrackingEntity {
            track_id: track.track_id,
            absolute_position: Vector2::zeros(),
            next_expected_absolute_position: Vector2::zeros(),
            relative_position: Vector2::zeros(),
            orientation: Vector2::zeros(),
            speed: 0.0,
            echoes: Vec::new(),
            screen_position,
            visual,
        };
        Self::apply_track_data(&mut entity, track, self.grid_offset);

        debug!("Spawned entity for track {}", track.track_id);
        if let Some(previous) = self.entities.insert(track.track_id, entity) {
            self.spawner.despawn(previous.visual);
        }
    }

    pub fn track_updated(&mut self, track: &TrackRecord) {
        let screen_position = self.screen_position(track);
        match self.entities.get_mut(&track.track_id) {
            Some(entity) => {
                Self::apply_track_data(entity, track, self.grid_offset);
                entity.screen_position = screen_position;
                self.spawner.reposition(&mut entity.visual, screen_position);
            }
            None if self.add_unknown_track_on_update => self.track_added(track),
            None => trace!("Dropping update for unknown track {}", track.track_id),
        }
    }

    pub fn track_removed(&mut self, track_id: i32) {
        if let Some(entity) = self.entities.remove(&track_id) {
            self.spawner.despawn(entity.visual);
            debug!("Despawned entity for track {}", track_id);
        }
    }
}

impl<S: EntitySpawner> TrackingReceiver for TrackingEntityManager<S> {
    fn on_track_new(&mut self, track: &TrackRecord) -> Result<(), ReceiverError> {
        self.track_added(track);
        Ok(())
    }

    fn on_track_update(&mut self, track: &TrackRecord) -> Result<(), ReceiverError> {
        self.track_updated(track);
        Ok(())
    }

    fn on_track_lost(&mut self, track: &TrackRecord) -> Result<(), ReceiverError> {
        self.track_removed(track.track_id);
        Ok(())
    }
}
