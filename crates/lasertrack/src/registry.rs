//! Keyed store of live tracks and lifecycle classification
//!
//! Both tracking sources feed their decoded observations into a
//! [`TrackingRegistry`]. The registry decides which lifecycle callback an
//! observation turns into, dispatches it to the registered receivers and
//! drops tracks once their removal has been delivered.

use crate::receiver::{LifecycleEvent, ReceiverList, SharedReceiver};
use crate::track::{TrackRecord, TrackState};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug)]
struct LiveTrack {
    record: TrackRecord,
    /// Whether `on_track_new` has been delivered for this track
    announced: bool,
}

/// Owns the live tracks of one tracking source and its receivers
#[derive(Default)]
pub struct TrackingRegistry {
    receivers: ReceiverList,
    tracks: HashMap<i32, LiveTrack>,
}

impl TrackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_receiver(&mut self, receiver: SharedReceiver) {
        self.receivers.register(receiver);
    }

    pub fn unregister_receiver(&mut self, receiver: &SharedReceiver) {
        self.receivers.unregister(receiver);
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    /// Fetch the record for `track_id`, creating an empty one if unseen.
    ///
    /// The flag is true when the track has not been announced to the
    /// receivers yet.
    pub fn entry(&mut self, track_id: i32) -> (&mut TrackRecord, bool) {
        let live = self.tracks.entry(track_id).or_insert_with(|| {
            debug!("Creating record for track {}", track_id);
            LiveTrack {
                record: TrackRecord::new(track_id),
                announced: false,
            }
        });
        (&mut live.record, !live.announced)
    }

    /// Fetch the record for a track without creating it
    pub fn get_mut(&mut self, track_id: i32) -> Option<&mut TrackRecord> {
        self.tracks.get_mut(&track_id).map(|live| &mut live.record)
    }

    pub fn get(&self, track_id: i32) -> Option<&TrackRecord> {
        self.tracks.get(&track_id).map(|live| &live.record)
    }

    pub fn contains(&self, track_id: i32) -> bool {
        self.tracks.contains_key(&track_id)
    }

    /// Whether the track has been announced with `on_track_new`
    pub fn is_announced(&self, track_id: i32) -> bool {
        self.tracks.get(&track_id).is_some_and(|live| live.announced)
    }

    /// Forget a track that was never announced.
    ///
    /// Returns false and keeps the record if the track is unknown or has
    /// already been announced.
    pub fn discard_pending(&mut self, track_id: i32) -> bool {
        if self.tracks.get(&track_id).is_some_and(|live| !live.announced) {
            self.tracks.remove(&track_id);
            debug!("Discarded pending track {}", track_id);
            return true;
        }
        false
    }

    /// Number of stored tracks, announced or not
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// IDs of all stored tracks in ascending order
    pub fn track_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.tracks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Publish the current state of a track to every receiver.
    ///
    /// | announced | removed | callback        |
    /// |-----------|---------|-----------------|
    /// | no        | no      | `on_track_new`  |
    /// | yes       | no      | `on_track_update` |
    /// | yes       | yes     | `on_track_lost` |
    /// | no        | yes     | none            |
    ///
    /// Removed tracks are deleted once the callback has been delivered.
    pub fn commit(&mut self, track_id: i32) -> Option<LifecycleEvent> {
        let live = self.tracks.get_mut(&track_id)?;

        let removed = live.record.state == TrackState::Removed;
        let event = match (live.announced, removed) {
            (false, false) => Some(LifecycleEvent::New),
            (true, false) => Some(LifecycleEvent::Update),
            (true, true) => Some(LifecycleEvent::Lost),
            (false, true) => None,
        };

        if let Some(event) = event {
            self.receivers.dispatch(event, &live.record);
        }
        live.announced = true;

        if removed {
            self.tracks.remove(&track_id);
            debug!("Track {} removed", track_id);
        }

        event
    }

    /// Report every announced track as lost, then forget all tracks and
    /// receivers.
    pub fn shutdown(&mut self) {
        if self.tracks.is_empty() && self.receivers.is_empty() {
            return;
        }

        let mut flushed = 0;
        for (_, mut live) in self.tracks.drain() {
            if !live.announced {
                continue;
            }
            live.record.state = TrackState::Removed;
            self.receivers.dispatch(LifecycleEvent::Lost, &live.record);
            flushed += 1;
        }
        info!("Flushed {} live tracks on shutdown", flushed);

        self.receivers.clear();
    }
}

impl Drop for TrackingRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::shared;
    use crate::receiver::tests::RecordingReceiver;
    use nalgebra::Vector2;

    fn observe(
        registry: &mut TrackingRegistry,
        id: i32,
        state: TrackState,
    ) -> Option<LifecycleEvent> {
        let (record, _) = registry.entry(id);
        record.state = state;
        registry.commit(id)
    }

    #[test]
    fn test_lifecycle_sequence() {
        let recorder = shared(RecordingReceiver::default());
        let mut registry = TrackingRegistry::new();
        registry.register_receiver(recorder.clone());

        assert_eq!(observe(&mut registry, 1, TrackState::Added), Some(LifecycleEvent::New));
        assert_eq!(observe(&mut registry, 1, TrackState::Updated), Some(LifecycleEvent::Update));
        assert_eq!(observe(&mut registry, 1, TrackState::Removed), Some(LifecycleEvent::Lost));
        assert!(!registry.contains(1));

        // A second removal for a forgotten track is silent
        assert_eq!(observe(&mut registry, 1, TrackState::Removed), None);
        assert!(!registry.contains(1));

        let events: Vec<_> = recorder.lock().unwrap().events.iter().map(|e| e.0).collect();
        assert_eq!(
            events,
            vec![LifecycleEvent::New, LifecycleEvent::Update, LifecycleEvent::Lost]
        );
    }

    #[test]
    fn test_first_sighting_as_update_is_announced_as_new() {
        let recorder = shared(RecordingReceiver::default());
        let mut registry = TrackingRegistry::new();
        registry.register_receiver(recorder.clone());

        assert_eq!(observe(&mut registry, 9, TrackState::Updated), Some(LifecycleEvent::New));
        assert!(registry.is_announced(9));
    }

    #[test]
    fn test_entry_reports_unannounced() {
        let mut registry = TrackingRegistry::new();
        let (record, fresh) = registry.entry(4);
        record.rel_pos = Vector2::new(0.5, 0.5);
        assert!(fresh);

        let (_, fresh) = registry.entry(4);
        assert!(fresh);

        registry.commit(4);
        let (record, fresh) = registry.entry(4);
        assert!(!fresh);
        assert_eq!(record.rel_pos, Vector2::new(0.5, 0.5));
    }

    #[test]
    fn test_discard_pending_keeps_announced_tracks() {
        let mut registry = TrackingRegistry::new();
        registry.entry(1);
        observe(&mut registry, 2, TrackState::Added);

        assert!(registry.discard_pending(1));
        assert!(!registry.contains(1));
        assert!(!registry.discard_pending(2));
        assert!(registry.contains(2));
        assert!(!registry.discard_pending(3));
    }

    #[test]
    fn test_shutdown_flushes_announced_tracks() {
        let first = shared(RecordingReceiver::default());
        let second = shared(RecordingReceiver::default());
        let mut registry = TrackingRegistry::new();
        registry.register_receiver(first.clone());
        registry.register_receiver(second.clone());

        for id in [1, 2, 3] {
            observe(&mut registry, id, TrackState::Added);
        }
        // Pending, never announced
        registry.entry(4);

        registry.shutdown();
        assert!(registry.is_empty());
        assert_eq!(registry.receiver_count(), 0);

        for recorder in [first, second] {
            let recorder = recorder.lock().unwrap();
            let mut lost: Vec<i32> = recorder
                .events
                .iter()
                .filter(|e| e.0 == LifecycleEvent::Lost)
                .map(|e| {
                    assert_eq!(e.2, TrackState::Removed);
                    e.1
                })
                .collect();
            lost.sort_unstable();
            assert_eq!(lost, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_drop_flushes() {
        let recorder = shared(RecordingReceiver::default());
        {
            let mut registry = TrackingRegistry::new();
            registry.register_receiver(recorder.clone());
            observe(&mut registry, 5, TrackState::Added);
        }
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.events.last(), Some(&(LifecycleEvent::Lost, 5, TrackState::Removed)));
    }
}
