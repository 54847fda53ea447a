//! Track record model shared by every tracking source

use nalgebra::Vector2;

/// Orientation is only meaningful above this speed (units per second)
pub const MIN_ORIENTATION_SPEED: f32 = 0.25;

/// Lifecycle state of a track as reported by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum TrackState {
    /// The track has been made public for the first time
    #[default]
    Added = 0,
    /// The track is already known and this is a position update
    Updated = 1,
    /// The track has disappeared and this is its last notification
    Removed = 2,
}

impl TrackState {
    /// Convert from the wire representation
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Added),
            1 => Some(Self::Updated),
            2 => Some(Self::Removed),
            _ => None,
        }
    }
}

/// Snapshot of one tracked entity
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    /// Source-assigned ID, stable for the lifetime of the track
    pub track_id: i32,
    /// Current position in sensor space
    pub current_pos: Vector2<f32>,
    /// Position the track is expected at in the next frame
    pub expect_pos: Vector2<f32>,
    /// Position in normalized [0, 1] display coordinates
    pub rel_pos: Vector2<f32>,
    /// Normalized heading, see [`TrackRecord::has_valid_orientation`]
    pub orientation: Vector2<f32>,
    /// Speed in units per second
    pub speed: f32,
    pub state: TrackState,
    /// Secondary contact points (feet) belonging to this track
    pub echoes: Vec<Vector2<f32>>,
}

impl TrackRecord {
    /// Create an empty record for the given track ID
    pub fn new(track_id: i32) -> Self {
        Self {
            track_id,
            current_pos: Vector2::zeros(),
            expect_pos: Vector2::zeros(),
            rel_pos: Vector2::zeros(),
            orientation: Vector2::zeros(),
            speed: 0.0,
            state: TrackState::Added,
            echoes: Vec::new(),
        }
    }

    /// Whether `orientation` carries a usable heading
    pub fn has_valid_orientation(&self) -> bool {
        self.speed >= MIN_ORIENTATION_SPEED
    }

    pub fn is_removed(&self) -> bool {
        self.state == TrackState::Removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_wire() {
        assert_eq!(TrackState::from_i32(0), Some(TrackState::Added));
        assert_eq!(TrackState::from_i32(1), Some(TrackState::Updated));
        assert_eq!(TrackState::from_i32(2), Some(TrackState::Removed));
        assert_eq!(TrackState::from_i32(3), None);
        assert_eq!(TrackState::from_i32(-1), None);
        assert_eq!(TrackState::Removed as i32, 2);
    }

    #[test]
    fn test_orientation_validity() {
        let mut track = TrackRecord::new(7);
        assert_eq!(track.track_id, 7);
        assert!(track.echoes.is_empty());
        assert!(!track.has_valid_orientation());

        track.speed = 0.25;
        assert!(track.has_valid_orientation());
    }
}
