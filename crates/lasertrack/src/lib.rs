//! Real-time position tracking ingestion
//!
//! This crate receives people-tracking data from a laser tracking system over
//! UDP, either through the native binary Tracklink protocol or through TUIO,
//! and turns it into a uniform stream of track lifecycle events
//! (new / update / lost) delivered to registered [`TrackingReceiver`]s.
//!
//! Both sources are polled once per tick from the consuming thread. The
//! TUIO client runs its own receive thread and hands events over through a
//! queue that is drained during the tick.

pub mod bytepack;
pub mod entity;
pub mod receiver;
pub mod registry;
pub mod settings;
pub mod track;
pub mod tracklink;
pub mod tuio;
pub mod udp;

// Re-export commonly used types
pub use bytepack::{PackError, UnpackError};
pub use entity::{EntitySpawner, TrackingEntity, TrackingEntityManager};
pub use receiver::{shared, LifecycleEvent, ReceiverError, SharedReceiver, TrackingReceiver};
pub use registry::TrackingRegistry;
pub use settings::{
    load_or_default, load_settings, save_settings, SettingsError, TrackingSettings,
    TracklinkSettings, TuioSettings, TRACKLINK_CONFIG_FILE, TUIO_CONFIG_FILE,
};
pub use track::{TrackRecord, TrackState, MIN_ORIENTATION_SPEED};
pub use tracklink::{
    FramingError, FramingErrorKind, TracklinkError, TracklinkFrame, TracklinkReceiveHandler,
};
pub use tuio::{TuioError, TuioReceiveHandler};
pub use udp::{UdpError, UdpReceiver, UdpReceiverConfig};
