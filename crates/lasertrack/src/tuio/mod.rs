//! TUIO tracking source
//!
//! Data flows from the [`client::TuioClient`] receive thread through the
//! [`listener::TuioEventListener`] queue, is drained once per tick by the
//! [`processor::TuioEventProcessor`] and mapped onto tracks by the
//! [`handler::TuioReceiveHandler`].

pub mod client;
pub mod handler;
pub mod listener;
pub mod osc;
pub mod processor;

pub use client::{
    TuioBlob, TuioClient, TuioCursor, TuioError, TuioListener, TuioObject, TuioSession,
};
pub use handler::TuioReceiveHandler;
pub use listener::{TuioEntity, TuioEvent, TuioEventKind, TuioEventListener, TuioEventQueue};
pub use osc::OscError;
pub use processor::{TuioEventHandler, TuioEventProcessor};
