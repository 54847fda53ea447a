//! Tracklink: the native binary tracking protocol
//!
//! One UDP datagram carries one or more concatenated frames:
//!
//! ```text
//! 'T' <i32 trackID> <i32 state>
//!     <f32 currentPos.x> <f32 currentPos.y>
//!     <f32 expectPos.x>  <f32 expectPos.y>
//!     <f32 orientation.x> <f32 orientation.y>
//!     <f32 speed>
//!     <f32 relPos.x> <f32 relPos.y>
//!     { 'E' <f32 echo.x> <f32 echo.y> 'e' }*
//! 't'
//! ```
//!
//! All values are little-endian. Decoding stops at the first malformed frame;
//! the rest of that datagram is discarded without attempting to resync.

use crate::bytepack::{self, PackError, UnpackError};
use crate::receiver::SharedReceiver;
use crate::registry::TrackingRegistry;
use crate::settings::{TrackingSettings, TracklinkSettings};
use crate::track::{TrackRecord, TrackState};
use crate::udp::{UdpError, UdpReceiver, UdpReceiverConfig};
use nalgebra::Vector2;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub const FRAME_HEADER: u8 = b'T';
pub const FRAME_TAIL: u8 = b't';
pub const ECHO_HEADER: u8 = b'E';
pub const ECHO_TAIL: u8 = b'e';

/// Size of a frame without echoes: header, 2 ints, 9 floats, tail
pub const MIN_FRAME_SIZE: usize = 1 + 2 * 4 + 9 * 4 + 1;

/// Size of one echo sub-record
pub const ECHO_SIZE: usize = 1 + 2 * 4 + 1;

/// What went wrong inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingErrorKind {
    /// First byte of a frame was not `'T'`
    UnexpectedHeader(u8),
    /// Byte after the last field was neither `'E'` nor `'t'`
    UnexpectedTail(u8),
    /// Echo sub-record not closed by `'e'`
    UnexpectedEchoTail(u8),
    /// State field outside the known lifecycle states
    InvalidState(i32),
    /// Datagram ended in the middle of a frame
    Truncated,
}

impl std::fmt::Display for FramingErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedHeader(b) => write!(f, "unexpected header byte 0x{b:02x}"),
            Self::UnexpectedTail(b) => write!(f, "unexpected tailing byte 0x{b:02x}"),
            Self::UnexpectedEchoTail(b) => write!(f, "unexpected echo tail byte 0x{b:02x}"),
            Self::InvalidState(s) => write!(f, "invalid track state {s}"),
            Self::Truncated => write!(f, "truncated frame"),
        }
    }
}

/// A malformed frame; everything after it in the datagram was skipped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Tracklink framing error at offset {offset}: {kind} (after {frames_decoded} good frames)")]
pub struct FramingError {
    pub kind: FramingErrorKind,
    /// Offset of the frame that failed to decode
    pub offset: usize,
    /// Number of good frames that preceded the error
    pub frames_decoded: usize,
}

/// Errors from the Tracklink receive path
#[derive(Error, Debug)]
pub enum TracklinkError {
    #[error("UDP error: {0}")]
    Udp(#[from] UdpError),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// One decoded frame; a transient value that is never stored
#[derive(Debug, Clone, PartialEq)]
pub struct TracklinkFrame {
    pub track_id: i32,
    pub state: TrackState,
    pub current_pos: Vector2<f32>,
    pub expect_pos: Vector2<f32>,
    pub orientation: Vector2<f32>,
    pub speed: f32,
    pub rel_pos: Vector2<f32>,
    pub echoes: Vec<Vector2<f32>>,
}

impl TracklinkFrame {
    /// Overwrite every field of `track` with this frame, echoes included
    pub fn apply_to(self, track: &mut TrackRecord) {
        track.state = self.state;
        track.current_pos = self.current_pos;
        track.expect_pos = self.expect_pos;
        track.orientation = self.orientation;
        track.speed = self.speed;
        track.rel_pos = self.rel_pos;
        track.echoes = self.echoes;
    }
}

impl From<&TrackRecord> for TracklinkFrame {
    fn from(track: &TrackRecord) -> Self {
        Self {
            track_id: track.track_id,
            state: track.state,
            current_pos: track.current_pos,
            expect_pos: track.expect_pos,
            orientation: track.orientation,
            speed: track.speed,
            rel_pos: track.rel_pos,
            echoes: track.echoes.clone(),
        }
    }
}

fn truncated(_: UnpackError) -> FramingErrorKind {
    FramingErrorKind::Truncated
}

/// Decode a single frame starting at `cursor`.
///
/// On success the cursor points past the frame's tail byte. On failure the
/// cursor position is unspecified.
pub fn decode_frame(buf: &[u8], cursor: &mut usize) -> Result<TracklinkFrame, FramingErrorKind> {
    let header = bytepack::unpack_u8(buf, cursor).map_err(truncated)?;
    if header != FRAME_HEADER {
        return Err(FramingErrorKind::UnexpectedHeader(header));
    }

    let track_id = bytepack::unpack_i32(buf, cursor).map_err(truncated)?;
    let raw_state = bytepack::unpack_i32(buf, cursor).map_err(truncated)?;
    let state = TrackState::from_i32(raw_state).ok_or(FramingErrorKind::InvalidState(raw_state))?;
    let current_pos = bytepack::unpack_vector2(buf, cursor).map_err(truncated)?;
    let expect_pos = bytepack::unpack_vector2(buf, cursor).map_err(truncated)?;
    let orientation = bytepack::unpack_vector2(buf, cursor).map_err(truncated)?;
    let speed = bytepack::unpack_f32(buf, cursor).map_err(truncated)?;
    let rel_pos = bytepack::unpack_vector2(buf, cursor).map_err(truncated)?;

    let mut echoes = Vec::new();
    loop {
        match bytepack::unpack_u8(buf, cursor).map_err(truncated)? {
            ECHO_HEADER => {
                echoes.push(bytepack::unpack_vector2(buf, cursor).map_err(truncated)?);
                let tail = bytepack::unpack_u8(buf, cursor).map_err(truncated)?;
                if tail != ECHO_TAIL {
                    return Err(FramingErrorKind::UnexpectedEchoTail(tail));
                }
            }
            FRAME_TAIL => break,
            other => return Err(FramingErrorKind::UnexpectedTail(other)),
        }
    }

    Ok(TracklinkFrame {
        track_id,
        state,
        current_pos,
        expect_pos,
        orientation,
        speed,
        rel_pos,
        echoes,
    })
}

/// Iterator over the frames of one datagram.
///
/// Yields each good frame, then at most one [`FramingError`], then stops.
pub struct FrameDecoder<'a> {
    buf: &'a [u8],
    cursor: usize,
    frames_decoded: usize,
    failed: bool,
}

impl<'a> FrameDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            cursor: 0,
            frames_decoded: 0,
            failed: false,
        }
    }
}

impl Iterator for FrameDecoder<'_> {
    type Item = Result<TracklinkFrame, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.buf.len() {
            return None;
        }

        let offset = self.cursor;
        match decode_frame(self.buf, &mut self.cursor) {
            Ok(frame) => {
                self.frames_decoded += 1;
                Some(Ok(frame))
            }
            Err(kind) => {
                self.failed = true;
                Some(Err(FramingError {
                    kind,
                    offset,
                    frames_decoded: self.frames_decoded,
                }))
            }
        }
    }
}

/// Size of the encoded frame for `track`
pub fn encoded_len(track: &TrackRecord) -> usize {
    MIN_FRAME_SIZE + track.echoes.len() * ECHO_SIZE
}

/// Append one frame for `track` at `cursor`.
///
/// Fails without modifying the buffer if the frame does not fit.
pub fn encode_frame(
    buf: &mut [u8],
    cursor: &mut usize,
    track: &TrackRecord,
) -> Result<(), PackError> {
    let available = buf.len().saturating_sub(*cursor);
    let needed = encoded_len(track);
    if needed > available {
        return Err(PackError::OutOfSpace { needed, available });
    }

    bytepack::pack_u8(buf, cursor, FRAME_HEADER)?;
    bytepack::pack_i32(buf, cursor, track.track_id)?;
    bytepack::pack_i32(buf, cursor, track.state as i32)?;
    bytepack::pack_vector2(buf, cursor, &track.current_pos)?;
    bytepack::pack_vector2(buf, cursor, &track.expect_pos)?;
    bytepack::pack_vector2(buf, cursor, &track.orientation)?;
    bytepack::pack_f32(buf, cursor, track.speed)?;
    bytepack::pack_vector2(buf, cursor, &track.rel_pos)?;
    for echo in &track.echoes {
        bytepack::pack_u8(buf, cursor, ECHO_HEADER)?;
        bytepack::pack_vector2(buf, cursor, echo)?;
        bytepack::pack_u8(buf, cursor, ECHO_TAIL)?;
    }
    bytepack::pack_u8(buf, cursor, FRAME_TAIL)?;
    Ok(())
}

/// Encode several tracks into one datagram payload
pub fn encode_frames(tracks: &[TrackRecord]) -> Vec<u8> {
    let mut buf = vec![0u8; tracks.iter().map(encoded_len).sum()];
    let mut cursor = 0;
    for track in tracks {
        // The buffer is sized from encoded_len, so this cannot run out of space
        if let Err(e) = encode_frame(&mut buf, &mut cursor, track) {
            warn!("Failed to encode track {}: {}", track.track_id, e);
            break;
        }
    }
    buf.truncate(cursor);
    buf
}

/// Receives Tracklink datagrams and turns them into lifecycle events
pub struct TracklinkReceiveHandler {
    registry: TrackingRegistry,
    settings: TracklinkSettings,
    udp: Option<UdpReceiver>,
    framing_errors: u64,
}

impl TracklinkReceiveHandler {
    pub fn new(settings: TracklinkSettings) -> Self {
        Self {
            registry: TrackingRegistry::new(),
            settings,
            udp: None,
            framing_errors: 0,
        }
    }

    /// Bind the UDP socket described by the settings
    pub fn start(&mut self) -> Result<(), TracklinkError> {
        let config = UdpReceiverConfig {
            port: self.settings.udp_port,
            address: self.settings.udp_address.clone(),
            multicast: self.settings.is_multicast_address,
            listen_to_all_addresses: true,
        };
        let udp = UdpReceiver::bind(&config)?;
        info!(
            "Tracklink receiver started on {} (multicast: {})",
            udp.local_addr()?,
            self.settings.is_multicast_address
        );
        self.udp = Some(udp);
        Ok(())
    }

    /// Local socket address once started
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.udp.as_ref().and_then(|udp| udp.local_addr().ok())
    }

    pub fn settings(&self) -> &TracklinkSettings {
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

    /// Number of datagrams that were cut short by a framing error
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Drain the socket and process every pending datagram.
    ///
    /// Framing errors are logged and counted; only socket errors are
    /// returned. Returns the number of frames applied.
    pub fn update(&mut self) -> Result<usize, TracklinkError> {
        let Some(udp) = self.udp.as_mut() else {
            return Ok(0);
        };

        let mut datagrams = Vec::new();
        let polled = udp.poll(|bytes, _source| datagrams.push(bytes.to_vec()));
        self.apply_datagrams(&datagrams, polled)
    }

    /// Apply datagrams read by one poll, then report the poll's socket error.
    ///
    /// Datagrams read before a socket error are still applied.
    fn apply_datagrams(
        &mut self,
        datagrams: &[Vec<u8>],
        polled: Result<usize, UdpError>,
    ) -> Result<usize, TracklinkError> {
        let mut applied = 0;
        for datagram in datagrams {
            match self.handle_message(datagram) {
                Ok(frames) => applied += frames,
                Err(e) => {
                    applied += e.frames_decoded;
                    warn!("{}; skipping rest of datagram", e);
                }
            }
        }
        polled?;
        Ok(applied)
    }

    /// Decode one datagram and dispatch a lifecycle event per good frame.
    ///
    /// Frames before a framing error are fully applied and dispatched.
    pub fn handle_message(&mut self, bytes: &[u8]) -> Result<usize, FramingError> {
        let mut applied = 0;
        for frame in FrameDecoder::new(bytes) {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    self.framing_errors += 1;
                    return Err(e);
                }
            };

            let track_id = frame.track_id;
            trace!("Tracklink frame for track {} ({:?})", track_id, frame.state);

            let (track, _) = self.registry.entry(track_id);
            frame.apply_to(track);
            if let Some(event) = self.registry.commit(track_id) {
                debug!("Track {} -> {:?}", track_id, event);
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Report all live tracks as lost and release the socket
    pub fn shutdown(&mut self) {
        self.registry.shutdown();
        if self.udp.take().is_some() {
            info!("Tracklink receiver stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::tests::RecordingReceiver;
    use crate::receiver::{shared, LifecycleEvent};
    use std::sync::{Arc, Mutex};

    fn track(id: i32, state: TrackState) -> TrackRecord {
        TrackRecord {
            state,
            current_pos: Vector2::new(id as f32, 2.0),
            expect_pos: Vector2::new(id as f32 + 0.1, 2.1),
            orientation: Vector2::new(0.6, 0.8),
            speed: 1.25,
            rel_pos: Vector2::new(0.25, 0.75),
            ..TrackRecord::new(id)
        }
    }

    fn handler_with_recorder() -> (TracklinkReceiveHandler, Arc<Mutex<RecordingReceiver>>) {
        let recorder = shared(RecordingReceiver::default());
        let mut handler = TracklinkReceiveHandler::new(TracklinkSettings::default());
        handler.register_receiver(recorder.clone());
        (handler, recorder)
    }

    #[test]
    fn test_concrete_frame() {
        let mut bytes = vec![b'T', 5, 0, 0, 0, 0, 0, 0, 0];
        for v in [1.0f32, 2.0, 1.0, 2.0, 0.0, 0.0, 0.0, 0.5, 0.5] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.push(b't');
        assert_eq!(bytes.len(), MIN_FRAME_SIZE);

        let (mut handler, recorder) = handler_with_recorder();
        assert_eq!(handler.handle_message(&bytes), Ok(1));

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.events, vec![(LifecycleEvent::New, 5, TrackState::Added)]);
        let record = &recorder.records[0];
        assert_eq!(record.current_pos, Vector2::new(1.0, 2.0));
        assert_eq!(record.rel_pos, Vector2::new(0.5, 0.5));
        assert!(record.echoes.is_empty());
    }

    #[test]
    fn test_multiple_frames_decode_in_order() {
        let mut tracks: Vec<TrackRecord> = (1..=4).map(|id| track(id, TrackState::Added)).collect();
        tracks[2].echoes = vec![Vector2::new(0.1, 0.2), Vector2::new(0.3, 0.4)];
        let bytes = encode_frames(&tracks);

        let (mut handler, recorder) = handler_with_recorder();
        assert_eq!(handler.handle_message(&bytes), Ok(4));

        let recorder = recorder.lock().unwrap();
        let ids: Vec<i32> = recorder.events.iter().map(|e| e.1).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(recorder.records, tracks);
    }

    #[test]
    fn test_truncated_second_frame() {
        let mut bytes = encode_frames(&[track(1, TrackState::Added), track(2, TrackState::Added)]);
        bytes.truncate(MIN_FRAME_SIZE + 10);

        let (mut handler, recorder) = handler_with_recorder();
        let err = handler.handle_message(&bytes).unwrap_err();
        assert_eq!(err.kind, FramingErrorKind::Truncated);
        assert_eq!(err.offset, MIN_FRAME_SIZE);
        assert_eq!(err.frames_decoded, 1);
        assert_eq!(handler.framing_errors(), 1);

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.events, vec![(LifecycleEvent::New, 1, TrackState::Added)]);
    }

    #[test]
    fn test_bad_header_abandons_datagram() {
        let mut bytes = encode_frames(&[track(1, TrackState::Added)]);
        bytes.push(b'X');
        bytes.extend(encode_frames(&[track(2, TrackState::Added)]));

        let (mut handler, recorder) = handler_with_recorder();
        let err = handler.handle_message(&bytes).unwrap_err();
        assert_eq!(err.kind, FramingErrorKind::UnexpectedHeader(b'X'));

        // No resync onto the valid frame after the garbage byte
        assert!(!handler.registry().contains(2));
        assert_eq!(recorder.lock().unwrap().events.len(), 1);
    }

    #[test]
    fn test_bad_tail_and_state() {
        let mut bytes = encode_frames(&[track(1, TrackState::Added)]);
        let last = bytes.len() - 1;
        bytes[last] = b'x';
        let mut cursor = 0;
        assert_eq!(
            decode_frame(&bytes, &mut cursor),
            Err(FramingErrorKind::UnexpectedTail(b'x'))
        );

        let mut bytes = encode_frames(&[track(1, TrackState::Added)]);
        bytes[5..9].copy_from_slice(&7i32.to_le_bytes());
        let mut cursor = 0;
        assert_eq!(
            decode_frame(&bytes, &mut cursor),
            Err(FramingErrorKind::InvalidState(7))
        );
    }

    #[test]
    fn test_lifecycle_and_removal() {
        let (mut handler, recorder) = handler_with_recorder();

        handler.handle_message(&encode_frames(&[track(8, TrackState::Added)])).unwrap();
        handler.handle_message(&encode_frames(&[track(8, TrackState::Updated)])).unwrap();
        handler.handle_message(&encode_frames(&[track(8, TrackState::Removed)])).unwrap();
        assert!(handler.registry().is_empty());

        // Duplicate removal and a removal for an unseen track are silent
        handler.handle_message(&encode_frames(&[track(8, TrackState::Removed)])).unwrap();
        handler.handle_message(&encode_frames(&[track(9, TrackState::Removed)])).unwrap();
        assert!(handler.registry().is_empty());

        let recorder = recorder.lock().unwrap();
        let events: Vec<LifecycleEvent> = recorder.events.iter().map(|e| e.0).collect();
        assert_eq!(
            events,
            vec![LifecycleEvent::New, LifecycleEvent::Update, LifecycleEvent::Lost]
        );
    }

    #[test]
    fn test_echoes_are_replaced() {
        let (mut handler, recorder) = handler_with_recorder();

        let mut first = track(3, TrackState::Added);
        first.echoes = vec![Vector2::new(0.1, 0.1), Vector2::new(0.2, 0.2)];
        handler.handle_message(&encode_frames(&[first])).unwrap();

        let mut second = track(3, TrackState::Updated);
        second.echoes = vec![Vector2::new(0.9, 0.9)];
        handler.handle_message(&encode_frames(&[second])).unwrap();

        assert_eq!(
            handler.registry().get(3).unwrap().echoes,
            vec![Vector2::new(0.9, 0.9)]
        );
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.records[1].echoes, vec![Vector2::new(0.9, 0.9)]);
    }

    #[test]
    fn test_socket_error_after_reads_keeps_datagrams() {
        let (mut handler, recorder) = handler_with_recorder();
        let datagrams = vec![
            encode_frames(&[track(1, TrackState::Added)]),
            encode_frames(&[track(2, TrackState::Added)]),
        ];
        let polled = Err(UdpError::Io(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied,
        )));

        let result = handler.apply_datagrams(&datagrams, polled);
        assert!(matches!(result, Err(TracklinkError::Udp(UdpError::Io(_)))));

        let recorder = recorder.lock().unwrap();
        assert_eq!(
            recorder.events,
            vec![
                (LifecycleEvent::New, 1, TrackState::Added),
                (LifecycleEvent::New, 2, TrackState::Added),
            ]
        );
        assert_eq!(handler.registry().track_ids(), vec![1, 2]);
    }

    #[test]
    fn test_encode_out_of_space() {
        let mut buf = [0u8; MIN_FRAME_SIZE - 1];
        let mut cursor = 0;
        let result = encode_frame(&mut buf, &mut cursor, &track(1, TrackState::Added));
        assert!(matches!(result, Err(PackError::OutOfSpace { .. })));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_shutdown_reports_live_tracks() {
        let (mut handler, recorder) = handler_with_recorder();
        let tracks: Vec<TrackRecord> = (1..=3).map(|id| track(id, TrackState::Added)).collect();
        handler.handle_message(&encode_frames(&tracks)).unwrap();

        handler.shutdown();

        let recorder = recorder.lock().unwrap();
        let lost = recorder
            .events
            .iter()
            .filter(|e| e.0 == LifecycleEvent::Lost)
            .count();
        assert_eq!(lost, 3);
        assert_eq!(handler.registry().len(), 0);
    }
}
