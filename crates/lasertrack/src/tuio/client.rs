//! TUIO 1.1 client
//!
//! [`TuioSession`] turns the `/tuio/2Dcur`, `/tuio/2Dobj` and `/tuio/2Dblb`
//! profile messages into add/update/remove notifications on a
//! [`TuioListener`]. [`TuioClient`] owns the UDP socket and runs a session on
//! its own receive thread, so listener callbacks arrive on that thread.

use super::osc::{self, OscMessage, OscPacket, OscType};
use nalgebra::Vector2;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

pub const CURSOR_PROFILE: &str = "/tuio/2Dcur";
pub const OBJECT_PROFILE: &str = "/tuio/2Dobj";
pub const BLOB_PROFILE: &str = "/tuio/2Dblb";

/// Late frames within this distance of the last committed frame are dropped
const MAX_FRAME_GAP: i32 = 100;

/// How long the receive thread blocks before checking for shutdown
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(50);

/// Errors that can occur while running a TUIO client
#[derive(Error, Debug)]
pub enum TuioError {
    #[error("Couldn't listen at port {port} for TUIO data: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A touch point; the tracking system reports one per tracked person
#[derive(Debug, Clone, PartialEq)]
pub struct TuioCursor {
    pub session_id: i64,
    /// Lowest free ID at the time the cursor appeared
    pub cursor_id: i32,
    /// Normalized [0, 1] position
    pub position: Vector2<f32>,
    pub x_speed: f32,
    pub y_speed: f32,
    pub motion_accel: f32,
}

/// A tagged object; the tracking system uses these for echoes
#[derive(Debug, Clone, PartialEq)]
pub struct TuioObject {
    pub session_id: i64,
    /// Class ID from the `set` message
    pub symbol_id: i32,
    pub position: Vector2<f32>,
    pub angle: f32,
    pub x_speed: f32,
    pub y_speed: f32,
    pub rotation_speed: f32,
    pub motion_accel: f32,
    pub rotation_accel: f32,
}

/// An untagged shape
#[derive(Debug, Clone, PartialEq)]
pub struct TuioBlob {
    pub session_id: i64,
    /// Lowest free ID at the time the blob appeared
    pub blob_id: i32,
    pub position: Vector2<f32>,
    pub angle: f32,
    pub width: f32,
    pub height: f32,
    pub area: f32,
    pub x_speed: f32,
    pub y_speed: f32,
    pub rotation_speed: f32,
    pub motion_accel: f32,
    pub rotation_accel: f32,
}

/// Receives TUIO notifications; called from the client's receive thread
pub trait TuioListener: Send + Sync {
    fn add_tuio_object(&self, object: &TuioObject);
    fn update_tuio_object(&self, object: &TuioObject);
    fn remove_tuio_object(&self, object: &TuioObject);
    fn add_tuio_cursor(&self, cursor: &TuioCursor);
    fn update_tuio_cursor(&self, cursor: &TuioCursor);
    fn remove_tuio_cursor(&self, cursor: &TuioCursor);
    fn add_tuio_blob(&self, blob: &TuioBlob);
    fn update_tuio_blob(&self, blob: &TuioBlob);
    fn remove_tuio_blob(&self, blob: &TuioBlob);

    /// Called once per committed frame, after all other notifications
    fn refresh(&self, _frame_id: i32) {}
}

fn float_args<const N: usize>(args: &[OscType]) -> Option<[f32; N]> {
    if args.len() < N {
        return None;
    }
    let mut values = [0.0; N];
    for (value, arg) in values.iter_mut().zip(args) {
        *value = arg.as_float()?;
    }
    Some(values)
}

fn session_arg(arg: &OscType) -> Option<i64> {
    match *arg {
        OscType::Long(v) => Some(v),
        _ => arg.as_int().map(i64::from),
    }
}

/// Shape shared by the three profile entity types
trait ProfileEntity: Clone + PartialEq {
    /// Whether the session hands out IDs itself instead of taking them from `set`
    const ALLOCATES_IDS: bool;

    /// Parse the arguments that follow `set`
    fn from_set(args: &[OscType]) -> Option<Self>;
    fn session_id(&self) -> i64;
    fn id(&self) -> i32;
    fn set_id(&mut self, id: i32);
}

impl ProfileEntity for TuioCursor {
    const ALLOCATES_IDS: bool = true;

    // set s x y X Y m
    fn from_set(args: &[OscType]) -> Option<Self> {
        let session_id = session_arg(args.first()?)?;
        let [x, y, x_speed, y_speed, motion_accel] = float_args::<5>(&args[1..])?;
        Some(Self {
            session_id,
            cursor_id: -1,
            position: Vector2::new(x, y),
            x_speed,
            y_speed,
            motion_accel,
        })
    }

    fn session_id(&self) -> i64 {
        self.session_id
    }

    fn id(&self) -> i32 {
        self.cursor_id
    }

    fn set_id(&mut self, id: i32) {
        self.cursor_id = id;
    }
}

impl ProfileEntity for TuioObject {
    const ALLOCATES_IDS: bool = false;

    // set s i x y a X Y A m r
    fn from_set(args: &[OscType]) -> Option<Self> {
        let session_id = session_arg(args.first()?)?;
        let symbol_id = args.get(1)?.as_int()?;
        let [x, y, angle, x_speed, y_speed, rotation_speed, motion_accel, rotation_accel] =
            float_args::<8>(args.get(2..)?)?;
        Some(Self {
            session_id,
            symbol_id,
            position: Vector2::new(x, y),
            angle,
            x_speed,
            y_speed,
            rotation_speed,
            motion_accel,
            rotation_accel,
        })
    }

    fn session_id(&self) -> i64 {
        self.session_id
    }

    fn id(&self) -> i32 {
        self.symbol_id
    }

    fn set_id(&mut self, id: i32) {
        self.symbol_id = id;
    }
}

impl ProfileEntity for TuioBlob {
    const ALLOCATES_IDS: bool = true;

    // set s x y a w h f X Y A m r
    fn from_set(args: &[OscType]) -> Option<Self> {
        let session_id = session_arg(args.first()?)?;
        let [x, y, angle, width, height, area, rest @ ..] = float_args::<11>(&args[1..])?;
        let [x_speed, y_speed, rotation_speed, motion_accel, rotation_accel] = rest;
        Some(Self {
            session_id,
            blob_id: -1,
            position: Vector2::new(x, y),
            angle,
            width,
            height,
            area,
            x_speed,
            y_speed,
            rotation_speed,
            motion_accel,
            rotation_accel,
        })
    }

    fn session_id(&self) -> i64 {
        self.session_id
    }

    fn id(&self) -> i32 {
        self.blob_id
    }

    fn set_id(&mut self, id: i32) {
        self.blob_id = id;
    }
}

enum Change<T> {
    Added(T),
    Updated(T),
    Removed(T),
}

/// Live entities and uncommitted messages of one profile
struct Profile<T> {
    live: BTreeMap<i64, T>,
    frame_set: Vec<T>,
    frame_alive: Option<Vec<i64>>,
    current_frame: i32,
}

impl<T: ProfileEntity> Profile<T> {
    fn new() -> Self {
        Self {
            live: BTreeMap::new(),
            frame_set: Vec::new(),
            frame_alive: None,
            current_frame: 0,
        }
    }

    fn handle(&mut self, msg: &OscMessage) -> Option<Vec<Change<T>>> {
        let command = msg.args.first().and_then(OscType::as_str)?;
        let args = &msg.args[1..];
        match command {
            "set" => {
                match T::from_set(args) {
                    Some(entity) => self.frame_set.push(entity),
                    None => warn!("Malformed {} set message with {} args", msg.addr, args.len()),
                }
                None
            }
            "alive" => {
                self.frame_alive = Some(args.iter().filter_map(session_arg).collect());
                None
            }
            "fseq" => {
                let fseq = args.first().and_then(OscType::as_int).unwrap_or(-1);
                Some(self.commit(fseq))
            }
            "source" => None,
            other => {
                trace!("Ignoring {} command {:?}", msg.addr, other);
                None
            }
        }
    }

    fn accepts_frame(&self, fseq: i32) -> bool {
        fseq == -1
            || fseq > self.current_frame
            || self.current_frame.saturating_sub(fseq) > MAX_FRAME_GAP
    }

    fn lowest_free_id(&self) -> i32 {
        (0..)
            .find(|id| !self.live.values().any(|e| e.id() == *id))
            .unwrap_or(i32::MAX)
    }

    fn commit(&mut self, fseq: i32) -> Vec<Change<T>> {
        let frame_set = std::mem::take(&mut self.frame_set);
        let frame_alive = self.frame_alive.take();

        if !self.accepts_frame(fseq) {
            debug!("Dropping late TUIO frame {} (current {})", fseq, self.current_frame);
            return Vec::new();
        }
        if fseq != -1 {
            self.current_frame = fseq;
        }

        let mut changes = Vec::new();

        if let Some(alive) = &frame_alive {
            let gone: Vec<i64> = self
                .live
                .keys()
                .filter(|id| !alive.contains(id))
                .copied()
                .collect();
            for session_id in gone {
                if let Some(entity) = self.live.remove(&session_id) {
                    changes.push(Change::Removed(entity));
                }
            }
        }

        for mut entity in frame_set {
            let session_id = entity.session_id();
            if frame_alive.as_ref().is_some_and(|alive| !alive.contains(&session_id)) {
                continue;
            }
            match self.live.get(&session_id) {
                Some(existing) => {
                    if T::ALLOCATES_IDS {
                        entity.set_id(existing.id());
                    }
                    if *existing != entity {
                        self.live.insert(session_id, entity.clone());
                        changes.push(Change::Updated(entity));
                    }
                }
                None => {
                    if T::ALLOCATES_IDS {
                        entity.set_id(self.lowest_free_id());
                    }
                    self.live.insert(session_id, entity.clone());
                    changes.push(Change::Added(entity));
                }
            }
        }
        changes
    }
}

/// Socket-free TUIO state machine
pub struct TuioSession {
    cursors: Profile<TuioCursor>,
    objects: Profile<TuioObject>,
    blobs: Profile<TuioBlob>,
}

impl Default for TuioSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TuioSession {
    pub fn new() -> Self {
        Self {
            cursors: Profile::new(),
            objects: Profile::new(),
            blobs: Profile::new(),
        }
    }

    /// Feed one decoded packet, notifying `listener` on every committed frame
    pub fn process_packet(&mut self, packet: &OscPacket, listener: &dyn TuioListener) {
        packet.for_each_message(&mut |msg: &OscMessage| self.process_message(msg, listener));
    }

    pub fn process_message(&mut self, msg: &OscMessage, listener: &dyn TuioListener) {
        match msg.addr.as_str() {
            CURSOR_PROFILE => {
                let Some(changes) = self.cursors.handle(msg) else { return };
                for change in &changes {
                    match change {
                        Change::Added(c) => listener.add_tuio_cursor(c),
                        Change::Updated(c) => listener.update_tuio_cursor(c),
                        Change::Removed(c) => listener.remove_tuio_cursor(c),
                    }
                }
                listener.refresh(self.cursors.current_frame);
            }
            OBJECT_PROFILE => {
                let Some(changes) = self.objects.handle(msg) else { return };
                for change in &changes {
                    match change {
                        Change::Added(o) => listener.add_tuio_object(o),
                        Change::Updated(o) => listener.update_tuio_object(o),
                        Change::Removed(o) => listener.remove_tuio_object(o),
                    }
                }
                listener.refresh(self.objects.current_frame);
            }
            BLOB_PROFILE => {
                let Some(changes) = self.blobs.handle(msg) else { return };
                for change in &changes {
                    match change {
                        Change::Added(b) => listener.add_tuio_blob(b),
                        Change::Updated(b) => listener.update_tuio_blob(b),
                        Change::Removed(b) => listener.remove_tuio_blob(b),
                    }
                }
                listener.refresh(self.blobs.current_frame);
            }
            other => trace!("Ignoring OSC message {}", other),
        }
    }

    pub fn cursors(&self) -> Vec<TuioCursor> {
        self.cursors.live.values().cloned().collect()
    }

    pub fn objects(&self) -> Vec<TuioObject> {
        self.objects.live.values().cloned().collect()
    }

    pub fn blobs(&self) -> Vec<TuioBlob> {
        self.blobs.live.values().cloned().collect()
    }
}

/// TUIO client listening on a UDP port
pub struct TuioClient {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TuioClient {
    /// Bind `port` on all interfaces and start the receive thread
    pub fn connect(port: u16, listener: Arc<dyn TuioListener>) -> Result<Self, TuioError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|source| TuioError::Bind { port, source })?;
        socket.set_read_timeout(Some(RECEIVE_TIMEOUT))?;
        let local_addr = socket.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = running.clone();
            thread::Builder::new()
                .name(format!("tuio-{}", local_addr.port()))
                .spawn(move || receive_loop(socket, running, listener))?
        };

        info!("TUIO client listening at {}", local_addr);
        Ok(Self {
            local_addr,
            running,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the receive thread and free the port
    pub fn disconnect(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("TUIO receive thread panicked");
            }
            info!("Disconnected TUIO client at {}", self.local_addr);
        }
    }
}

impl Drop for TuioClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn receive_loop(socket: UdpSocket, running: Arc<AtomicBool>, listener: Arc<dyn TuioListener>) {
    let mut session = TuioSession::new();
    let mut buffer = vec![0u8; crate::udp::MAX_DATAGRAM_SIZE];

    while running.load(Ordering::Acquire) {
        let len = match socket.recv_from(&mut buffer) {
            Ok((len, _)) => len,
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue
            }
            Err(ref e) if e.kind() == ErrorKind::ConnectionReset => continue,
            Err(e) => {
                error!("TUIO socket error: {}", e);
                break;
            }
        };

        match osc::decode_packet(&buffer[..len]) {
            Ok(packet) => session.process_packet(&packet, listener.as_ref()),
            Err(e) => warn!("Dropping malformed OSC packet: {}", e),
        }
    }
    running.store(false, Ordering::Release);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) fn cursor_bundle(fseq: i32, cursors: &[(i64, f32, f32, f32, f32)]) -> OscPacket {
        let mut content = Vec::new();
        let alive: Vec<OscType> = std::iter::once(OscType::String("alive".into()))
            .chain(cursors.iter().map(|c| OscType::Int(c.0 as i32)))
            .collect();
        content.push(OscPacket::Message(OscMessage::new(CURSOR_PROFILE, alive)));
        for &(s, x, y, xs, ys) in cursors {
            content.push(OscPacket::Message(OscMessage::new(
                CURSOR_PROFILE,
                vec![
                    OscType::String("set".into()),
                    OscType::Int(s as i32),
                    OscType::Float(x),
                    OscType::Float(y),
                    OscType::Float(xs),
                    OscType::Float(ys),
                    OscType::Float(0.0),
                ],
            )));
        }
        content.push(OscPacket::Message(OscMessage::new(
            CURSOR_PROFILE,
            vec![OscType::String("fseq".into()), OscType::Int(fseq)],
        )));
        OscPacket::Bundle(osc::OscBundle {
            timetag: osc::OscTime::IMMEDIATE,
            content,
        })
    }

    pub(crate) fn object_bundle(fseq: i32, objects: &[(i64, i32, f32, f32)]) -> OscPacket {
        let mut content = Vec::new();
        let alive: Vec<OscType> = std::iter::once(OscType::String("alive".into()))
            .chain(objects.iter().map(|o| OscType::Int(o.0 as i32)))
            .collect();
        content.push(OscPacket::Message(OscMessage::new(OBJECT_PROFILE, alive)));
        for &(s, symbol, x, y) in objects {
            let mut args = vec![
                OscType::String("set".into()),
                OscType::Int(s as i32),
                OscType::Int(symbol),
                OscType::Float(x),
                OscType::Float(y),
            ];
            args.extend(std::iter::repeat(OscType::Float(0.0)).take(6));
            content.push(OscPacket::Message(OscMessage::new(OBJECT_PROFILE, args)));
        }
        content.push(OscPacket::Message(OscMessage::new(
            OBJECT_PROFILE,
            vec![OscType::String("fseq".into()), OscType::Int(fseq)],
        )));
        OscPacket::Bundle(osc::OscBundle {
            timetag: osc::OscTime::IMMEDIATE,
            content,
        })
    }

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Log {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl TuioListener for Log {
        fn add_tuio_object(&self, o: &TuioObject) {
            self.push(format!("add obj {}", o.symbol_id));
        }
        fn update_tuio_object(&self, o: &TuioObject) {
            self.push(format!("update obj {}", o.symbol_id));
        }
        fn remove_tuio_object(&self, o: &TuioObject) {
            self.push(format!("remove obj {}", o.symbol_id));
        }
        fn add_tuio_cursor(&self, c: &TuioCursor) {
            self.push(format!("add cur {}", c.cursor_id));
        }
        fn update_tuio_cursor(&self, c: &TuioCursor) {
            self.push(format!("update cur {}", c.cursor_id));
        }
        fn remove_tuio_cursor(&self, c: &TuioCursor) {
            self.push(format!("remove cur {}", c.cursor_id));
        }
        fn add_tuio_blob(&self, b: &TuioBlob) {
            self.push(format!("add blb {}", b.blob_id));
        }
        fn update_tuio_blob(&self, b: &TuioBlob) {
            self.push(format!("update blb {}", b.blob_id));
        }
        fn remove_tuio_blob(&self, b: &TuioBlob) {
            self.push(format!("remove blb {}", b.blob_id));
        }
    }

    #[test]
    fn test_cursor_lifecycle_and_ids() {
        let log = Log::default();
        let mut session = TuioSession::new();

        let frame = cursor_bundle(1, &[(10, 0.1, 0.1, 0.0, 0.0), (11, 0.2, 0.2, 0.0, 0.0)]);
        session.process_packet(&frame, &log);
        assert_eq!(log.take(), vec!["add cur 0", "add cur 1"]);

        // Unchanged cursor 11 produces no update
        let frame = cursor_bundle(2, &[(10, 0.3, 0.1, 1.0, 0.0), (11, 0.2, 0.2, 0.0, 0.0)]);
        session.process_packet(&frame, &log);
        assert_eq!(log.take(), vec!["update cur 0"]);

        // Session 10 leaves, its ID is reused by the next newcomer
        session.process_packet(&cursor_bundle(3, &[(11, 0.2, 0.2, 0.0, 0.0)]), &log);
        assert_eq!(log.take(), vec!["remove cur 0"]);
        let frame = cursor_bundle(4, &[(11, 0.2, 0.2, 0.0, 0.0), (12, 0.5, 0.5, 0.0, 0.0)]);
        session.process_packet(&frame, &log);
        assert_eq!(log.take(), vec!["add cur 0"]);

        let ids: Vec<i32> = session.cursors().iter().map(|c| c.cursor_id).collect();
        assert_eq!(ids, vec![1, 0]);
    }

    #[test]
    fn test_late_frames_are_dropped() {
        let log = Log::default();
        let mut session = TuioSession::new();

        session.process_packet(&cursor_bundle(50, &[(1, 0.1, 0.1, 0.0, 0.0)]), &log);
        log.take();

        session.process_packet(&cursor_bundle(49, &[]), &log);
        assert!(log.take().is_empty());
        assert_eq!(session.cursors().len(), 1);

        // fseq -1 is always accepted
        session.process_packet(&cursor_bundle(-1, &[]), &log);
        assert_eq!(log.take(), vec!["remove cur 0"]);
    }

    #[test]
    fn test_large_gap_resets_frame_counter() {
        let log = Log::default();
        let mut session = TuioSession::new();

        session.process_packet(&cursor_bundle(500, &[(1, 0.1, 0.1, 0.0, 0.0)]), &log);
        log.take();

        // Sender restarted its frame counter
        session.process_packet(&cursor_bundle(1, &[(2, 0.1, 0.1, 0.0, 0.0)]), &log);
        assert_eq!(log.take(), vec!["remove cur 0", "add cur 0"]);
    }

    #[test]
    fn test_object_symbol_id_comes_from_set() {
        let log = Log::default();
        let mut session = TuioSession::new();

        session.process_packet(&object_bundle(1, &[(100, 7, 0.4, 0.4), (101, 7, 0.5, 0.4)]), &log);
        assert_eq!(log.take(), vec!["add obj 7", "add obj 7"]);

        session.process_packet(&object_bundle(2, &[]), &log);
        assert_eq!(log.take(), vec!["remove obj 7", "remove obj 7"]);
    }

    #[test]
    fn test_blob_profile() {
        let log = Log::default();
        let mut session = TuioSession::new();

        let mut set = vec![OscType::String("set".into()), OscType::Int(3)];
        set.extend(std::iter::repeat(OscType::Float(0.5)).take(11));
        for msg in [
            OscMessage::new(BLOB_PROFILE, vec![OscType::String("alive".into()), OscType::Int(3)]),
            OscMessage::new(BLOB_PROFILE, set),
            OscMessage::new(BLOB_PROFILE, vec![OscType::String("fseq".into()), OscType::Int(1)]),
        ] {
            session.process_message(&msg, &log);
        }
        assert_eq!(log.take(), vec!["add blb 0"]);
        assert_eq!(session.blobs()[0].width, 0.5);
    }

    #[test]
    fn test_client_receives_over_udp() {
        let log = Arc::new(Log::default());
        let mut client = TuioClient::connect(0, log.clone()).unwrap();
        assert!(client.is_connected());

        let bytes = osc::encode_packet(&cursor_bundle(1, &[(4, 0.5, 0.5, 0.0, 0.0)])).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&bytes, ("127.0.0.1", client.local_addr().port()))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut entries = Vec::new();
        while entries.is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
            entries = log.take();
        }
        assert_eq!(entries, vec!["add cur 0"]);

        client.disconnect();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_bind_failure() {
        let taken = UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let result = TuioClient::connect(port, Arc::new(Log::default()));
        assert!(matches!(result, Err(TuioError::Bind { .. })));
    }
}
