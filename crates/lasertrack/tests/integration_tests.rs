//! Integration tests for lasertrack

use lasertrack::tracklink::encode_frames;
use lasertrack::tuio::osc::{self, OscBundle, OscMessage, OscPacket, OscTime, OscType};
use lasertrack::{
    shared, ReceiverError, TrackRecord, TrackState, TrackingReceiver, TracklinkReceiveHandler,
    TracklinkSettings, TuioReceiveHandler, TuioSettings,
};
use nalgebra::Vector2;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct EventLog {
    events: Vec<(&'static str, i32)>,
    last: Option<TrackRecord>,
}

impl TrackingReceiver for EventLog {
    fn on_track_new(&mut self, track: &TrackRecord) -> Result<(), ReceiverError> {
        self.events.push(("new", track.track_id));
        self.last = Some(track.clone());
        Ok(())
    }

    fn on_track_update(&mut self, track: &TrackRecord) -> Result<(), ReceiverError> {
        self.events.push(("update", track.track_id));
        self.last = Some(track.clone());
        Ok(())
    }

    fn on_track_lost(&mut self, track: &TrackRecord) -> Result<(), ReceiverError> {
        self.events.push(("lost", track.track_id));
        self.last = Some(track.clone());
        Ok(())
    }
}

/// Tick `update` until `log` holds at least `count` events or two seconds pass
fn tick_until<F: FnMut()>(log: &Arc<Mutex<EventLog>>, count: usize, mut update: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while log.lock().unwrap().events.len() < count && Instant::now() < deadline {
        update();
        thread::sleep(Duration::from_millis(10));
    }
}

fn track(id: i32, state: TrackState, rel: (f32, f32)) -> TrackRecord {
    TrackRecord {
        state,
        current_pos: Vector2::new(rel.0 * 16.0, rel.1 * 9.0),
        expect_pos: Vector2::new(rel.0 * 16.0, rel.1 * 9.0),
        rel_pos: Vector2::new(rel.0, rel.1),
        ..TrackRecord::new(id)
    }
}

fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}

#[test]
fn test_tracklink_over_udp() {
    let settings = TracklinkSettings {
        udp_address: "127.0.0.1".to_string(),
        udp_port: 0,
        ..Default::default()
    };
    let mut handler = TracklinkReceiveHandler::new(settings);
    handler.start().expect("Failed to start Tracklink receiver");
    let target = loopback(handler.local_addr().expect("Receiver not bound"));

    let log = shared(EventLog::default());
    handler.register_receiver(log.clone());

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    // Two tracks in one datagram
    let mut first = track(1, TrackState::Added, (0.25, 0.5));
    first.echoes = vec![Vector2::new(0.24, 0.5), Vector2::new(0.26, 0.5)];
    let datagram = encode_frames(&[first.clone(), track(2, TrackState::Added, (0.75, 0.5))]);
    sender.send_to(&datagram, target).unwrap();
    tick_until(&log, 2, || {
        handler.update().unwrap();
    });

    // Then an update and a removal in separate datagrams
    let datagram = encode_frames(&[track(1, TrackState::Updated, (0.3, 0.5))]);
    sender.send_to(&datagram, target).unwrap();
    let datagram = encode_frames(&[track(2, TrackState::Removed, (0.75, 0.5))]);
    sender.send_to(&datagram, target).unwrap();
    tick_until(&log, 4, || {
        handler.update().unwrap();
    });

    {
        let log = log.lock().unwrap();
        assert_eq!(log.events, vec![("new", 1), ("new", 2), ("update", 1), ("lost", 2)]);
    }
    assert_eq!(handler.registry().track_ids(), vec![1]);

    // Teardown reports the remaining track
    handler.shutdown();
    let log = log.lock().unwrap();
    assert_eq!(log.events.last(), Some(&("lost", 1)));
    assert_eq!(log.last.as_ref().map(|t| t.state), Some(TrackState::Removed));
}

#[test]
fn test_tracklink_garbage_does_not_stop_receiver() {
    let settings = TracklinkSettings {
        udp_port: 0,
        ..Default::default()
    };
    let mut handler = TracklinkReceiveHandler::new(settings);
    handler.start().unwrap();
    let target = loopback(handler.local_addr().unwrap());

    let log = shared(EventLog::default());
    handler.register_receiver(log.clone());

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b"not tracklink", target).unwrap();
    let datagram = encode_frames(&[track(7, TrackState::Added, (0.5, 0.5))]);
    sender.send_to(&datagram, target).unwrap();

    tick_until(&log, 1, || {
        handler.update().unwrap();
    });

    assert_eq!(log.lock().unwrap().events, vec![("new", 7)]);
    assert_eq!(handler.framing_errors(), 1);
}

fn tuio_frame(fseq: i32, cursors: &[(i32, f32, f32)], echoes: &[(i32, i32, f32, f32)]) -> Vec<u8> {
    let text = |s: &str| OscType::String(s.to_string());
    let mut content = Vec::new();

    let mut alive = vec![text("alive")];
    alive.extend(cursors.iter().map(|c| OscType::Int(c.0)));
    content.push(OscPacket::Message(OscMessage::new("/tuio/2Dcur", alive)));
    for &(session, x, y) in cursors {
        content.push(OscPacket::Message(OscMessage::new(
            "/tuio/2Dcur",
            vec![
                text("set"),
                OscType::Int(session),
                OscType::Float(x),
                OscType::Float(y),
                OscType::Float(0.1),
                OscType::Float(0.0),
                OscType::Float(0.0),
            ],
        )));
    }
    content.push(OscPacket::Message(OscMessage::new(
        "/tuio/2Dcur",
        vec![text("fseq"), OscType::Int(fseq)],
    )));

    let mut alive = vec![text("alive")];
    alive.extend(echoes.iter().map(|e| OscType::Int(e.0)));
    content.push(OscPacket::Message(OscMessage::new("/tuio/2Dobj", alive)));
    for &(session, symbol, x, y) in echoes {
        let mut args = vec![
            text("set"),
            OscType::Int(session),
            OscType::Int(symbol),
            OscType::Float(x),
            OscType::Float(y),
        ];
        args.extend((0..6).map(|_| OscType::Float(0.0)));
        content.push(OscPacket::Message(OscMessage::new("/tuio/2Dobj", args)));
    }
    content.push(OscPacket::Message(OscMessage::new(
        "/tuio/2Dobj",
        vec![text("fseq"), OscType::Int(fseq)],
    )));

    let packet = OscPacket::Bundle(OscBundle {
        timetag: OscTime::IMMEDIATE,
        content,
    });
    osc::encode_packet(&packet).unwrap()
}

#[test]
fn test_tuio_over_udp() {
    let settings = TuioSettings {
        udp_port: 0,
        ..Default::default()
    };
    let mut handler = TuioReceiveHandler::new(settings);
    handler.start();
    assert!(handler.is_connected());
    let target = loopback(
        handler
            .listener()
            .and_then(|l| l.local_addr())
            .expect("TUIO listener not bound"),
    );

    let log = shared(EventLog::default());
    handler.register_receiver(log.clone());
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    // Cursor session 40 gets cursor ID 0; its echo carries symbol ID 0
    sender.send_to(&tuio_frame(1, &[(40, 0.5, 0.5)], &[]), target).unwrap();
    tick_until(&log, 1, || {
        handler.update(0.016);
    });

    sender
        .send_to(&tuio_frame(2, &[(40, 0.6, 0.5)], &[(80, 0, 0.59, 0.5)]), target)
        .unwrap();
    tick_until(&log, 2, || {
        handler.update(0.016);
    });

    sender.send_to(&tuio_frame(3, &[], &[]), target).unwrap();
    tick_until(&log, 3, || {
        handler.update(0.016);
    });

    let log = log.lock().unwrap();
    assert_eq!(log.events, vec![("new", 0), ("update", 0), ("lost", 0)]);
    assert!(handler.registry().is_empty());
    drop(log);

    handler.shutdown();
    assert!(!handler.is_connected());
}

#[test]
fn test_tuio_port_in_use_is_inert() {
    let taken = UdpSocket::bind("0.0.0.0:0").unwrap();
    let settings = TuioSettings {
        udp_port: taken.local_addr().unwrap().port(),
        ..Default::default()
    };

    let mut handler = TuioReceiveHandler::new(settings);
    handler.start();
    assert!(!handler.is_connected());
    assert_eq!(handler.update(0.016), 0);
}
