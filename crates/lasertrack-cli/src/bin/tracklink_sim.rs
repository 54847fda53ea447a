use clap::Parser;
use lasertrack::tracklink::encode_frames;
use lasertrack::{TrackRecord, TrackState};
use nalgebra::Vector2;
use std::f32::consts::TAU;
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Synthetic Tracklink sender - walks tracks in circles across the stage"
)]
struct Args {
    /// Receiver address (unicast or multicast group)
    #[arg(short = 'a', long, default_value = "127.0.0.1:44345")]
    target: String,

    /// Number of simultaneous tracks
    #[arg(short, long, default_value = "3")]
    tracks: i32,

    /// Number of frames to send
    #[arg(short = 'n', long, default_value = "300")]
    frames: u32,

    /// Delay between frames in milliseconds
    #[arg(short, long, default_value = "33")]
    delay_ms: u64,

    /// Stage size in centimeters (width, height)
    #[arg(long, num_args = 2, default_values_t = [1600.0, 900.0])]
    stage: Vec<f32>,

    /// Attach two echoes (feet) to every track
    #[arg(short, long)]
    echoes: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Position of track `index` at `frame` on a circle around the stage center
fn simulate(args: &Args, index: i32, frame: u32, dt: f32) -> TrackRecord {
    let stage = Vector2::new(args.stage[0], args.stage[1]);
    let phase = index as f32 / args.tracks.max(1) as f32 * TAU;
    let angular_speed = 0.5;
    let radius = 0.3 + 0.05 * index as f32;

    let rel_at = |t: f32| {
        let angle = phase + angular_speed * t;
        Vector2::new(
            (0.5 + radius * angle.cos() * 0.5).clamp(0.0, 1.0),
            (0.5 + radius * angle.sin() * 0.5).clamp(0.0, 1.0),
        )
    };

    let t = frame as f32 * dt;
    let rel = rel_at(t);
    let next = rel_at(t + dt);
    let pos = rel.component_mul(&stage);
    let expect = next.component_mul(&stage);

    let velocity = (expect - pos) / dt;
    let speed = velocity.norm() / 100.0;
    let orientation = velocity.try_normalize(1.0e-5).unwrap_or_else(Vector2::zeros);

    let state = if frame == 0 {
        TrackState::Added
    } else if frame + 1 == args.frames {
        TrackState::Removed
    } else {
        TrackState::Updated
    };

    let echoes = if args.echoes {
        let side = Vector2::new(-orientation.y, orientation.x) * 0.01;
        vec![rel + side, rel - side]
    } else {
        Vec::new()
    };

    TrackRecord {
        state,
        current_pos: pos,
        expect_pos: expect,
        rel_pos: rel,
        orientation,
        speed,
        echoes,
        ..TrackRecord::new(index)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_multicast_ttl_v4(50)?;

    info!(
        "Sending {} frames of {} tracks to {}",
        args.frames, args.tracks, args.target
    );

    let dt = args.delay_ms as f32 / 1000.0;
    let start = Instant::now();
    let mut bytes_sent = 0;

    for frame in 0..args.frames {
        let tracks: Vec<TrackRecord> = (0..args.tracks)
            .map(|index| simulate(&args, index, frame, dt.max(0.001)))
            .collect();
        let datagram = encode_frames(&tracks);
        bytes_sent += socket.send_to(&datagram, &args.target)?;

        debug!("Frame {}: {} bytes", frame, datagram.len());
        thread::sleep(Duration::from_millis(args.delay_ms));
    }

    let elapsed = start.elapsed();
    info!(
        "Sent {} frames ({} bytes) in {:.2?}",
        args.frames, bytes_sent, elapsed
    );
    Ok(())
}
