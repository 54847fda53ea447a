use clap::{Parser, ValueEnum};
use lasertrack::{
    load_or_default, save_settings, shared, EntitySpawner, SharedReceiver, TrackingEntityManager,
    TrackingSettings, TracklinkReceiveHandler, TracklinkSettings, TuioReceiveHandler,
    TuioSettings, TRACKLINK_CONFIG_FILE, TUIO_CONFIG_FILE,
};
use nalgebra::Vector2;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Source {
    Tracklink,
    Tuio,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Listen on a tracking source and log track lifecycle events"
)]
struct Args {
    /// Tracking source to listen on
    #[arg(short, long, value_enum, default_value = "tracklink")]
    source: Source,

    /// Directory containing the DeepSpaceConfig settings files
    #[arg(short, long, default_value = ".")]
    config_dir: PathBuf,

    /// Write the effective settings back to the config file before starting
    #[arg(long)]
    save_config: bool,

    /// Tick interval in milliseconds
    #[arg(short, long, default_value = "16")]
    tick_ms: u64,

    /// Stop after this many seconds (runs until killed if omitted)
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Stands in for a rendered visual by logging where it would be drawn
struct LogSpawner;

impl EntitySpawner for LogSpawner {
    type Visual = Vector2<f32>;

    fn spawn(&mut self, track_id: i32, screen_pos: Vector2<f32>) -> Self::Visual {
        info!(
            "Track {} appeared at ({:.1}, {:.1})",
            track_id, screen_pos.x, screen_pos.y
        );
        screen_pos
    }

    fn reposition(&mut self, visual: &mut Self::Visual, screen_pos: Vector2<f32>) {
        *visual = screen_pos;
    }

    fn despawn(&mut self, visual: Self::Visual) {
        info!("Track lost at ({:.1}, {:.1})", visual.x, visual.y);
    }
}

enum Monitor {
    Tracklink(TracklinkReceiveHandler),
    Tuio(TuioReceiveHandler),
}

impl Monitor {
    fn tracking_settings(&self) -> TrackingSettings {
        match self {
            Monitor::Tracklink(h) => *h.tracking_settings(),
            Monitor::Tuio(h) => *h.tracking_settings(),
        }
    }

    fn register_receiver(&mut self, receiver: SharedReceiver) {
        match self {
            Monitor::Tracklink(h) => h.register_receiver(receiver),
            Monitor::Tuio(h) => h.register_receiver(receiver),
        }
    }

    fn tick(&mut self, delta_time: f32) {
        match self {
            Monitor::Tracklink(h) => {
                if let Err(e) = h.update() {
                    warn!("Tracklink receive failed: {}", e);
                }
            }
            Monitor::Tuio(h) => {
                h.update(delta_time);
            }
        }
    }

    fn live_tracks(&self) -> usize {
        match self {
            Monitor::Tracklink(h) => h.registry().len(),
            Monitor::Tuio(h) => h.registry().len(),
        }
    }

    fn shutdown(&mut self) {
        match self {
            Monitor::Tracklink(h) => h.shutdown(),
            Monitor::Tuio(h) => h.shutdown(),
        }
    }
}

fn open_source(args: &Args) -> Result<Monitor, Box<dyn std::error::Error>> {
    match args.source {
        Source::Tracklink => {
            let path = args.config_dir.join(TRACKLINK_CONFIG_FILE);
            let settings: TracklinkSettings = load_or_default(&path)?;
            if args.save_config {
                save_settings(&settings, &path)?;
            }
            let mut handler = TracklinkReceiveHandler::new(settings);
            handler.start()?;
            Ok(Monitor::Tracklink(handler))
        }
        Source::Tuio => {
            let path = args.config_dir.join(TUIO_CONFIG_FILE);
            let settings: TuioSettings = load_or_default(&path)?;
            if args.save_config {
                save_settings(&settings, &path)?;
            }
            let mut handler = TuioReceiveHandler::new(settings);
            handler.start();
            if !handler.is_connected() {
                warn!("TUIO source is inert; no tracks will be reported");
            }
            Ok(Monitor::Tuio(handler))
        }
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

    let mut monitor = open_source(&args)?;

    let entities = shared(TrackingEntityManager::new(
        LogSpawner,
        monitor.tracking_settings(),
    ));
    monitor.register_receiver(entities.clone());

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    info!("Monitoring {:?} source, tick {:?}", args.source, tick);

    let mut last_tick = Instant::now();
    let mut last_report = Instant::now();
    while deadline.map_or(true, |d| Instant::now() < d) {
        let now = Instant::now();
        monitor.tick(now.duration_since(last_tick).as_secs_f32());
        last_tick = now;

        if last_report.elapsed() >= Duration::from_secs(5) {
            let visible = entities.lock().map(|e| e.len()).unwrap_or(0);
            debug!(
                "{} live tracks, {} visible entities",
                monitor.live_tracks(),
                visible
            );
            last_report = Instant::now();
        }

        thread::sleep(tick);
    }

    monitor.shutdown();
    Ok(())
}
