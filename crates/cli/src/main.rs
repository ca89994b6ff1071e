use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};

use facewatch_core::api::control::{ControlResponse, ControlService};
use facewatch_core::detection::domain::face_detector::{DetectorFactory, FaceDetector};
use facewatch_core::detection::infrastructure::model_resolver::{self, ModelSource};
use facewatch_core::detection::infrastructure::onnx_face_detector::OnnxFaceDetector;
use facewatch_core::ingest::frame_ingestor::{FrameIngestor, IngestReply};
use facewatch_core::recording::domain::recording_entry::RecordingEntry;
use facewatch_core::recording::recording_catalog::RecordingCatalog;
use facewatch_core::session::liveness_monitor::LivenessMonitor;
use facewatch_core::session::session_controller::SessionController;
use facewatch_core::shared::config::RecorderConfig;
use facewatch_core::shared::constants::BLAZEFACE_MODEL_NAME;
use facewatch_core::shared::size_format::human_size;
use facewatch_core::status::status_event::Transition;
use facewatch_core::status::status_publisher::{
    StatusMessage, StatusPublisher, StatusSubscription,
};

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];
const REPLAY_SESSION: &str = "replay";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Face-triggered recording: watches camera frames and records while a
/// face is in view.
#[derive(Parser)]
#[command(name = "facewatch")]
struct Cli {
    /// Config file (JSON). Defaults to the per-user config when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory recordings are written to. Overrides the config file.
    #[arg(long, global = true)]
    recordings_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve JSON-lines control requests on stdin, replies and status
    /// events on stdout.
    Serve {
        #[command(flatten)]
        detector: DetectorArgs,
    },
    /// Feed a directory of image frames through one session.
    Replay {
        /// Directory of frames, processed in filename order.
        frames_dir: PathBuf,

        #[command(flatten)]
        detector: DetectorArgs,

        /// Submit frames as fast as they are accepted instead of at the
        /// session frame rate.
        #[arg(long)]
        fast: bool,
    },
    /// List stored recordings, newest first.
    List,
    /// Copy a recording out of the store.
    Get {
        filename: String,

        /// Destination file. Defaults to the recording's name in the
        /// current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a recording.
    Delete { filename: String },
}

#[derive(Args)]
struct DetectorArgs {
    /// Face model file. Skips the cache and download.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Download URL used when the model is not cached yet.
    #[arg(long)]
    model_url: Option<String>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Per-frame detection deadline in milliseconds (0 disables it).
    #[arg(long)]
    detection_timeout_ms: Option<u64>,

    /// Nominal frame rate used for the stop threshold and artifact timing.
    #[arg(long)]
    fps: Option<f64>,

    /// Seconds without a face before an automatic recording stops.
    #[arg(long)]
    no_face_timeout: Option<f64>,
}

impl DetectorArgs {
    fn apply(&self, config: &mut RecorderConfig) {
        if let Some(confidence) = self.confidence {
            config.confidence = confidence;
        }
        if let Some(ms) = self.detection_timeout_ms {
            config.detection_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(secs) = self.no_face_timeout {
            config.no_face_timeout_secs = secs;
        }
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = RecorderConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.recordings_dir {
        config.recordings_dir = dir;
    }
    if let Command::Serve { detector } | Command::Replay { detector, .. } = &cli.command {
        detector.apply(&mut config);
        config.validate()?;
    }

    let catalog = Arc::new(RecordingCatalog::open(
        &config.recordings_dir,
        config.fps,
        config.min_free_space_bytes,
    )?);

    match cli.command {
        Command::Serve { detector } => run_serve(&config, &detector, catalog),
        Command::Replay {
            frames_dir,
            detector,
            fast,
        } => run_replay(&config, &detector, catalog, &frames_dir, fast),
        Command::List => run_list(&catalog),
        Command::Get { filename, output } => run_get(&catalog, &filename, output),
        Command::Delete { filename } => {
            catalog.delete(&filename)?;
            log::info!("Deleted {filename}");
            Ok(())
        }
    }
}

fn run_serve(
    config: &RecorderConfig,
    detector: &DetectorArgs,
    catalog: Arc<RecordingCatalog>,
) -> Result<(), Box<dyn std::error::Error>> {
    let controller = build_controller(config, detector, catalog.clone())?;
    let service = ControlService::new(controller.clone(), catalog);
    if let Err(e) = service.detector().warm_up() {
        log::warn!("Single-shot detection unavailable until the model loads: {e}");
    }
    let monitor = LivenessMonitor::spawn(controller.clone(), config.liveness_check_interval());

    let subscription = service.subscribe();
    let forwarder = thread::spawn(move || {
        for message in subscription {
            let done = matches!(message, StatusMessage::Disconnected { .. });
            if let Err(e) = write_line(&message) {
                log::warn!("Status forwarding stopped: {e}");
                break;
            }
            if done {
                break;
            }
        }
    });

    log::info!("Serving control requests on stdin");
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = service.handle_json(&line);
        if let ControlResponse::Error { message, .. } = &response {
            log::debug!("Request failed: {message}");
        }
        write_line(&response)?;
    }

    log::info!("Input closed, shutting down");
    monitor.stop();
    controller.shutdown();
    if forwarder.join().is_err() {
        log::error!("Status forwarder panicked");
    }
    Ok(())
}

fn run_replay(
    config: &RecorderConfig,
    detector: &DetectorArgs,
    catalog: Arc<RecordingCatalog>,
    frames_dir: &Path,
    fast: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let frames = list_frames(frames_dir)?;
    if frames.is_empty() {
        return Err(format!("No image frames found in {}", frames_dir.display()).into());
    }

    let controller = build_controller(config, detector, catalog)?;
    let mut subscription = controller.subscribe();
    let ingestor = FrameIngestor::new(controller.clone());
    let interval = config.frame_interval();
    let total = frames.len();

    controller.start(REPLAY_SESSION);
    let mut finished = Vec::new();
    let mut accepted = 0u64;
    for (index, path) in frames.iter().enumerate() {
        let bytes = fs::read(path)?;
        let captured_at_ms = (index as f64 * interval.as_secs_f64() * 1000.0) as u64;
        let tick = Instant::now();
        loop {
            collect_finished(&mut subscription, &mut finished);
            let reply = ingestor.ingest_binary(REPLAY_SESSION, bytes.clone(), captured_at_ms);
            match reply {
                Ok(IngestReply::Frame { accepted: true }) => {
                    accepted += 1;
                    break;
                }
                Ok(_) if fast => thread::sleep(Duration::from_millis(1)),
                Ok(_) => break,
                Err(e) => {
                    log::warn!("Skipping {}: {e}", path.display());
                    break;
                }
            }
        }
        eprint!("\rReplaying frame {}/{total}", index + 1);
        if !fast {
            thread::sleep(interval.saturating_sub(tick.elapsed()));
        }
    }
    eprintln!();

    wait_for_drain(&controller, accepted, &mut subscription, &mut finished);
    let status = controller.stop(REPLAY_SESSION);
    controller.shutdown();
    collect_finished(&mut subscription, &mut finished);

    if let Some(stats) = status.stats {
        log::info!(
            "Replay done: {} processed, {} dropped, {} detection errors",
            stats.frames_processed,
            stats.frames_dropped,
            stats.detection_errors
        );
    }
    for entry in &finished {
        println!("{}", serde_json::to_string(entry)?);
    }
    log::info!("{} recording(s) written", finished.len());
    Ok(())
}

fn run_list(catalog: &RecordingCatalog) -> Result<(), Box<dyn std::error::Error>> {
    let listing = catalog.list()?;
    for entry in &listing.entries {
        println!(
            "{}  {}  {:.1}s  {}",
            entry.filename,
            human_size(entry.size_bytes),
            entry.duration_seconds,
            entry.created_at
        );
    }
    println!(
        "{} recording(s), {}",
        listing.total_count(),
        listing.total_size_human()
    );
    Ok(())
}

fn run_get(
    catalog: &RecordingCatalog,
    filename: &str,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = catalog.get(filename)?;
    let output = output.unwrap_or_else(|| PathBuf::from(filename));
    fs::write(&output, &bytes)?;
    log::info!("Wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

fn build_controller(
    config: &RecorderConfig,
    detector: &DetectorArgs,
    catalog: Arc<RecordingCatalog>,
) -> Result<Arc<SessionController>, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {BLAZEFACE_MODEL_NAME}");
    let source = ModelSource {
        explicit: detector.model.as_deref(),
        name: BLAZEFACE_MODEL_NAME,
        url: detector.model_url.as_deref(),
    };
    let model_path = model_resolver::resolve(&source, Some(Box::new(download_progress)))?;

    let confidence = config.confidence;
    let factory: Arc<dyn DetectorFactory> = Arc::new(
        move || -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>> {
            Ok(Box::new(OnnxFaceDetector::new(&model_path, confidence)?))
        },
    );
    let controller = SessionController::new(
        config.session_config(),
        factory,
        catalog,
        Arc::new(StatusPublisher::new(config.status_buffer)),
    )
    .with_detection_timeout(config.detection_timeout());
    Ok(Arc::new(controller))
}

fn list_frames(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_frame(path))
        .collect();
    frames.sort();
    Ok(frames)
}

fn is_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Pulls finished recordings out of pending status events without blocking.
fn collect_finished(subscription: &mut StatusSubscription, finished: &mut Vec<RecordingEntry>) {
    while let Some(message) = subscription.try_next() {
        let event = match message {
            StatusMessage::Status(event) => event,
            StatusMessage::Disconnected { reason } => {
                log::debug!("Status stream ended: {reason:?}");
                return;
            }
        };
        for transition in event.transitions {
            if let Transition::RecordingFinished { entry } = transition {
                finished.push(entry);
            }
        }
    }
}

/// Waits until the worker has taken every accepted frame.
fn wait_for_drain(
    controller: &SessionController,
    accepted: u64,
    subscription: &mut StatusSubscription,
    finished: &mut Vec<RecordingEntry>,
) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    loop {
        collect_finished(subscription, finished);
        let processed = controller
            .status(REPLAY_SESSION)
            .stats
            .map(|s| s.frames_processed)
            .unwrap_or(accepted);
        if processed >= accepted {
            return;
        }
        if Instant::now() >= deadline {
            log::warn!("Gave up waiting for {} queued frame(s)", accepted - processed);
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn write_line<T: serde::Serialize>(value: &T) -> io::Result<()> {
    let json = serde_json::to_string(value).map_err(io::Error::other)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{json}")?;
    out.flush()
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}
