use std::time::Duration;

/// Nominal camera frame rate; browser clients stream at roughly 15 fps.
pub const DEFAULT_FPS: f64 = 15.0;

/// How long a face must be absent before an automatic recording stops.
pub const DEFAULT_NO_FACE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-session frame queue; small so queued frames stay close to real time.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(1000);

pub const DEFAULT_DETECTION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Events buffered per status subscriber before it is considered too slow.
pub const DEFAULT_STATUS_BUFFER: usize = 64;

pub const DEFAULT_MIN_FREE_SPACE_BYTES: u64 = 64 * 1024 * 1024;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

pub const RECORDING_PREFIX: &str = "recording_";
pub const RECORDING_EXTENSION: &str = "mjpeg";
pub const PARTIAL_EXTENSION: &str = "part";

pub const BLAZEFACE_MODEL_NAME: &str = "blazeface_short_range.onnx";

pub const APP_DIR_NAME: &str = "FaceWatch";
