use chrono::{DateTime, Utc};
use serde::Serialize;

/// One finished recording as seen by the catalog. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl RecordingEntry {
    /// Duration of `frames` played back at the nominal frame rate.
    pub fn duration_for(frames: u64, fps: f64) -> f64 {
        if fps > 0.0 {
            frames as f64 / fps
        } else {
            0.0
        }
    }
}
