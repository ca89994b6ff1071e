use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::recording::domain::recording_entry::RecordingEntry;
use crate::session::session_state::SessionState;

/// Lifecycle change that happened while handling one request or frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    SessionStarted,
    RecordingStarted { filename: String, forced: bool },
    RecordingFinished { entry: RecordingEntry },
    RecordingFailed { filename: String, reason: String },
    SessionStopped,
}

/// One broadcast status update.
///
/// Frame-driven events carry `frame_seq`; control-driven ones (start, stop,
/// forced recording) do not.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub session: String,
    pub state: SessionState,
    pub face_detected: bool,
    pub face_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_seq: Option<u64>,
    /// Client capture time (ms) of the frame behind this event, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<Transition>,
    pub timestamp: DateTime<Utc>,
}
