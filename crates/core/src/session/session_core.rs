use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detection::domain::detection_error::DetectionError;
use crate::detection::domain::face_detector::Detection;
use crate::recording::domain::artifact_sink::ArtifactStore;
use crate::recording::domain::storage_error::StorageError;
use crate::recording::recording_namer::RecordingNamer;
use crate::recording::recording_writer::RecordingWriter;
use crate::session::session_config::SessionConfig;
use crate::session::session_state::SessionState;
use crate::session::session_stats::{SessionStats, StatsSnapshot};
use crate::shared::captured_frame::CapturedFrame;
use crate::shared::size_format::clock_duration;
use crate::status::status_event::{StatusEvent, Transition};

const DETECTION_WARN_EVERY: u64 = 100;

/// Result of feeding one classified frame through the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub state: SessionState,
    pub detection: Detection,
    pub frame_seq: u64,
    /// Client capture time, `None` when the client did not send one.
    pub captured_at: Option<u64>,
    pub transitions: Vec<Transition>,
}

/// Externally visible session status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub face_detected: bool,
    pub face_count: u32,
    /// Peak simultaneous face count seen this session.
    pub faces_detected: u32,
    pub session_duration_seconds: f64,
    pub session_duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<String>,
    pub forced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub stats: Option<StatsSnapshot>,
}

impl SessionStatus {
    /// Status reported for a key with no live session.
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            face_detected: false,
            face_count: 0,
            faces_detected: 0,
            session_duration_seconds: 0.0,
            session_duration: clock_duration(0),
            recording: None,
            forced: false,
            started_at: None,
            stats: None,
        }
    }
}

/// Hysteresis state machine for one monitoring session.
///
/// Holds no locks and spawns nothing: the caller serializes access. The
/// writer is present iff the state is `Recording`.
pub struct Session {
    key: String,
    config: SessionConfig,
    threshold: u32,
    store: Arc<dyn ArtifactStore>,
    namer: Arc<RecordingNamer>,
    state: SessionState,
    no_face_frames: u32,
    writer: Option<RecordingWriter>,
    forced: bool,
    last_detection: Detection,
    peak_faces: u32,
    started_at: DateTime<Utc>,
    started: Instant,
    last_frame_at: Instant,
    next_seq: u64,
    stats: SessionStats,
    pending: Vec<Transition>,
}

impl Session {
    pub fn new(
        key: impl Into<String>,
        config: SessionConfig,
        store: Arc<dyn ArtifactStore>,
        namer: Arc<RecordingNamer>,
    ) -> Self {
        let key = key.into();
        let now = Instant::now();
        let threshold = config.stop_threshold();
        log::info!("Session {key} started (stop after {threshold} no-face frames)");
        Self {
            key,
            config,
            threshold,
            store,
            namer,
            state: SessionState::Watching,
            no_face_frames: 0,
            writer: None,
            forced: false,
            last_detection: Detection::none(),
            peak_faces: 0,
            started_at: Utc::now(),
            started: now,
            last_frame_at: now,
            next_seq: 0,
            stats: SessionStats::new(),
            pending: vec![Transition::SessionStarted],
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn consecutive_no_face_frames(&self) -> u32 {
        self.no_face_frames
    }

    pub fn recording_filename(&self) -> Option<&str> {
        self.writer.as_ref().map(|w| w.filename())
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn is_stopped(&self) -> bool {
        self.state == SessionState::Idle
    }

    pub fn last_frame_at(&self) -> Instant {
        self.last_frame_at
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Registers an incoming frame and hands out its sequence number.
    pub fn accept_frame(&mut self) -> u64 {
        self.last_frame_at = Instant::now();
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn record_drop(&mut self, seq: u64) {
        let dropped = self.stats.record_drop();
        log::debug!(
            "Session {}: dropped frame {seq} ({dropped} dropped so far)",
            self.key
        );
    }

    /// Applies one classified frame. A detection error counts as "no face".
    pub fn apply(
        &mut self,
        frame: &CapturedFrame,
        frame_seq: u64,
        result: Result<Detection, DetectionError>,
        latency: Duration,
    ) -> FrameOutcome {
        let detection = match result {
            Ok(detection) => {
                self.stats.record_detection(latency);
                detection
            }
            Err(e) => {
                let errors = self.stats.record_detection_error();
                if errors == 1 || errors % DETECTION_WARN_EVERY == 0 {
                    log::warn!(
                        "Session {}: detection failed on frame {frame_seq} ({errors} so far): {e}",
                        self.key
                    );
                }
                Detection::none()
            }
        };
        self.last_detection = detection;
        self.peak_faces = self.peak_faces.max(detection.face_count);

        match self.state {
            SessionState::Idle => {}
            SessionState::Watching => {
                if detection.face_detected && self.open_recording(false).is_ok() {
                    self.append(frame);
                }
            }
            SessionState::Recording => {
                self.append(frame);
                if self.state == SessionState::Recording {
                    self.update_hysteresis(detection.face_detected);
                }
            }
        }

        FrameOutcome {
            state: self.state,
            detection,
            frame_seq,
            captured_at: Some(frame.captured_at_ms()).filter(|&ms| ms > 0),
            transitions: self.take_transitions(),
        }
    }

    /// Opens a recording that ignores the no-face timeout, or pins the
    /// current automatic one.
    pub fn force_start(&mut self) -> Result<(), StorageError> {
        match self.state {
            SessionState::Recording => {
                if !self.forced {
                    log::info!("Session {}: current recording pinned", self.key);
                }
                self.forced = true;
                Ok(())
            }
            SessionState::Watching => self.open_recording(true),
            SessionState::Idle => Ok(()),
        }
    }

    /// Closes whatever recording is open and goes back to watching.
    pub fn force_stop(&mut self) {
        if self.state == SessionState::Recording {
            self.finish_recording();
            self.state = SessionState::Watching;
        }
    }

    /// Finalizes any open recording and ends the session.
    pub fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.finish_recording();
        self.state = SessionState::Idle;
        self.pending.push(Transition::SessionStopped);
        log::info!("\n\n{}", self.stats.summary_string(&self.key));
    }

    pub fn take_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.pending)
    }

    pub fn status(&self) -> SessionStatus {
        let elapsed = self.started.elapsed().as_secs_f64();
        SessionStatus {
            state: self.state,
            face_detected: self.last_detection.face_detected,
            face_count: self.last_detection.face_count,
            faces_detected: self.peak_faces,
            session_duration_seconds: elapsed,
            session_duration: clock_duration(elapsed as u64),
            recording: self.recording_filename().map(str::to_owned),
            forced: self.forced,
            started_at: Some(self.started_at),
            stats: Some(self.stats.snapshot()),
        }
    }

    /// Status event for a control action (start, stop, forced recording).
    pub fn event(&self, transitions: Vec<Transition>) -> StatusEvent {
        self.build_event(None, None, transitions)
    }

    /// Status event for one processed frame.
    pub fn frame_event(&self, outcome: FrameOutcome) -> StatusEvent {
        self.build_event(
            Some(outcome.frame_seq),
            outcome.captured_at,
            outcome.transitions,
        )
    }

    fn build_event(
        &self,
        frame_seq: Option<u64>,
        captured_at: Option<u64>,
        transitions: Vec<Transition>,
    ) -> StatusEvent {
        StatusEvent {
            session: self.key.clone(),
            state: self.state,
            face_detected: self.last_detection.face_detected,
            face_count: self.last_detection.face_count,
            frame_seq,
            captured_at,
            transitions,
            timestamp: Utc::now(),
        }
    }

    fn update_hysteresis(&mut self, face_detected: bool) {
        if face_detected {
            self.no_face_frames = 0;
            return;
        }
        self.no_face_frames += 1;
        if self.no_face_frames >= self.threshold && !self.forced {
            log::info!(
                "Session {}: no face for {} frames, stopping recording",
                self.key,
                self.no_face_frames
            );
            self.finish_recording();
            self.state = SessionState::Watching;
        }
    }

    fn open_recording(&mut self, forced: bool) -> Result<(), StorageError> {
        let created_at = Utc::now();
        let filename = self.namer.next_name(created_at);
        match RecordingWriter::open(
            self.store.as_ref(),
            filename.clone(),
            created_at,
            self.config.fps,
        ) {
            Ok(writer) => {
                log::info!(
                    "Session {}: recording {filename}{}",
                    self.key,
                    if forced { " (forced)" } else { "" }
                );
                self.writer = Some(writer);
                self.forced = forced;
                self.no_face_frames = 0;
                self.state = SessionState::Recording;
                self.pending
                    .push(Transition::RecordingStarted { filename, forced });
                Ok(())
            }
            Err(e) => {
                log::error!("Session {}: cannot open {filename}: {e}", self.key);
                self.stats.recording_failed();
                self.pending.push(Transition::RecordingFailed {
                    filename,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn append(&mut self, frame: &CapturedFrame) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.append_frame(frame.bytes()) {
            let filename = writer.filename().to_string();
            log::error!("Session {}: recording {filename} failed: {e}", self.key);
            self.writer = None;
            self.forced = false;
            self.no_face_frames = 0;
            self.state = SessionState::Watching;
            self.stats.recording_failed();
            self.pending.push(Transition::RecordingFailed {
                filename,
                reason: e.to_string(),
            });
        }
    }

    fn finish_recording(&mut self) {
        self.forced = false;
        self.no_face_frames = 0;
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        match writer.finalize() {
            Ok(entry) => {
                log::info!(
                    "Session {}: finished {} ({} frames, {:.1}s)",
                    self.key,
                    entry.filename,
                    writer.frame_count(),
                    entry.duration_seconds
                );
                self.stats.recording_completed();
                self.pending.push(Transition::RecordingFinished { entry });
            }
            Err(StorageError::EmptyRecording(filename)) => {
                log::info!("Session {}: discarded empty recording {filename}", self.key);
            }
            Err(e) => {
                log::error!(
                    "Session {}: finalizing {} failed: {e}",
                    self.key,
                    writer.filename()
                );
                self.stats.recording_failed();
                self.pending.push(Transition::RecordingFailed {
                    filename: writer.filename().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}
