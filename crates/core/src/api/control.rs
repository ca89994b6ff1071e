use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::domain::detection_error::DetectionError;
use crate::detection::domain::face_detector::Detection;
use crate::detection::infrastructure::on_demand_detector::OnDemandDetector;
use crate::ingest::frame_ingestor::{
    decode_image_data, normalize_image, FrameIngestor, IngestError, IngestReply,
};
use crate::recording::domain::recording_entry::RecordingEntry;
use crate::recording::recording_catalog::{CatalogError, RecordingCatalog};
use crate::session::control_error::ControlError;
use crate::session::session_controller::SessionController;
use crate::session::session_core::SessionStatus;
use crate::shared::captured_frame::CapturedFrame;
use crate::status::status_publisher::StatusSubscription;

/// One control call, as a JSON object tagged by `op`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ControlRequest {
    Start {
        session: String,
    },
    Stop {
        session: String,
    },
    Status {
        session: String,
    },
    ForceStart {
        session: String,
    },
    ForceStop {
        session: String,
    },
    SubmitFrame {
        session: String,
        #[serde(alias = "image_data")]
        image_data: String,
        #[serde(default, alias = "captured_at")]
        captured_at: Option<u64>,
    },
    /// A raw client text message for a session: a frame envelope or a
    /// command such as `{"command": "ping"}`.
    ClientMessage {
        session: String,
        text: String,
    },
    /// One-off face check, not tied to any session.
    Detect {
        #[serde(alias = "image_data")]
        image_data: String,
    },
    Health,
    Ping,
    ListRecordings,
    /// Base64 MJPEG stream to store as a finished recording.
    UploadRecording {
        data: String,
    },
    GetRecording {
        filename: String,
    },
    DeleteRecording {
        filename: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InvalidRequest,
    Storage,
    DetectionFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ControlResponse {
    Session {
        session: String,
        #[serde(flatten)]
        status: SessionStatus,
    },
    Frame {
        session: String,
        accepted: bool,
    },
    Recordings {
        recordings: Vec<RecordingEntry>,
        total_count: usize,
        total_size_bytes: u64,
        total_size: String,
    },
    Recording {
        filename: String,
        size_bytes: u64,
        /// Base64 of the artifact bytes.
        data: String,
    },
    Deleted {
        filename: String,
    },
    Uploaded {
        #[serde(flatten)]
        entry: RecordingEntry,
    },
    Detection {
        #[serde(flatten)]
        detection: Detection,
        timestamp: DateTime<Utc>,
    },
    Health {
        status: String,
        detector_loaded: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        detector_error: Option<String>,
        active_sessions: usize,
        timestamp: DateTime<Utc>,
    },
    Pong,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ControlResponse {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ControlResponse::Error {
            kind,
            message: message.into(),
        }
    }
}

impl From<ControlError> for ControlResponse {
    fn from(err: ControlError) -> Self {
        let kind = match err {
            ControlError::InvalidState(_) => ErrorKind::InvalidState,
            ControlError::Storage(_) => ErrorKind::Storage,
        };
        ControlResponse::error(kind, err.to_string())
    }
}

impl From<CatalogError> for ControlResponse {
    fn from(err: CatalogError) -> Self {
        let kind = match err {
            CatalogError::NotFound(_) => ErrorKind::NotFound,
            CatalogError::InvalidArtifact(_) => ErrorKind::InvalidRequest,
            CatalogError::Storage(_) => ErrorKind::Storage,
        };
        ControlResponse::error(kind, err.to_string())
    }
}

impl From<DetectionError> for ControlResponse {
    fn from(err: DetectionError) -> Self {
        ControlResponse::error(ErrorKind::DetectionFailed, err.to_string())
    }
}

impl From<IngestError> for ControlResponse {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Control(inner) => inner.into(),
            other => ControlResponse::error(ErrorKind::InvalidRequest, other.to_string()),
        }
    }
}

/// Request/response face of the recorder: session control, frame intake,
/// single-shot detection and catalog access behind one `handle` call.
pub struct ControlService {
    controller: Arc<SessionController>,
    catalog: Arc<RecordingCatalog>,
    ingestor: FrameIngestor,
    detector: OnDemandDetector,
}

impl ControlService {
    pub fn new(controller: Arc<SessionController>, catalog: Arc<RecordingCatalog>) -> Self {
        let ingestor = FrameIngestor::new(controller.clone());
        let detector =
            OnDemandDetector::new(controller.detector_factory(), controller.detection_timeout());
        Self {
            controller,
            catalog,
            ingestor,
            detector,
        }
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn ingestor(&self) -> &FrameIngestor {
        &self.ingestor
    }

    pub fn detector(&self) -> &OnDemandDetector {
        &self.detector
    }

    /// Push channel of status events, independent of request/response calls.
    pub fn subscribe(&self) -> StatusSubscription {
        self.controller.subscribe()
    }

    /// Parses and handles one JSON request. Malformed input yields an
    /// `invalid_request` error response rather than an `Err`.
    pub fn handle_json(&self, line: &str) -> ControlResponse {
        match serde_json::from_str::<ControlRequest>(line) {
            Ok(request) => self.handle(request),
            Err(e) => ControlResponse::error(ErrorKind::InvalidRequest, e.to_string()),
        }
    }

    pub fn handle(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Start { session } => {
                let status = self.controller.start(&session);
                ControlResponse::Session { session, status }
            }
            ControlRequest::Stop { session } => {
                let status = self.controller.stop(&session);
                ControlResponse::Session { session, status }
            }
            ControlRequest::Status { session } => {
                let status = self.controller.status(&session);
                ControlResponse::Session { session, status }
            }
            ControlRequest::ForceStart { session } => match self.controller.force_start(&session) {
                Ok(status) => ControlResponse::Session { session, status },
                Err(e) => e.into(),
            },
            ControlRequest::ForceStop { session } => {
                let status = self.controller.force_stop(&session);
                ControlResponse::Session { session, status }
            }
            ControlRequest::SubmitFrame {
                session,
                image_data,
                captured_at,
            } => self.submit_frame(session, &image_data, captured_at.unwrap_or_default()),
            ControlRequest::ClientMessage { session, text } => {
                match self.ingestor.ingest_text(&session, &text) {
                    Ok(IngestReply::Frame { accepted }) => {
                        ControlResponse::Frame { session, accepted }
                    }
                    Ok(IngestReply::Pong) => ControlResponse::Pong,
                    Err(e) => e.into(),
                }
            }
            ControlRequest::Detect { image_data } => self.detect(&image_data),
            ControlRequest::Health => {
                let health = self.detector.health();
                ControlResponse::Health {
                    status: "healthy".into(),
                    detector_loaded: health.loaded,
                    detector_error: health.error,
                    active_sessions: self.controller.session_keys().len(),
                    timestamp: Utc::now(),
                }
            }
            ControlRequest::Ping => ControlResponse::Pong,
            ControlRequest::ListRecordings => match self.catalog.list() {
                Ok(listing) => ControlResponse::Recordings {
                    total_count: listing.total_count(),
                    total_size_bytes: listing.total_size_bytes,
                    total_size: listing.total_size_human(),
                    recordings: listing.entries,
                },
                Err(e) => e.into(),
            },
            ControlRequest::GetRecording { filename } => match self.catalog.get(&filename) {
                Ok(bytes) => ControlResponse::Recording {
                    size_bytes: bytes.len() as u64,
                    data: STANDARD.encode(&bytes),
                    filename,
                },
                Err(e) => e.into(),
            },
            ControlRequest::DeleteRecording { filename } => match self.catalog.delete(&filename) {
                Ok(()) => ControlResponse::Deleted { filename },
                Err(e) => e.into(),
            },
            ControlRequest::UploadRecording { data } => self.upload(&data),
        }
    }

    fn detect(&self, image_data: &str) -> ControlResponse {
        let frame = match decode_image_data(image_data).and_then(normalize_image) {
            Ok(jpeg) => CapturedFrame::new(jpeg, 0),
            Err(e) => return e.into(),
        };
        match self.detector.detect(&frame) {
            Ok(detection) => ControlResponse::Detection {
                detection,
                timestamp: Utc::now(),
            },
            Err(e) => e.into(),
        }
    }

    fn upload(&self, data: &str) -> ControlResponse {
        let bytes = match decode_image_data(data) {
            Ok(bytes) => bytes,
            Err(e) => return e.into(),
        };
        match self.catalog.import(self.controller.namer(), &bytes) {
            Ok(entry) => ControlResponse::Uploaded { entry },
            Err(e) => e.into(),
        }
    }

    fn submit_frame(&self, session: String, image_data: &str, captured_at: u64) -> ControlResponse {
        let result = decode_image_data(image_data)
            .and_then(|bytes| self.ingestor.ingest_binary(&session, bytes, captured_at));
        match result {
            Ok(IngestReply::Frame { accepted }) => ControlResponse::Frame { session, accepted },
            Ok(IngestReply::Pong) => ControlResponse::Pong,
            Err(e) => e.into(),
        }
    }
}
