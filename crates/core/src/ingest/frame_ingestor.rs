use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::control_error::ControlError;
use crate::session::session_controller::SessionController;
use crate::shared::captured_frame::CapturedFrame;
use crate::shared::frame::Frame;

const JPEG_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid frame encoding: {0}")]
    InvalidEncoding(String),
    #[error("frame is not a decodable image: {0}")]
    InvalidImage(String),
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// JSON text payload sent by clients: either a frame or a command.
#[derive(Debug, Deserialize)]
struct TextEnvelope {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    image_data: Option<String>,
    #[serde(default)]
    captured_at: Option<u64>,
}

/// What the ingestor tells the client after one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestReply {
    Frame { accepted: bool },
    Pong,
}

/// Validates incoming frame envelopes and hands them to the controller.
///
/// Every frame that reaches a session is a well-formed JPEG, so artifacts
/// stay a uniform MJPEG stream whatever the client sends.
pub struct FrameIngestor {
    controller: Arc<SessionController>,
}

impl FrameIngestor {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }

    /// Handles a binary message: raw encoded image bytes.
    pub fn ingest_binary(
        &self,
        session: &str,
        bytes: Vec<u8>,
        captured_at_ms: u64,
    ) -> Result<IngestReply, IngestError> {
        let jpeg = normalize_image(bytes)?;
        let accepted = self
            .controller
            .submit_frame(session, CapturedFrame::new(jpeg, captured_at_ms))?;
        Ok(IngestReply::Frame { accepted })
    }

    /// Handles a text message: `{"image_data": "...", "captured_at": ms}` or
    /// `{"command": "ping"}`.
    pub fn ingest_text(&self, session: &str, text: &str) -> Result<IngestReply, IngestError> {
        let envelope: TextEnvelope =
            serde_json::from_str(text).map_err(|e| IngestError::InvalidEncoding(e.to_string()))?;

        if let Some(command) = envelope.command.as_deref() {
            return match command {
                "ping" => Ok(IngestReply::Pong),
                other => Err(IngestError::InvalidEncoding(format!(
                    "unknown command {other:?}"
                ))),
            };
        }

        let data = envelope
            .image_data
            .ok_or_else(|| IngestError::InvalidEncoding("missing image_data".into()))?;
        let bytes = decode_image_data(&data)?;
        self.ingest_binary(session, bytes, envelope.captured_at.unwrap_or_default())
    }
}

/// Decodes base64 image data, accepting a `data:image/...;base64,` prefix.
pub fn decode_image_data(data: &str) -> Result<Vec<u8>, IngestError> {
    let payload = match data.split_once(',') {
        Some((_, payload)) => payload,
        None => data,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| IngestError::InvalidEncoding(e.to_string()))
}

/// Checks that `bytes` is a decodable image and returns it as JPEG.
///
/// JPEG input is passed through untouched; other formats are transcoded.
pub fn normalize_image(bytes: Vec<u8>) -> Result<Vec<u8>, IngestError> {
    let format =
        image::guess_format(&bytes).map_err(|e| IngestError::InvalidImage(e.to_string()))?;
    let frame = Frame::decode(&bytes, 0).map_err(|e| IngestError::InvalidImage(e.to_string()))?;
    if format == ImageFormat::Jpeg {
        return Ok(bytes);
    }

    let rgb = image::RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
        .ok_or_else(|| IngestError::InvalidImage("pixel buffer size mismatch".into()))?;
    let mut out = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
        .map_err(|e| IngestError::InvalidImage(e.to_string()))?;
    log::debug!("Transcoded {format:?} frame to JPEG");
    Ok(out.into_inner())
}
