//! Face presence detector backed by a BlazeFace (short-range) ONNX model.
use std::path::Path;

use crate::detection::domain::face_detector::{Detection, FaceDetector};
use crate::shared::captured_frame::CapturedFrame;
use crate::shared::frame::Frame;

/// BlazeFace model input resolution.
const INPUT_SIZE: usize = 128;

/// Number of anchors produced by the short-range model.
const NUM_ANCHORS: usize = 896;

/// Values per anchor in the regressor output (box + 6 keypoints).
const REGRESSOR_STRIDE: usize = 16;

/// Overlapping candidates above this IoU count as the same face.
const NMS_IOU_THRESH: f32 = 0.3;

/// Counts faces in a frame; box geometry is only used to merge duplicates.
pub struct OnnxFaceDetector {
    session: ort::session::Session,
    confidence: f32,
    anchors: Vec<[f32; 2]>,
    frames_seen: u64,
}

impl OnnxFaceDetector {
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = ort::session::Session::builder()?.commit_from_file(model_path)?;
        log::info!("Loaded face model {}", model_path.display());
        Ok(Self {
            session,
            confidence: confidence as f32,
            anchors: generate_anchors(),
            frames_seen: 0,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&mut self, frame: &CapturedFrame) -> Result<Detection, Box<dyn std::error::Error>> {
        let decoded = Frame::decode(frame.bytes(), self.frames_seen)?;
        self.frames_seen += 1;

        let input = ort::value::Tensor::from_array(preprocess(&decoded))?;
        let outputs = self.session.run(ort::inputs![input])?;
        if outputs.len() < 2 {
            return Err(format!("face model expected 2 outputs, got {}", outputs.len()).into());
        }

        let regressors = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let reg_data = regressors.as_slice().ok_or("regressor output is not contiguous")?;
        let score_data = scores.as_slice().ok_or("score output is not contiguous")?;

        let mut candidates = decode_candidates(&self.anchors, reg_data, score_data, self.confidence);
        let faces = suppress_overlaps(&mut candidates);
        let best = faces.iter().map(|c| c.score).fold(0.0f32, f32::max);

        Ok(Detection::faces(faces.len() as u32, best as f64))
    }
}

/// Nearest-neighbour resize to the model input, normalised to [0, 1], NCHW.
fn preprocess(frame: &Frame) -> ndarray::Array4<f32> {
    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        let sy = (((y as f64 + 0.5) * src_h as f64 / INPUT_SIZE as f64) as usize).min(src_h - 1);
        for x in 0..INPUT_SIZE {
            let sx =
                (((x as f64 + 0.5) * src_w as f64 / INPUT_SIZE as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[sy, sx, c]] as f32 / 255.0;
            }
        }
    }
    tensor
}

/// Anchor centres for the 16x16 (2 per cell) and 8x8 (6 per cell) grids.
fn generate_anchors() -> Vec<[f32; 2]> {
    let layers = [(8usize, 2usize), (16, 6)];
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    for (stride, per_cell) in layers {
        let grid = INPUT_SIZE / stride;
        for y in 0..grid {
            for x in 0..grid {
                let centre = [
                    (x as f32 + 0.5) / grid as f32,
                    (y as f32 + 0.5) / grid as f32,
                ];
                anchors.extend(std::iter::repeat(centre).take(per_cell));
            }
        }
    }
    anchors
}

/// A candidate face box in normalised [0, 1] image coordinates.
#[derive(Clone, Debug, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

fn decode_candidates(
    anchors: &[[f32; 2]],
    regressors: &[f32],
    raw_scores: &[f32],
    threshold: f32,
) -> Vec<Candidate> {
    let scale = INPUT_SIZE as f32;
    raw_scores
        .iter()
        .zip(anchors)
        .enumerate()
        .filter_map(|(i, (&raw, anchor))| {
            let score = sigmoid(raw);
            let offset = i * REGRESSOR_STRIDE;
            if score < threshold || offset + 4 > regressors.len() {
                return None;
            }
            let cx = anchor[0] + regressors[offset] / scale;
            let cy = anchor[1] + regressors[offset + 1] / scale;
            let half_w = regressors[offset + 2] / scale / 2.0;
            let half_h = regressors[offset + 3] / scale / 2.0;
            Some(Candidate {
                x1: (cx - half_w).max(0.0),
                y1: (cy - half_h).max(0.0),
                x2: (cx + half_w).min(1.0),
                y2: (cy + half_h).min(1.0),
                score,
            })
        })
        .collect()
}

/// Greedy NMS: highest score first, drop anything overlapping a kept box.
fn suppress_overlaps(candidates: &mut [Candidate]) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for c in candidates.iter() {
        if kept.iter().all(|k| iou(k, c) <= NMS_IOU_THRESH) {
            kept.push(c.clone());
        }
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = w * h;
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    inter / (area_a + area_b - inter)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
