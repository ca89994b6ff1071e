use serde::Serialize;

use crate::shared::captured_frame::CapturedFrame;

/// Result of running face detection on one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub face_detected: bool,
    /// Best score among detected faces, 0.0 when none.
    pub confidence: f64,
    pub face_count: u32,
}

impl Detection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn faces(face_count: u32, confidence: f64) -> Self {
        Self {
            face_detected: face_count > 0,
            confidence,
            face_count,
        }
    }
}

/// Domain interface for face presence detection.
///
/// Implementations may be stateful (e.g. hold an inference session),
/// hence `&mut self`. Each session owns its own detector instance.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &CapturedFrame) -> Result<Detection, Box<dyn std::error::Error>>;
}

/// Builds one detector per monitoring session.
pub trait DetectorFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>>;
}

impl<F> DetectorFactory for F
where
    F: Fn() -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFace;

    impl FaceDetector for AlwaysFace {
        fn detect(
            &mut self,
            _frame: &CapturedFrame,
        ) -> Result<Detection, Box<dyn std::error::Error>> {
            Ok(Detection::faces(1, 0.9))
        }
    }

    #[test]
    fn test_faces_sets_detected_flag() {
        assert!(Detection::faces(2, 0.8).face_detected);
        assert!(!Detection::faces(0, 0.0).face_detected);
        assert_eq!(Detection::none(), Detection::faces(0, 0.0));
    }

    #[test]
    fn test_closure_is_a_factory() {
        let factory = || -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>> {
            Ok(Box::new(AlwaysFace))
        };
        let mut detector = factory.create().unwrap();
        let result = detector.detect(&CapturedFrame::new(vec![0u8], 0)).unwrap();
        assert_eq!(result.face_count, 1);
    }

    #[test]
    fn test_detection_json_is_camel_case() {
        let json = serde_json::to_value(Detection::faces(2, 0.5)).unwrap();
        assert_eq!(json["faceDetected"], true);
        assert_eq!(json["faceCount"], 2);
    }
}
