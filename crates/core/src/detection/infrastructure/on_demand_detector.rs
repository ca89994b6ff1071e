use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::detection::domain::detection_error::DetectionError;
use crate::detection::domain::face_detector::{Detection, DetectorFactory, FaceDetector};
use crate::detection::infrastructure::deadline_detector::DeadlineDetector;
use crate::shared::captured_frame::CapturedFrame;

/// Whether the shared detector is ready, and why not if it is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorHealth {
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
struct Slot {
    detector: Option<Box<dyn FaceDetector>>,
    last_error: Option<String>,
}

/// One detector shared by single-shot requests that are not tied to a
/// session.
///
/// The detector is built from the factory on first use. A failed build is
/// remembered for health reports and retried on the next call. Calls are
/// serialized.
pub struct OnDemandDetector {
    factory: Arc<dyn DetectorFactory>,
    timeout: Option<Duration>,
    slot: Mutex<Slot>,
}

impl OnDemandDetector {
    pub fn new(factory: Arc<dyn DetectorFactory>, timeout: Option<Duration>) -> Self {
        Self {
            factory,
            timeout,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Builds the detector now instead of on the first request.
    pub fn warm_up(&self) -> Result<(), DetectionError> {
        let mut slot = self.slot();
        Self::ensure_loaded(&mut slot, self.factory.as_ref(), self.timeout)?;
        Ok(())
    }

    pub fn detect(&self, frame: &CapturedFrame) -> Result<Detection, DetectionError> {
        let mut slot = self.slot();
        let detector = Self::ensure_loaded(&mut slot, self.factory.as_ref(), self.timeout)?;
        detector.detect(frame).map_err(DetectionError::from)
    }

    pub fn health(&self) -> DetectorHealth {
        let slot = self.slot();
        DetectorHealth {
            loaded: slot.detector.is_some(),
            error: slot.last_error.clone(),
        }
    }

    fn ensure_loaded<'a>(
        slot: &'a mut Slot,
        factory: &dyn DetectorFactory,
        timeout: Option<Duration>,
    ) -> Result<&'a mut Box<dyn FaceDetector>, DetectionError> {
        if slot.detector.is_none() {
            match factory.create() {
                Ok(detector) => {
                    log::info!("Face detector loaded for single-shot requests");
                    slot.last_error = None;
                    slot.detector = Some(match timeout {
                        Some(timeout) => Box::new(DeadlineDetector::new(detector, timeout)),
                        None => detector,
                    });
                }
                Err(e) => {
                    log::error!("Face detector unavailable: {e}");
                    slot.last_error = Some(e.to_string());
                    return Err(DetectionError::Failed(e.to_string()));
                }
            }
        }
        slot.detector
            .as_mut()
            .ok_or_else(|| DetectionError::Failed("detector not loaded".into()))
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FirstByteDetector;

    impl FaceDetector for FirstByteDetector {
        fn detect(
            &mut self,
            frame: &CapturedFrame,
        ) -> Result<Detection, Box<dyn std::error::Error>> {
            Ok(Detection::faces(u32::from(frame.bytes()[0]), 0.8))
        }
    }

    /// Fails the first `failures` builds, then succeeds.
    fn flaky_factory(failures: usize) -> (Arc<dyn DetectorFactory>, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let factory: Arc<dyn DetectorFactory> = Arc::new(
            move || -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>> {
                if counter.fetch_add(1, Ordering::SeqCst) < failures {
                    return Err("model missing".into());
                }
                Ok(Box::new(FirstByteDetector))
            },
        );
        (factory, builds)
    }

    #[test]
    fn test_detector_is_built_once_on_first_use() {
        let (factory, builds) = flaky_factory(0);
        let detector = OnDemandDetector::new(factory, None);
        assert!(!detector.health().loaded);

        let first = detector.detect(&CapturedFrame::new(vec![2u8], 0)).unwrap();
        let second = detector.detect(&CapturedFrame::new(vec![0u8], 0)).unwrap();

        assert_eq!(first, Detection::faces(2, 0.8));
        assert!(!second.face_detected);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(
            detector.health(),
            DetectorHealth {
                loaded: true,
                error: None
            }
        );
    }

    #[test]
    fn test_failed_build_is_reported_then_retried() {
        let (factory, builds) = flaky_factory(1);
        let detector = OnDemandDetector::new(factory, Some(Duration::from_secs(1)));

        let err = detector.warm_up().unwrap_err();
        assert_eq!(err, DetectionError::Failed("model missing".into()));
        let health = detector.health();
        assert!(!health.loaded);
        assert_eq!(health.error.as_deref(), Some("model missing"));

        assert!(detector.detect(&CapturedFrame::new(vec![1u8], 0)).is_ok());
        assert!(detector.health().loaded);
        assert_eq!(detector.health().error, None);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
