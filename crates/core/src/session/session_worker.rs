use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::detection::domain::detection_error::DetectionError;
use crate::detection::domain::face_detector::{Detection, DetectorFactory, FaceDetector};
use crate::detection::infrastructure::deadline_detector::DeadlineDetector;
use crate::session::session_core::Session;
use crate::shared::captured_frame::CapturedFrame;
use crate::status::status_publisher::StatusPublisher;

/// One accepted frame waiting for detection.
pub struct FrameJob {
    pub frame: CapturedFrame,
    pub seq: u64,
}

/// Stand-in used when the per-session detector could not be built. Every
/// frame then counts as a detection error, so the session keeps running.
struct UnavailableDetector {
    reason: String,
}

impl FaceDetector for UnavailableDetector {
    fn detect(&mut self, _frame: &CapturedFrame) -> Result<Detection, Box<dyn std::error::Error>> {
        Err(Box::new(DetectionError::Failed(self.reason.clone())))
    }
}

pub fn lock_session(core: &Mutex<Session>) -> MutexGuard<'_, Session> {
    core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn build_detector(
    factory: &dyn DetectorFactory,
    detection_timeout: Option<Duration>,
    key: &str,
) -> Box<dyn FaceDetector> {
    let detector = match factory.create() {
        Ok(detector) => detector,
        Err(e) => {
            log::error!("Session {key}: face detector unavailable: {e}");
            return Box::new(UnavailableDetector {
                reason: e.to_string(),
            });
        }
    };
    match detection_timeout {
        Some(timeout) => Box::new(DeadlineDetector::new(detector, timeout)),
        None => detector,
    }
}

/// Runs detection for one session, strictly one frame at a time.
///
/// Detection happens without holding the session lock, so `stop` and
/// `status` never wait on the detector. Results that come back after the
/// session stopped are discarded.
pub fn spawn_worker(
    core: Arc<Mutex<Session>>,
    frames: Receiver<FrameJob>,
    factory: Arc<dyn DetectorFactory>,
    detection_timeout: Option<Duration>,
    publisher: Arc<StatusPublisher>,
) -> JoinHandle<()> {
    let key = lock_session(&core).key().to_string();
    std::thread::spawn(move || {
        let mut detector = build_detector(factory.as_ref(), detection_timeout, &key);

        for job in frames {
            let started = Instant::now();
            let result = detector.detect(&job.frame).map_err(DetectionError::from);
            let latency = started.elapsed();

            let mut session = lock_session(&core);
            if session.is_stopped() {
                log::debug!("Session {key}: discarding result for frame {}", job.seq);
                break;
            }
            let outcome = session.apply(&job.frame, job.seq, result, latency);
            // Published under the lock so events keep session order.
            publisher.publish(session.frame_event(outcome));
        }
        log::debug!("Session {key}: worker exiting");
    })
}
