use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::detection::domain::detection_error::DetectionError;
use crate::detection::domain::face_detector::{Detection, FaceDetector};
use crate::shared::captured_frame::CapturedFrame;

type Reply = Result<Detection, String>;

struct Job {
    frame: CapturedFrame,
    reply: Sender<Reply>,
}

/// Decorator that bounds how long a caller waits for detection.
///
/// The inner detector runs on a dedicated thread. A call that misses the
/// deadline returns [`DetectionError::Timeout`] and its late result is
/// discarded; until that abandoned call finishes, further calls fail fast
/// with [`DetectionError::Busy`] instead of queueing behind it.
pub struct DeadlineDetector {
    job_tx: Sender<Job>,
    timeout: Duration,
    abandoned: Option<Receiver<Reply>>,
}

impl DeadlineDetector {
    pub fn new(inner: Box<dyn FaceDetector>, timeout: Duration) -> Self {
        // At most one job is ever queued: a new one is only sent once the
        // previous reply arrived or the abandoned call completed.
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(1);
        spawn_worker(inner, job_rx);
        Self {
            job_tx,
            timeout,
            abandoned: None,
        }
    }
}

fn spawn_worker(mut inner: Box<dyn FaceDetector>, job_rx: Receiver<Job>) {
    thread::spawn(move || {
        for job in job_rx {
            let result = inner.detect(&job.frame).map_err(|e| e.to_string());
            // The caller may have given up already.
            let _ = job.reply.send(result);
        }
    });
}

impl FaceDetector for DeadlineDetector {
    fn detect(&mut self, frame: &CapturedFrame) -> Result<Detection, Box<dyn std::error::Error>> {
        if let Some(pending) = &self.abandoned {
            match pending.try_recv() {
                Err(TryRecvError::Empty) => return Err(Box::new(DetectionError::Busy)),
                // Late result (discarded) or worker gone; either way the slot is free.
                Ok(_) | Err(TryRecvError::Disconnected) => self.abandoned = None,
            }
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let job = Job {
            frame: frame.clone(),
            reply: reply_tx,
        };

        match self.job_tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(Box::new(DetectionError::Busy)),
            Err(TrySendError::Disconnected(_)) => {
                return Err(Box::new(DetectionError::WorkerGone))
            }
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(Ok(detection)) => Ok(detection),
            Ok(Err(message)) => Err(Box::new(DetectionError::Failed(message))),
            Err(RecvTimeoutError::Timeout) => {
                self.abandoned = Some(reply_rx);
                Err(Box::new(DetectionError::Timeout(self.timeout)))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Box::new(DetectionError::WorkerGone)),
        }
    }
}
