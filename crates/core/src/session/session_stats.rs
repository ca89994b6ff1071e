use std::time::{Duration, Instant};

use serde::Serialize;

/// Running counters for one monitoring session.
///
/// Only aggregates are kept (no per-frame history) so a long session costs
/// constant memory. A summary is logged when the session stops.
#[derive(Debug, Clone)]
pub struct SessionStats {
    started: Instant,
    frames_processed: u64,
    frames_dropped: u64,
    detection_errors: u64,
    detections_timed: u64,
    detection_total: Duration,
    detection_max: Duration,
    recordings_completed: u64,
    recordings_failed: u64,
}

/// Point-in-time copy of the counters, as reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub detection_errors: u64,
    pub recordings_completed: u64,
    pub recordings_failed: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            frames_processed: 0,
            frames_dropped: 0,
            detection_errors: 0,
            detections_timed: 0,
            detection_total: Duration::ZERO,
            detection_max: Duration::ZERO,
            recordings_completed: 0,
            recordings_failed: 0,
        }
    }

    pub fn record_detection(&mut self, latency: Duration) {
        self.frames_processed += 1;
        self.detections_timed += 1;
        self.detection_total += latency;
        self.detection_max = self.detection_max.max(latency);
    }

    /// Counts a failed detection and returns the running error count.
    pub fn record_detection_error(&mut self) -> u64 {
        self.frames_processed += 1;
        self.detection_errors += 1;
        self.detection_errors
    }

    pub fn record_drop(&mut self) -> u64 {
        self.frames_dropped += 1;
        self.frames_dropped
    }

    pub fn recording_completed(&mut self) {
        self.recordings_completed += 1;
    }

    pub fn recording_failed(&mut self) {
        self.recordings_failed += 1;
    }

    pub fn avg_detection(&self) -> Duration {
        if self.detections_timed == 0 {
            Duration::ZERO
        } else {
            self.detection_total / self.detections_timed as u32
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_processed: self.frames_processed,
            frames_dropped: self.frames_dropped,
            detection_errors: self.detection_errors,
            recordings_completed: self.recordings_completed,
            recordings_failed: self.recordings_failed,
        }
    }

    pub fn summary_string(&self, session: &str) -> String {
        let elapsed = self.started.elapsed().as_secs_f64();
        let mut lines = vec![format!("Session {session} summary ({elapsed:.1}s):")];
        lines.push(format!(
            "  frames: {} processed, {} dropped",
            self.frames_processed, self.frames_dropped
        ));
        lines.push(format!(
            "  detection: avg {:.1}ms, max {:.1}ms, {} errors",
            self.avg_detection().as_secs_f64() * 1000.0,
            self.detection_max.as_secs_f64() * 1000.0,
            self.detection_errors
        ));
        lines.push(format!(
            "  recordings: {} completed, {} failed",
            self.recordings_completed, self.recordings_failed
        ));
        if self.frames_processed > 0 && elapsed > 0.0 {
            lines.push(format!(
                "  throughput: {:.1} fps",
                self.frames_processed as f64 / elapsed
            ));
        }
        lines.join("\n")
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
