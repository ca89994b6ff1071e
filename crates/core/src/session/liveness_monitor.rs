use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::session::session_controller::SessionController;

/// Background thread that periodically stops sessions whose client went
/// silent, as if it had disconnected.
pub struct LivenessMonitor {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn spawn(controller: Arc<SessionController>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = std::thread::spawn(move || {
            let ticker = crossbeam_channel::tick(interval);
            loop {
                crossbeam_channel::select! {
                    recv(ticker) -> _ => {
                        let reaped = controller.reap_stale_sessions();
                        if !reaped.is_empty() {
                            log::info!("Liveness check stopped {} session(s)", reaped.len());
                        }
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            }
        });
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        // Dropping the sender wakes the select.
        self.shutdown_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Liveness monitor panicked");
            }
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.halt();
    }
}
