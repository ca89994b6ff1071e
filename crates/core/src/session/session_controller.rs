use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};

use crate::detection::domain::face_detector::DetectorFactory;
use crate::recording::domain::artifact_sink::ArtifactStore;
use crate::recording::recording_namer::RecordingNamer;
use crate::session::control_error::ControlError;
use crate::session::session_core::{Session, SessionStatus};
use crate::session::session_config::SessionConfig;
use crate::session::session_worker::{lock_session, spawn_worker, FrameJob};
use crate::shared::captured_frame::CapturedFrame;
use crate::status::status_publisher::{StatusPublisher, StatusSubscription};

struct SessionHandle {
    core: Arc<Mutex<Session>>,
    frame_tx: Sender<FrameJob>,
    worker: JoinHandle<()>,
}

/// Keyed table of monitoring sessions.
///
/// Each session has its own lock, bounded frame queue and worker thread, so
/// sessions never contend with each other. Lock order is always the table
/// first, then the closing set, then a session. A key in the closing set is
/// being finalized outside the table lock; `start` under that key waits for
/// it so two recordings of one key never overlap.
pub struct SessionController {
    config: SessionConfig,
    detection_timeout: Option<Duration>,
    factory: Arc<dyn DetectorFactory>,
    store: Arc<dyn ArtifactStore>,
    namer: Arc<RecordingNamer>,
    publisher: Arc<StatusPublisher>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    closing: Mutex<HashSet<String>>,
    closed: Condvar,
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn DetectorFactory>,
        store: Arc<dyn ArtifactStore>,
        publisher: Arc<StatusPublisher>,
    ) -> Self {
        Self {
            config,
            detection_timeout: None,
            factory,
            store,
            namer: Arc::new(RecordingNamer::new()),
            publisher,
            sessions: Mutex::new(HashMap::new()),
            closing: Mutex::new(HashSet::new()),
            closed: Condvar::new(),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Bounds every detection call; slower calls count as detection errors.
    pub fn with_detection_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.detection_timeout = timeout;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn detector_factory(&self) -> Arc<dyn DetectorFactory> {
        self.factory.clone()
    }

    pub fn detection_timeout(&self) -> Option<Duration> {
        self.detection_timeout
    }

    /// Shared with every session so names stay unique across sources.
    pub fn namer(&self) -> &RecordingNamer {
        &self.namer
    }

    pub fn subscribe(&self) -> StatusSubscription {
        self.publisher.subscribe()
    }

    pub fn session_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.table().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Starts monitoring. Starting an active session returns its status
    /// unchanged.
    pub fn start(&self, key: &str) -> SessionStatus {
        let mut sessions = self.table();
        loop {
            if let Some(handle) = sessions.get(key) {
                let core = handle.core.clone();
                drop(sessions);
                return lock_session(&core).status();
            }
            let closing = self.closing_keys();
            if !closing.contains(key) {
                break;
            }
            drop(sessions);
            let closing = self
                .closed
                .wait_while(closing, |keys| keys.contains(key))
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            drop(closing);
            sessions = self.table();
        }

        let mut session = Session::new(
            key,
            self.config.clone(),
            self.store.clone(),
            self.namer.clone(),
        );
        let transitions = session.take_transitions();
        let status = session.status();
        self.publisher.publish(session.event(transitions));

        let core = Arc::new(Mutex::new(session));
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(self.config.queue_capacity.max(1));
        let worker = spawn_worker(
            core.clone(),
            frame_rx,
            self.factory.clone(),
            self.detection_timeout,
            self.publisher.clone(),
        );
        sessions.insert(
            key.to_string(),
            SessionHandle {
                core,
                frame_tx,
                worker,
            },
        );
        status
    }

    /// Ends monitoring, finalizing any open recording immediately even if a
    /// detection is in flight. Unknown keys report `Idle`.
    pub fn stop(&self, key: &str) -> SessionStatus {
        let handle = {
            let mut sessions = self.table();
            let Some(handle) = sessions.remove(key) else {
                return SessionStatus::idle();
            };
            self.closing_keys().insert(key.to_string());
            handle
        };

        let status = {
            let mut session = lock_session(&handle.core);
            session.stop();
            let transitions = session.take_transitions();
            self.publisher.publish(session.event(transitions));
            session.status()
        };
        self.closing_keys().remove(key);
        self.closed.notify_all();

        // Closing the queue lets the worker exit once its current call returns.
        drop(handle.frame_tx);
        let mut retired = self.retired_workers();
        retired.retain(|worker| !worker.is_finished());
        retired.push(handle.worker);
        status
    }

    pub fn status(&self, key: &str) -> SessionStatus {
        match self.core(key) {
            Some(core) => lock_session(&core).status(),
            None => SessionStatus::idle(),
        }
    }

    /// Queues a frame for detection. `Ok(false)` means the queue was full and
    /// the frame was dropped.
    pub fn submit_frame(&self, key: &str, frame: CapturedFrame) -> Result<bool, ControlError> {
        let (core, frame_tx) = {
            let sessions = self.table();
            let handle = sessions.get(key).ok_or_else(|| ControlError::not_started(key))?;
            (handle.core.clone(), handle.frame_tx.clone())
        };

        let mut session = lock_session(&core);
        if session.is_stopped() {
            return Err(ControlError::not_started(key));
        }
        // Sequence numbers are assigned under the session lock, so queue order
        // matches submission order.
        let seq = session.accept_frame();
        match frame_tx.try_send(FrameJob { frame, seq }) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                session.record_drop(seq);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(ControlError::not_started(key)),
        }
    }

    pub fn force_start(&self, key: &str) -> Result<SessionStatus, ControlError> {
        let core = self.core(key).ok_or_else(|| ControlError::not_started(key))?;
        let mut session = lock_session(&core);
        if session.is_stopped() {
            return Err(ControlError::not_started(key));
        }
        let result = session.force_start();
        let transitions = session.take_transitions();
        self.publisher.publish(session.event(transitions));
        result?;
        Ok(session.status())
    }

    pub fn force_stop(&self, key: &str) -> SessionStatus {
        let Some(core) = self.core(key) else {
            return SessionStatus::idle();
        };
        let mut session = lock_session(&core);
        session.force_stop();
        let transitions = session.take_transitions();
        if !transitions.is_empty() {
            self.publisher.publish(session.event(transitions));
        }
        session.status()
    }

    /// Stops every session that has not received a frame within the liveness
    /// timeout. Returns the keys that were stopped.
    pub fn reap_stale_sessions(&self) -> Vec<String> {
        let timeout = self.config.liveness_timeout;
        let cores: Vec<(String, Arc<Mutex<Session>>)> = self
            .table()
            .iter()
            .map(|(key, handle)| (key.clone(), handle.core.clone()))
            .collect();
        let stale: Vec<String> = cores
            .into_iter()
            .filter(|(_, core)| lock_session(core).last_frame_at().elapsed() >= timeout)
            .map(|(key, _)| key)
            .collect();

        for key in &stale {
            log::info!("Session {key}: no frames for {timeout:?}, stopping");
            self.stop(key);
        }
        stale
    }

    /// Stops all sessions, waits for their workers and ends every status
    /// subscription.
    pub fn shutdown(&self) {
        for key in self.session_keys() {
            self.stop(&key);
        }
        let workers: Vec<JoinHandle<()>> = self.retired_workers().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                log::error!("A session worker panicked");
            }
        }
        self.publisher.shutdown();
    }

    fn core(&self, key: &str) -> Option<Arc<Mutex<Session>>> {
        self.table().get(key).map(|handle| handle.core.clone())
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn closing_keys(&self) -> MutexGuard<'_, HashSet<String>> {
        self.closing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn retired_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.retired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if !self.table().is_empty() {
            self.shutdown();
        }
    }
}
