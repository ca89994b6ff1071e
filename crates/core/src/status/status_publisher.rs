use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;

use crate::status::status_event::StatusEvent;

/// Why a subscription ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The subscriber's buffer filled up and it was evicted.
    SlowConsumer,
    /// The publisher shut down.
    Shutdown,
}

/// Item yielded by a subscription. `Disconnected` is always the last item.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusMessage {
    Status(StatusEvent),
    Disconnected { reason: DisconnectReason },
}

struct Subscriber {
    id: u64,
    tx: Sender<StatusEvent>,
    evicted: Arc<AtomicBool>,
}

/// Broadcasts status events to every subscriber without ever blocking the
/// publisher.
///
/// Each subscriber owns a bounded buffer. A subscriber whose buffer is full
/// is evicted and, after draining what it already has, receives a terminal
/// `Disconnected { SlowConsumer }`.
pub struct StatusPublisher {
    buffer: usize,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl StatusPublisher {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = crossbeam_channel::bounded(self.buffer);
        let evicted = Arc::new(AtomicBool::new(false));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Subscriber {
            id,
            tx,
            evicted: evicted.clone(),
        });
        log::debug!("Status subscriber {id} connected");
        StatusSubscription {
            rx,
            evicted,
            finished: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    pub fn publish(&self, event: StatusEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                sub.evicted.store(true, Ordering::Release);
                log::warn!("Status subscriber {} evicted: buffer full", sub.id);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Status subscriber {} went away", sub.id);
                false
            }
        });
    }

    /// Ends every subscription. Subscribers drain what is buffered and then
    /// see `Disconnected { Shutdown }`.
    pub fn shutdown(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Receiving end of a status subscription. Dropping it unsubscribes.
pub struct StatusSubscription {
    rx: Receiver<StatusEvent>,
    evicted: Arc<AtomicBool>,
    finished: bool,
}

impl StatusSubscription {
    /// Waits up to `timeout` for the next message. `None` means nothing
    /// arrived yet, or the subscription already delivered its terminal item.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<StatusMessage> {
        if self.finished {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(StatusMessage::Status(event)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.terminal()),
        }
    }

    /// Non-blocking variant of `recv_timeout`.
    pub fn try_next(&mut self) -> Option<StatusMessage> {
        if self.finished {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => Some(StatusMessage::Status(event)),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => Some(self.terminal()),
        }
    }

    fn terminal(&mut self) -> StatusMessage {
        self.finished = true;
        let reason = if self.evicted.load(Ordering::Acquire) {
            DisconnectReason::SlowConsumer
        } else {
            DisconnectReason::Shutdown
        };
        StatusMessage::Disconnected { reason }
    }
}

impl Iterator for StatusSubscription {
    type Item = StatusMessage;

    /// Blocks until the next event; ends after the terminal `Disconnected`.
    fn next(&mut self) -> Option<StatusMessage> {
        if self.finished {
            return None;
        }
        match self.rx.recv() {
            Ok(event) => Some(StatusMessage::Status(event)),
            Err(_) => Some(self.terminal()),
        }
    }
}
