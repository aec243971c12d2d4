//! Turns progress events from background execution units into discrete,
//! timeout-bounded messages for the single-threaded consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep_until, timeout_at};

use crate::models::ProgressEvent;
use crate::runtime::Effect;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub fn progress_channel(poll_timeout: Duration) -> (ProgressSender, UpdateBridge) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        ProgressSender { inner: sender },
        UpdateBridge {
            receiver: Arc::new(Mutex::new(receiver)),
            poll_timeout,
        },
    )
}

#[derive(Clone, Debug)]
pub struct ProgressSender {
    inner: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    /// Returns false once the bridge has been dropped.
    pub fn send(&self, event: ProgressEvent) -> bool {
        match self.inner.send(event) {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(
                    task_id = %error.0.task_id,
                    "progress event dropped; update bridge is gone"
                );
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BridgeMessage {
    /// The poll timeout elapsed with nothing to deliver.
    Empty,
    Event(ProgressEvent),
    /// Every sender is gone; no event will ever arrive.
    Disconnected,
}

#[derive(Clone, Debug)]
pub struct UpdateBridge {
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<ProgressEvent>>>,
    poll_timeout: Duration,
}

impl UpdateBridge {
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Wait at most one poll timeout for the next event.
    pub async fn next(&self) -> BridgeMessage {
        let deadline = Instant::now() + self.poll_timeout;
        let Ok(mut receiver) = timeout_at(deadline, self.receiver.lock()).await else {
            return BridgeMessage::Empty;
        };

        match timeout_at(deadline, receiver.recv()).await {
            Ok(Some(event)) => BridgeMessage::Event(event),
            Ok(None) => {
                drop(receiver);
                // Hold the consumer for the full timeout so re-polling a dead
                // bridge never spins.
                sleep_until(deadline).await;
                BridgeMessage::Disconnected
            }
            Err(_) => BridgeMessage::Empty,
        }
    }

    /// Effect resolving to the next bridge message, mapped into the program's message type.
    pub fn watch_next<M, F>(&self, map: F) -> Effect<M>
    where
        M: Send + 'static,
        F: FnOnce(BridgeMessage) -> M + Send + 'static,
    {
        let bridge = self.clone();
        Effect::task(async move { map(bridge.next().await) })
    }

    /// Every event already queued, without waiting.
    pub fn drain_ready(&self) -> Vec<ProgressEvent> {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }
}
