use loadwatch_common::{LoadWatchError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::snapshot::{Clock, Snapshot, SnapshotSource};

/// Serialized snapshot shared by every subscriber of one tick.
pub type Payload = Arc<str>;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Buffer full; the subscriber misses this payload but stays registered.
    pub lagged: usize,
    /// Receiver gone; the subscriber was removed.
    pub dropped: usize,
}

/// Live subscribers, each behind a bounded channel.
#[derive(Debug)]
pub struct SubscriberRegistry {
    subscribers: Mutex<Vec<mpsc::Sender<Payload>>>,
    buffer: usize,
}

impl SubscriberRegistry {
    pub fn new(buffer: usize) -> Self {
        Self { subscribers: Mutex::new(Vec::new()), buffer: buffer.max(1) }
    }

    /// Register a subscriber. It receives only payloads broadcast after this call.
    pub fn subscribe(&self) -> mpsc::Receiver<Payload> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.lock().push(tx);
        rx
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `payload` to every subscriber without waiting on any of them.
    pub fn broadcast(&self, payload: &Payload) -> Delivery {
        let mut delivery = Delivery::default();
        self.lock().retain(|tx| match tx.try_send(Arc::clone(payload)) {
            Ok(()) => {
                delivery.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                delivery.lagged += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                delivery.dropped += 1;
                false
            }
        });
        delivery
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::Sender<Payload>>> {
        // The list stays consistent even if a holder panicked.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Most recent successfully built payload, for request/response readers.
#[derive(Debug, Clone, Default)]
pub struct LatestSnapshot(Arc<RwLock<Option<Payload>>>);

impl LatestSnapshot {
    pub fn get(&self) -> Option<Payload> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, payload: Payload) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(payload);
    }
}

/// Every tick: one snapshot, serialized once, offered to every subscriber.
pub struct SnapshotPublisher<S> {
    source: S,
    clock: Arc<dyn Clock>,
    registry: Arc<SubscriberRegistry>,
    latest: LatestSnapshot,
}

impl<S: SnapshotSource> SnapshotPublisher<S> {
    pub fn new(
        source: S,
        clock: Arc<dyn Clock>,
        registry: Arc<SubscriberRegistry>,
        latest: LatestSnapshot,
    ) -> Self {
        Self { source, clock, registry, latest }
    }

    /// Build and fan out one payload. A failed build is sent as an error payload.
    pub fn tick(&mut self) -> Delivery {
        let payload = match self.source.snapshot(self.clock.now()).and_then(|s| serialize(&s)) {
            Ok(payload) => {
                self.latest.set(Arc::clone(&payload));
                payload
            }
            Err(e) => {
                warn!(error = %e, "snapshot construction failed");
                error_payload(&e.to_string())
            }
        };

        let delivery = self.registry.broadcast(&payload);
        if delivery.dropped > 0 {
            info!(dropped = delivery.dropped, remaining = self.registry.len(), "subscribers disconnected");
        }
        debug!(delivered = delivery.delivered, lagged = delivery.lagged, "snapshot published");
        delivery
    }

    /// Tick forever at `period`. A slow tick delays the next one instead of
    /// letting ticks pile up.
    pub async fn run(mut self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick();
        }
    }
}

fn serialize(snapshot: &Snapshot) -> Result<Payload> {
    serde_json::to_string(snapshot)
        .map(Payload::from)
        .map_err(|e| LoadWatchError::Snapshot(e.to_string()))
}

/// `{"error": "<message>"}`
pub fn error_payload(message: &str) -> Payload {
    Payload::from(serde_json::json!({ "error": message }).to_string())
}
