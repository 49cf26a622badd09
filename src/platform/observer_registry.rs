use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use uuid::Uuid;

use crate::proto::platform::StreamMessage;

pub type ObserverTxChannel = mpsc::Sender<Result<StreamMessage, tonic::Status>>;
pub type ObserverRxChannel = mpsc::Receiver<Result<StreamMessage, tonic::Status>>;

#[derive(Debug)]
struct Observer {
    tx: ObserverTxChannel,
    connected_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObserverInfo {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Outcome of one fan-out pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Open but with a full buffer; kept registered
    pub skipped: usize,
    /// Transport closed; removed from the registry
    pub pruned: usize,
}

/// Live real-time observers of the shared log stream.
///
/// Owned by the engine and shared with the stream service (which registers and
/// unregisters connections) and the log broadcaster (which fans out through it).
/// Delivery never awaits, so a slow observer cannot hold up the others.
#[derive(Debug)]
pub struct ObserverRegistry {
    observers: DashMap<Uuid, Observer>,
    closed: watch::Sender<bool>,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            observers: DashMap::new(),
            closed,
        }
    }

    /// Returns false if the observer was already registered or the registry
    /// has been closed
    pub fn register(&self, id: Uuid, tx: ObserverTxChannel) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut inserted = false;
        self.observers.entry(id).or_insert_with(|| {
            inserted = true;
            let now = Utc::now();
            Observer {
                tx,
                connected_at: now,
                last_seen: now,
            }
        });
        if inserted {
            debug!("Observer {id} registered ({} live)", self.observers.len());
        }
        inserted
    }

    /// Returns false if the observer was not registered
    pub fn unregister(&self, id: Uuid) -> bool {
        let removed = self.observers.remove(&id).is_some();
        if removed {
            debug!("Observer {id} unregistered ({} live)", self.observers.len());
        }
        removed
    }

    pub fn mark_alive(&self, id: Uuid) {
        if let Some(mut observer) = self.observers.get_mut(&id) {
            observer.last_seen = Utc::now();
        }
    }

    pub fn is_registered(&self, id: Uuid) -> bool {
        self.observers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn observers(&self) -> Vec<ObserverInfo> {
        self.observers
            .iter()
            .map(|entry| ObserverInfo {
                id: *entry.key(),
                connected_at: entry.connected_at,
                last_seen: entry.last_seen,
            })
            .collect()
    }

    /// Attempt delivery to every observer. Closed observers are pruned once the
    /// pass is over, never while the map is being iterated.
    pub fn broadcast(&self, message: &StreamMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        for entry in self.observers.iter() {
            match entry.tx.try_send(Ok(message.clone())) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => report.skipped += 1,
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            if self.unregister(id) {
                report.pruned += 1;
            }
        }

        if report.skipped > 0 || report.pruned > 0 {
            debug!(
                "Broadcast delivered={} skipped={} pruned={}",
                report.delivered, report.skipped, report.pruned
            );
        }
        report
    }

    /// Drop every sender and wake every stream handler. Used at shutdown;
    /// later registrations are refused.
    pub fn close_all(&self) {
        self.closed.send_replace(true);
        self.observers.clear();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close_all` has been called
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.closed.subscribe();
        async move {
            loop {
                let closed = *rx.borrow_and_update();
                if closed || rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}
