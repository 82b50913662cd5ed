use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};

use super::RunStatus;

pub type ViewerId = u64;

/// Events delivered to a viewer's inbox.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A piece of output. `offset` is the byte position of `text` within the
    /// run's accumulated output.
    Chunk {
        run_id: Arc<str>,
        offset: usize,
        text: Arc<str>,
    },
    /// The run reached a terminal status; no further chunks will follow.
    Terminal { run_id: Arc<str>, status: RunStatus },
}

/// A connection's registration token. Cloning it does not create a new
/// viewer: subscriptions are keyed by `id`.
#[derive(Debug, Clone)]
pub struct ViewerHandle {
    id: ViewerId,
    tx: mpsc::Sender<HubEvent>,
}

impl ViewerHandle {
    pub fn id(&self) -> ViewerId {
        self.id
    }
}

type Subscribers = Mutex<HashMap<ViewerId, mpsc::Sender<HubEvent>>>;

/// Fan-out registry mapping a run id to its live viewers.
///
/// Each run has its own subscriber set behind its own lock; the outer map is
/// only write-locked to add or drop a run entry, so publishes for unrelated
/// runs never wait on each other. Delivery uses `try_send`: a viewer whose
/// inbox is full misses the chunk and recovers through backfill.
pub struct BroadcastHub {
    runs: RwLock<HashMap<String, Arc<Subscribers>>>,
    next_viewer: AtomicU64,
    viewer_buffer: usize,
}

impl BroadcastHub {
    pub fn new(viewer_buffer: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            next_viewer: AtomicU64::new(1),
            viewer_buffer: viewer_buffer.max(1),
        }
    }

    /// Create an inbox for one viewer connection.
    pub fn register_viewer(&self) -> (ViewerHandle, mpsc::Receiver<HubEvent>) {
        let (tx, rx) = mpsc::channel(self.viewer_buffer);
        let id = self.next_viewer.fetch_add(1, Ordering::Relaxed);
        (ViewerHandle { id, tx }, rx)
    }

    /// Register `handle` for `run_id`. Idempotent per handle id.
    pub async fn subscribe(&self, run_id: &str, handle: &ViewerHandle) {
        let mut runs = self.runs.write().await;
        let subscribers = runs.entry(run_id.to_string()).or_default().clone();
        subscribers.lock().await.insert(handle.id, handle.tx.clone());
        tracing::debug!(run_id, viewer = handle.id, "viewer subscribed");
    }

    /// Remove a viewer from a run. Safe to call when not registered.
    pub async fn unsubscribe(&self, run_id: &str, viewer: ViewerId) {
        let mut runs = self.runs.write().await;
        let Some(subscribers) = runs.get(run_id).cloned() else {
            return;
        };
        let mut set = subscribers.lock().await;
        if set.remove(&viewer).is_some() {
            tracing::debug!(run_id, viewer, "viewer unsubscribed");
        }
        if set.is_empty() {
            runs.remove(run_id);
        }
    }

    /// Offer a chunk to every viewer of `run_id` without waiting on any of
    /// them. Returns how many viewers accepted it.
    pub async fn publish(&self, run_id: &str, offset: usize, text: &str) -> usize {
        let subscribers = {
            let runs = self.runs.read().await;
            match runs.get(run_id) {
                Some(s) => s.clone(),
                None => return 0,
            }
        };

        let event = HubEvent::Chunk {
            run_id: Arc::from(run_id),
            offset,
            text: Arc::from(text),
        };

        let mut set = subscribers.lock().await;
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (viewer, tx) in set.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(run_id, viewer, "viewer not ready, chunk dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(*viewer),
            }
        }
        for viewer in closed {
            set.remove(&viewer);
        }
        let emptied = set.is_empty();
        drop(set);

        if emptied {
            self.remove_if_empty(run_id).await;
        }
        delivered
    }

    /// Tell every viewer of `run_id` that the run is over and drop the
    /// run's registry entry. Connections stay open.
    pub async fn notify_terminal(&self, run_id: &str, status: RunStatus) -> usize {
        let Some(subscribers) = self.runs.write().await.remove(run_id) else {
            return 0;
        };

        let event = HubEvent::Terminal {
            run_id: Arc::from(run_id),
            status,
        };
        let set = subscribers.lock().await;
        let mut notified = 0;
        for (viewer, tx) in set.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => notified += 1,
                Err(e) => {
                    tracing::debug!(run_id, viewer, error = %e, "terminal notice not delivered");
                }
            }
        }
        notified
    }

    pub async fn subscriber_count(&self, run_id: &str) -> usize {
        let subscribers = self.runs.read().await.get(run_id).cloned();
        match subscribers {
            Some(s) => s.lock().await.len(),
            None => 0,
        }
    }

    /// Number of runs that currently have at least one registry entry.
    pub async fn active_runs(&self) -> usize {
        self.runs.read().await.len()
    }

    async fn remove_if_empty(&self, run_id: &str) {
        let mut runs = self.runs.write().await;
        let Some(subscribers) = runs.get(run_id).cloned() else {
            return;
        };
        if subscribers.lock().await.is_empty() {
            runs.remove(run_id);
        }
    }
}
