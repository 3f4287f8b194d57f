//! Drift-triggered retrain requests
//!
//! Scoring paths never retrain inline. They push a request onto a bounded
//! queue with `try_send` and move on; a background worker drains the queue
//! and marks components so their next scheduled run retrains.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::Component;

/// Default queue depth
pub const DEFAULT_RETRAIN_QUEUE_CAPACITY: usize = 64;

/// Request to retrain a component on its next run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainRequest {
    pub component: Component,
    pub reason: String,
    /// Divergence that triggered the request, when drift did
    pub divergence: Option<f64>,
    pub requested_at: DateTime<Utc>,
}

/// Sending half of the retrain queue
#[derive(Debug, Clone)]
pub struct RetrainQueue {
    tx: mpsc::Sender<RetrainRequest>,
}

impl RetrainQueue {
    /// Create a queue and the receiver its worker drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RetrainRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. Returns whether the request was accepted.
    pub fn request(&self, request: RetrainRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(req)) => {
                warn!(component = %req.component, "Retrain queue full, dropping request");
                false
            }
            Err(TrySendError::Closed(req)) => {
                warn!(component = %req.component, "Retrain queue closed, dropping request");
                false
            }
        }
    }
}

/// Components with a pending retrain, consumed by the next run
#[derive(Debug, Default)]
pub struct RetrainFlags {
    pending: DashMap<Component, RetrainRequest>,
}

impl RetrainFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request; a later request for the same component replaces it.
    pub fn mark(&self, request: RetrainRequest) {
        self.pending.insert(request.component, request);
    }

    pub fn is_pending(&self, component: Component) -> bool {
        self.pending.contains_key(&component)
    }

    /// Clear and return the pending request for `component`.
    pub fn take(&self, component: Component) -> Option<RetrainRequest> {
        self.pending.remove(&component).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Result of running the retrain worker loop.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsumerLoopResult {
    /// Worker stopped due to shutdown signal.
    Shutdown,
    /// Worker stopped because every sender was dropped.
    Closed,
}

/// Drain retrain requests into `flags` until shutdown or the queue closes.
pub async fn retrain_worker_loop(
    mut rx: mpsc::Receiver<RetrainRequest>,
    flags: Arc<RetrainFlags>,
    shutdown: CancellationToken,
) -> ConsumerLoopResult {
    info!("Retrain worker starting");
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Retrain worker received shutdown signal");
                return ConsumerLoopResult::Shutdown;
            }

            received = rx.recv() => {
                match received {
                    Some(request) => {
                        debug!(
                            component = %request.component,
                            reason = %request.reason,
                            divergence = ?request.divergence,
                            "Marking component for retrain"
                        );
                        flags.mark(request);
                    }
                    None => {
                        info!("Retrain queue closed");
                        return ConsumerLoopResult::Closed;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(component: Component) -> RetrainRequest {
        RetrainRequest {
            component,
            reason: "drift".into(),
            divergence: Some(0.2),
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (queue, _rx) = RetrainQueue::channel(1);
        assert!(queue.request(request(Component::Attribution)));
        assert!(!queue.request(request(Component::Predictive)));
    }

    #[test]
    fn test_flags_take_clears() {
        let flags = RetrainFlags::new();
        flags.mark(request(Component::Predictive));
        assert!(flags.is_pending(Component::Predictive));
        assert!(flags.take(Component::Predictive).is_some());
        assert!(flags.is_empty());
    }

    #[tokio::test]
    async fn test_worker_marks_and_stops_on_close() {
        let (queue, rx) = RetrainQueue::channel(8);
        let flags = Arc::new(RetrainFlags::new());
        queue.request(request(Component::Segmentation));
        queue.request(request(Component::Attribution));
        drop(queue);

        let result = retrain_worker_loop(rx, Arc::clone(&flags), CancellationToken::new()).await;
        assert_eq!(result, ConsumerLoopResult::Closed);
        assert_eq!(flags.len(), 2);
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let (_queue, rx) = RetrainQueue::channel(8);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let result = retrain_worker_loop(rx, Arc::new(RetrainFlags::new()), shutdown).await;
        assert_eq!(result, ConsumerLoopResult::Shutdown);
    }
}
