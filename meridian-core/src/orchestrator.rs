//! Batch scheduling with failure isolation
//!
//! The three batch components run concurrently on the blocking pool, each
//! under its own [`RunGuard`]. A component that fails, breaches a ceiling,
//! is cancelled or panics is recorded as failing in the store; the others
//! still publish. Nothing from a failed run is ever published.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::allocator::{AllocatorService, LedgerEntry};
use crate::attribution::{AttributionEngine, AttributionInput, CampaignMeta, DriftBaseline};
use crate::config::{LimitsConfig, MeridianConfig};
use crate::error::Result;
use crate::guard::RunGuard;
use crate::predictive::PredictiveEngine;
use crate::retrain::{
    ConsumerLoopResult, DEFAULT_RETRAIN_QUEUE_CAPACITY, RetrainFlags, RetrainQueue, RetrainRequest,
    retrain_worker_loop,
};
use crate::segmentation::SegmentationEngine;
use crate::store::{InsightSlot, InsightStore};
use crate::types::{Component, CreativeSeries, Event};

/// Inputs shared by one batch cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchInputs {
    pub events: Vec<Event>,
    #[serde(default)]
    pub series: Vec<CreativeSeries>,
    #[serde(default)]
    pub campaigns: Vec<CampaignMeta>,
    #[serde(default)]
    pub baseline: Option<DriftBaseline>,
    #[serde(default)]
    pub reference_roi: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ComponentOutcome {
    Published { run_id: Uuid },
    Failed {
        error: String,
        /// Stopped by a ceiling, cancellation or panic rather than bad input
        aborted: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_at: DateTime<Utc>,
    pub outcomes: BTreeMap<Component, ComponentOutcome>,
}

impl BatchReport {
    pub fn published(&self, component: Component) -> bool {
        matches!(self.outcomes.get(&component), Some(ComponentOutcome::Published { .. }))
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, ComponentOutcome::Failed { .. }))
            .count()
    }
}

fn settle<T>(
    slot: &InsightSlot<T>,
    joined: std::result::Result<Result<T>, JoinError>,
    run_id: impl Fn(&T) -> Uuid,
    now: DateTime<Utc>,
) -> ComponentOutcome {
    let component = slot.component();
    match joined {
        Ok(Ok(output)) => {
            let id = run_id(&output);
            slot.publish(id, output, now);
            ComponentOutcome::Published { run_id: id }
        }
        Ok(Err(e)) => {
            let aborted = e.is_abort();
            error!(%component, error = %e, aborted, "Batch component failed");
            slot.mark_failed(&e.to_string(), now);
            ComponentOutcome::Failed {
                error: e.to_string(),
                aborted,
            }
        }
        Err(join) => {
            let message = format!("task did not complete: {join}");
            error!(%component, error = %message, "Batch component crashed");
            slot.mark_failed(&message, now);
            ComponentOutcome::Failed {
                error: message,
                aborted: true,
            }
        }
    }
}

/// Owns the batch engines and the store they publish to
#[derive(Debug)]
pub struct Orchestrator {
    segmentation: Arc<SegmentationEngine>,
    predictive: Arc<PredictiveEngine>,
    attribution: Arc<AttributionEngine>,
    store: Arc<InsightStore>,
    flags: Arc<RetrainFlags>,
    limits: LimitsConfig,
    allocator: Option<Arc<AllocatorService>>,
}

impl Orchestrator {
    /// Build the engines from config. The receiver feeds [`Self::start_retrain_worker`].
    pub fn new(config: &MeridianConfig) -> (Self, mpsc::Receiver<RetrainRequest>) {
        let (queue, rx) = RetrainQueue::channel(DEFAULT_RETRAIN_QUEUE_CAPACITY);
        let orchestrator = Self {
            segmentation: Arc::new(SegmentationEngine::new(config.segmentation.clone())),
            predictive: Arc::new(PredictiveEngine::new(config.predictive.clone())),
            attribution: Arc::new(AttributionEngine::new(config.attribution.clone()).with_retrain_queue(queue)),
            store: Arc::new(InsightStore::new(&config.store)),
            flags: Arc::new(RetrainFlags::new()),
            limits: config.limits.clone(),
            allocator: None,
        };
        (orchestrator, rx)
    }

    /// Feed committed allocator spend into attribution runs.
    pub fn with_allocator(mut self, allocator: Arc<AllocatorService>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn store(&self) -> &Arc<InsightStore> {
        &self.store
    }

    pub fn flags(&self) -> &Arc<RetrainFlags> {
        &self.flags
    }

    pub fn predictive(&self) -> &Arc<PredictiveEngine> {
        &self.predictive
    }

    pub fn start_retrain_worker(
        &self,
        rx: mpsc::Receiver<RetrainRequest>,
        shutdown: CancellationToken,
    ) -> JoinHandle<ConsumerLoopResult> {
        info!("Starting retrain worker");
        let flags = Arc::clone(&self.flags);
        tokio::spawn(async move { retrain_worker_loop(rx, flags, shutdown).await })
    }

    fn apply_retrain_flags(&self) {
        for component in Component::batch() {
            let Some(request) = self.flags.take(*component) else {
                continue;
            };
            info!(%component, reason = %request.reason, "Retraining on this run");
            // segmentation and attribution refit every run; only the fatigue model is cached
            if *component == Component::Predictive {
                self.predictive.request_retrain();
            }
        }
    }

    async fn committed_ledger(&self) -> Vec<LedgerEntry> {
        let Some(allocator) = &self.allocator else {
            return Vec::new();
        };
        match allocator.ledgers().all_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Ledger unavailable, attributing without committed spend");
                Vec::new()
            }
        }
    }

    /// Run every batch component once and publish what succeeds.
    #[instrument(skip_all, fields(events = inputs.events.len(), series = inputs.series.len()))]
    pub async fn run_batch(
        &self,
        inputs: Arc<BatchInputs>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        self.apply_retrain_flags();
        let ledger = self.committed_ledger().await;

        let segmentation = {
            let engine = Arc::clone(&self.segmentation);
            let inputs = Arc::clone(&inputs);
            let guard = RunGuard::new("segmentation", self.limits.segmentation, cancel.child_token());
            tokio::task::spawn_blocking(move || engine.run(&inputs.events, now, &guard))
        };

        let predictive = {
            let engine = Arc::clone(&self.predictive);
            let inputs = Arc::clone(&inputs);
            // latest published segmentation, possibly from an earlier cycle
            let segments = self.store.segmentation().latest();
            let guard = RunGuard::new("predictive", self.limits.predictive, cancel.child_token());
            tokio::task::spawn_blocking(move || {
                let segments = segments.as_deref().map(|s| &s.payload);
                engine.run(&inputs.series, &inputs.events, segments, now, &guard)
            })
        };

        let attribution = {
            let engine = Arc::clone(&self.attribution);
            let input = AttributionInput {
                events: inputs.events.clone(),
                campaigns: inputs.campaigns.clone(),
                ledger,
                baseline: inputs.baseline.clone(),
                reference_roi: inputs.reference_roi.clone(),
            };
            let guard = RunGuard::new("attribution", self.limits.attribution, cancel.child_token());
            tokio::task::spawn_blocking(move || engine.run(&input, now, &guard))
        };

        let (segmentation, predictive, attribution) = tokio::join!(segmentation, predictive, attribution);

        let outcomes = BTreeMap::from([
            (
                Component::Segmentation,
                settle(self.store.segmentation(), segmentation, |o| o.run_id, now),
            ),
            (
                Component::Predictive,
                settle(self.store.predictive(), predictive, |o| o.run_id, now),
            ),
            (
                Component::Attribution,
                settle(self.store.attribution(), attribution, |o| o.run_id, now),
            ),
        ]);
        let report = BatchReport { run_at: now, outcomes };
        info!(failures = report.failures(), "Batch cycle complete");
        report
    }
}
