//! Shared insight store
//!
//! Batch components publish whole snapshots here; online loops read the
//! latest one without waiting. A failed run never replaces the last
//! known-good snapshot, it only marks the component as failing so readers
//! can tell a stale-but-healthy insight from one served during an outage.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::attribution::AttributionOutput;
use crate::predictive::PredictiveOutput;
use crate::segmentation::SegmentationOutput;
use crate::types::Component;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshots older than this are served as stale
    pub max_age_hours: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_age_hours: 26 }
    }
}

/// One published, immutable component output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub run_id: Uuid,
    pub published_at: DateTime<Utc>,
    pub payload: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ComponentHealth {
    NeverRun,
    Healthy {
        last_success: DateTime<Utc>,
    },
    Failing {
        since: DateTime<Utc>,
        error: String,
        consecutive_failures: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum StaleReason {
    OlderThan { age_secs: i64, max_age_secs: i64 },
    /// The latest run failed; this is the last known-good snapshot
    ComponentFailing { error: String, since: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsightRead<T> {
    Fresh(Arc<Snapshot<T>>),
    Stale {
        snapshot: Arc<Snapshot<T>>,
        reason: StaleReason,
    },
    Unavailable {
        health: ComponentHealth,
    },
}

impl<T> InsightRead<T> {
    /// The snapshot, fresh or stale.
    pub fn snapshot(&self) -> Option<&Arc<Snapshot<T>>> {
        match self {
            Self::Fresh(s) | Self::Stale { snapshot: s, .. } => Some(s),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

#[derive(Debug)]
struct SlotState<T> {
    snapshot: Option<Arc<Snapshot<T>>>,
    health: ComponentHealth,
}

/// Latest snapshot and health for one component
#[derive(Debug)]
pub struct InsightSlot<T> {
    component: Component,
    max_age: Duration,
    state: RwLock<SlotState<T>>,
}

impl<T> InsightSlot<T> {
    fn new(component: Component, max_age: Duration) -> Self {
        Self {
            component,
            max_age,
            state: RwLock::new(SlotState {
                snapshot: None,
                health: ComponentHealth::NeverRun,
            }),
        }
    }

    pub fn component(&self) -> Component {
        self.component
    }

    /// Swap in a new snapshot. Readers see the old one or the new one, never a mix.
    pub fn publish(&self, run_id: Uuid, payload: T, at: DateTime<Utc>) -> Arc<Snapshot<T>> {
        let snapshot = Arc::new(Snapshot {
            run_id,
            published_at: at,
            payload,
        });
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.snapshot = Some(Arc::clone(&snapshot));
        state.health = ComponentHealth::Healthy { last_success: at };
        info!(component = %self.component, %run_id, "Insight published");
        snapshot
    }

    /// Record a failed run, keeping the last known-good snapshot.
    pub fn mark_failed(&self, error: &str, at: DateTime<Utc>) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.health = match &state.health {
            ComponentHealth::Failing {
                since,
                consecutive_failures,
                ..
            } => ComponentHealth::Failing {
                since: *since,
                error: error.to_string(),
                consecutive_failures: consecutive_failures + 1,
            },
            _ => ComponentHealth::Failing {
                since: at,
                error: error.to_string(),
                consecutive_failures: 1,
            },
        };
        warn!(component = %self.component, error, "Component run failed, serving last known good");
    }

    pub fn latest(&self) -> Option<Arc<Snapshot<T>>> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        state.snapshot.clone()
    }

    pub fn health(&self) -> ComponentHealth {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        state.health.clone()
    }

    pub fn read(&self, now: DateTime<Utc>) -> InsightRead<T> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        let Some(snapshot) = state.snapshot.clone() else {
            return InsightRead::Unavailable {
                health: state.health.clone(),
            };
        };
        if let ComponentHealth::Failing { since, error, .. } = &state.health {
            return InsightRead::Stale {
                snapshot,
                reason: StaleReason::ComponentFailing {
                    error: error.clone(),
                    since: *since,
                },
            };
        }
        let age = now - snapshot.published_at;
        if age > self.max_age {
            return InsightRead::Stale {
                snapshot,
                reason: StaleReason::OlderThan {
                    age_secs: age.num_seconds(),
                    max_age_secs: self.max_age.num_seconds(),
                },
            };
        }
        InsightRead::Fresh(snapshot)
    }
}

/// Last known-good output of each batch component
#[derive(Debug)]
pub struct InsightStore {
    segmentation: InsightSlot<SegmentationOutput>,
    predictive: InsightSlot<PredictiveOutput>,
    attribution: InsightSlot<AttributionOutput>,
}

impl InsightStore {
    pub fn new(config: &StoreConfig) -> Self {
        let max_age = Duration::hours(config.max_age_hours.min(i64::MAX as u64 / 3_600) as i64);
        Self {
            segmentation: InsightSlot::new(Component::Segmentation, max_age),
            predictive: InsightSlot::new(Component::Predictive, max_age),
            attribution: InsightSlot::new(Component::Attribution, max_age),
        }
    }

    pub fn segmentation(&self) -> &InsightSlot<SegmentationOutput> {
        &self.segmentation
    }

    pub fn predictive(&self) -> &InsightSlot<PredictiveOutput> {
        &self.predictive
    }

    pub fn attribution(&self) -> &InsightSlot<AttributionOutput> {
        &self.attribution
    }

    /// Record a failure for any batch component. Online components have no slot.
    pub fn mark_failed(&self, component: Component, error: &str, at: DateTime<Utc>) {
        match component {
            Component::Segmentation => self.segmentation.mark_failed(error, at),
            Component::Predictive => self.predictive.mark_failed(error, at),
            Component::Attribution => self.attribution.mark_failed(error, at),
            Component::Allocator | Component::Anomaly => {
                warn!(%component, error, "Online component failure not tracked by the store")
            }
        }
    }

    pub fn health(&self) -> BTreeMap<Component, ComponentHealth> {
        BTreeMap::from([
            (Component::Segmentation, self.segmentation.health()),
            (Component::Predictive, self.predictive.health()),
            (Component::Attribution, self.attribution.health()),
        ])
    }
}

impl Default for InsightStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> InsightSlot<u32> {
        InsightSlot::new(Component::Predictive, Duration::hours(1))
    }

    #[test]
    fn test_unavailable_before_first_publish() {
        let slot = slot();
        assert!(matches!(
            slot.read(Utc::now()),
            InsightRead::Unavailable {
                health: ComponentHealth::NeverRun
            }
        ));
    }

    #[test]
    fn test_fresh_then_stale_by_age() {
        let slot = slot();
        let at = Utc::now();
        slot.publish(Uuid::now_v7(), 7, at);
        assert!(slot.read(at + Duration::minutes(30)).is_fresh());
        let read = slot.read(at + Duration::hours(2));
        assert!(matches!(
            read,
            InsightRead::Stale {
                reason: StaleReason::OlderThan { .. },
                ..
            }
        ));
        assert_eq!(read.snapshot().unwrap().payload, 7);
    }

    #[test]
    fn test_failure_keeps_last_known_good() {
        let slot = slot();
        let at = Utc::now();
        let run = Uuid::now_v7();
        slot.publish(run, 1, at);
        slot.mark_failed("memory ceiling", at);
        slot.mark_failed("memory ceiling", at);
        let read = slot.read(at);
        let InsightRead::Stale { snapshot, reason } = read else {
            panic!("expected stale read");
        };
        assert_eq!(snapshot.run_id, run);
        assert!(matches!(reason, StaleReason::ComponentFailing { .. }));
        assert!(matches!(
            slot.health(),
            ComponentHealth::Failing {
                consecutive_failures: 2,
                ..
            }
        ));

        slot.publish(Uuid::now_v7(), 2, at);
        assert!(slot.read(at).is_fresh());
    }

    #[test]
    fn test_store_reports_batch_health() {
        let store = InsightStore::default();
        store.mark_failed(Component::Attribution, "cancelled", Utc::now());
        let health = store.health();
        assert_eq!(health.len(), 3);
        assert!(matches!(health[&Component::Attribution], ComponentHealth::Failing { .. }));
        assert_eq!(health[&Component::Segmentation], ComponentHealth::NeverRun);
    }
}
