//! Resource ceilings and cancellation for batch runs
//!
//! A `RunGuard` is created per run. Components call [`RunGuard::check`]
//! between stages and [`RunGuard::charge`] when they materialise large
//! buffers. Either call failing aborts the run, and the orchestrator then
//! refuses to publish anything from it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{MeridianError, Resource, Result};

/// Ceilings for one batch component
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock ceiling for the whole run
    pub max_run_seconds: u64,
    /// Estimated working-set ceiling
    pub max_memory_mb: u64,
}

impl ResourceLimits {
    pub fn new(max_run_seconds: u64, max_memory_mb: u64) -> Self {
        Self {
            max_run_seconds,
            max_memory_mb,
        }
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.max_run_seconds)
    }

    pub fn memory_budget_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }
}

/// Per-run enforcement of time, memory and cancellation
#[derive(Debug)]
pub struct RunGuard {
    component: &'static str,
    started: Instant,
    time_budget: Duration,
    memory_budget_bytes: u64,
    charged_bytes: AtomicU64,
    cancel: CancellationToken,
}

impl RunGuard {
    pub fn new(component: &'static str, limits: ResourceLimits, cancel: CancellationToken) -> Self {
        Self {
            component,
            started: Instant::now(),
            time_budget: limits.time_budget(),
            memory_budget_bytes: limits.memory_budget_bytes(),
            charged_bytes: AtomicU64::new(0),
            cancel,
        }
    }

    /// Guard with generous ceilings and its own token, for ad-hoc runs and tests.
    pub fn unbounded(component: &'static str) -> Self {
        Self::new(
            component,
            ResourceLimits::new(u64::MAX / 2_000, u64::MAX / (2 * 1024 * 1024)),
            CancellationToken::new(),
        )
    }

    /// Replace the memory ceiling with an exact byte count.
    pub fn with_memory_budget_bytes(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail if the run was cancelled or has run past its time budget.
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(component = self.component, stage, "Run cancelled");
            return Err(MeridianError::Cancelled);
        }
        let elapsed = self.started.elapsed();
        if elapsed > self.time_budget {
            warn!(
                component = self.component,
                stage,
                elapsed_ms = elapsed.as_millis() as u64,
                "Run exceeded time budget"
            );
            return Err(MeridianError::ResourceExceeded {
                resource: Resource::Time,
                limit: self.time_budget.as_millis() as u64,
                observed: elapsed.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Account for `bytes` of working memory; fail once the ceiling is crossed.
    pub fn charge(&self, bytes: u64) -> Result<()> {
        let total = self.charged_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if total > self.memory_budget_bytes {
            warn!(
                component = self.component,
                charged = total,
                limit = self.memory_budget_bytes,
                "Run exceeded memory budget"
            );
            return Err(MeridianError::ResourceExceeded {
                resource: Resource::Memory,
                limit: self.memory_budget_bytes,
                observed: total,
            });
        }
        Ok(())
    }

    /// Account for a buffer of `len` elements of `T`.
    pub fn charge_items<T>(&self, len: usize) -> Result<()> {
        self.charge((len as u64).saturating_mul(std::mem::size_of::<T>() as u64))
    }

    pub fn charged_bytes(&self) -> u64 {
        self.charged_bytes.load(Ordering::Relaxed)
    }
}
