//! Append-only budget ledger with one writer per campaign
//!
//! Each campaign's ledger lives inside its own actor task. All writes for
//! a campaign queue on that actor's mailbox, so concurrent decisions for
//! one campaign are strictly ordered while other campaigns proceed
//! independently. The per-tick budget is checked at append time, which is
//! the only path into the ledger.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::types::LedgerEntry;
use crate::error::{MeridianError, Result};
use crate::types::CampaignId;

/// Committed allocations for one campaign
#[derive(Debug, Clone)]
pub struct BudgetLedger {
    campaign_id: CampaignId,
    budgets: BTreeMap<u64, f64>,
    committed: BTreeMap<u64, f64>,
    entries: Vec<LedgerEntry>,
}

impl BudgetLedger {
    pub fn new(campaign_id: CampaignId) -> Self {
        Self {
            campaign_id,
            budgets: BTreeMap::new(),
            committed: BTreeMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn campaign_id(&self) -> &CampaignId {
        &self.campaign_id
    }

    /// Set the budget for `tick`. Reopening with the same budget is a no-op.
    pub fn open_tick(&mut self, tick: u64, budget: f64) -> Result<()> {
        if !budget.is_finite() || budget < 0.0 {
            return Err(MeridianError::DataQuality(format!("tick {tick} budget {budget}")));
        }
        match self.budgets.get(&tick) {
            Some(existing) if *existing == budget => Ok(()),
            Some(existing) => Err(MeridianError::InvalidTransition {
                from: format!("tick {tick} open with budget {existing}"),
                event: format!("reopen with budget {budget}"),
            }),
            None => {
                self.budgets.insert(tick, budget);
                Ok(())
            }
        }
    }

    pub fn budget(&self, tick: u64) -> Option<f64> {
        self.budgets.get(&tick).copied()
    }

    pub fn committed(&self, tick: u64) -> f64 {
        self.committed.get(&tick).copied().unwrap_or(0.0)
    }

    pub fn remaining(&self, tick: u64) -> Option<f64> {
        self.budget(tick).map(|b| (b - self.committed(tick)).max(0.0))
    }

    /// Append one decision's rows, all or nothing.
    ///
    /// Rows must share one tick that has been opened; the tick's committed
    /// total may not exceed its budget.
    pub fn append(&mut self, rows: Vec<LedgerEntry>) -> Result<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let tick = first.tick;
        for row in &rows {
            if row.tick != tick || row.campaign_id != self.campaign_id {
                return Err(MeridianError::DataQuality(format!(
                    "ledger rows for {} tick {tick} mixed with {} tick {}",
                    self.campaign_id, row.campaign_id, row.tick
                )));
            }
            if !row.amount.is_finite() || row.amount < 0.0 {
                return Err(MeridianError::DataQuality(format!("ledger amount {}", row.amount)));
            }
        }
        let budget = self
            .budget(tick)
            .ok_or_else(|| MeridianError::NotFound(format!("budget for {} tick {tick}", self.campaign_id)))?;
        let requested: f64 = rows.iter().map(|r| r.amount).sum();
        let committed = self.committed(tick);
        if committed + requested > budget {
            warn!(
                campaign = %self.campaign_id,
                tick,
                requested,
                committed,
                budget,
                "Refusing over-allocation"
            );
            return Err(MeridianError::BudgetExceeded {
                tick,
                requested,
                remaining: (budget - committed).max(0.0),
            });
        }
        *self.committed.entry(tick).or_insert(0.0) += requested;
        self.entries.extend(rows);
        Ok(())
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn entries_for_tick(&self, tick: u64) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(move |e| e.tick == tick)
    }
}

enum LedgerCommand {
    OpenTick {
        tick: u64,
        budget: f64,
        reply: oneshot::Sender<Result<()>>,
    },
    Append {
        rows: Vec<LedgerEntry>,
        reply: oneshot::Sender<Result<()>>,
    },
    Remaining {
        tick: u64,
        reply: oneshot::Sender<Option<f64>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<LedgerEntry>>,
    },
}

async fn ledger_actor(mut ledger: BudgetLedger, mut rx: mpsc::Receiver<LedgerCommand>) {
    debug!(campaign = %ledger.campaign_id(), "Ledger actor started");
    while let Some(command) = rx.recv().await {
        // a dropped reply means the caller gave up; the write still stands
        match command {
            LedgerCommand::OpenTick { tick, budget, reply } => {
                let _ = reply.send(ledger.open_tick(tick, budget));
            }
            LedgerCommand::Append { rows, reply } => {
                let _ = reply.send(ledger.append(rows));
            }
            LedgerCommand::Remaining { tick, reply } => {
                let _ = reply.send(ledger.remaining(tick));
            }
            LedgerCommand::Snapshot { reply } => {
                let _ = reply.send(ledger.entries().to_vec());
            }
        }
    }
    debug!(campaign = %ledger.campaign_id(), "Ledger actor stopped");
}

/// Handle to one campaign's ledger actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    campaign_id: CampaignId,
    tx: mpsc::Sender<LedgerCommand>,
}

impl LedgerHandle {
    /// Spawn an actor owning a fresh ledger. Must be called inside a tokio runtime.
    pub fn spawn(campaign_id: CampaignId, mailbox: usize) -> Self {
        let (tx, rx) = mpsc::channel(mailbox.max(1));
        tokio::spawn(ledger_actor(BudgetLedger::new(campaign_id.clone()), rx));
        Self { campaign_id, tx }
    }

    pub fn campaign_id(&self) -> &CampaignId {
        &self.campaign_id
    }

    async fn call<T>(&self, command: LedgerCommand, rx: oneshot::Receiver<T>) -> Result<T> {
        let closed = || MeridianError::ChannelClosed(format!("ledger for {}", self.campaign_id));
        self.tx.send(command).await.map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }

    pub async fn open_tick(&self, tick: u64, budget: f64) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(LedgerCommand::OpenTick { tick, budget, reply }, rx).await?
    }

    pub async fn append(&self, rows: Vec<LedgerEntry>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(LedgerCommand::Append { rows, reply }, rx).await?
    }

    pub async fn remaining(&self, tick: u64) -> Result<Option<f64>> {
        let (reply, rx) = oneshot::channel();
        self.call(LedgerCommand::Remaining { tick, reply }, rx).await
    }

    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let (reply, rx) = oneshot::channel();
        self.call(LedgerCommand::Snapshot { reply }, rx).await
    }
}

/// Ledger actors by campaign, spawned on first use
#[derive(Debug)]
pub struct LedgerRegistry {
    handles: DashMap<CampaignId, LedgerHandle>,
    mailbox: usize,
}

impl LedgerRegistry {
    pub fn new(mailbox: usize) -> Self {
        Self {
            handles: DashMap::new(),
            mailbox,
        }
    }

    /// Handle for `campaign_id`, spawning its actor if needed.
    pub fn handle(&self, campaign_id: &CampaignId) -> LedgerHandle {
        self.handles
            .entry(campaign_id.clone())
            .or_insert_with(|| LedgerHandle::spawn(campaign_id.clone(), self.mailbox))
            .clone()
    }

    pub fn get(&self, campaign_id: &CampaignId) -> Option<LedgerHandle> {
        self.handles.get(campaign_id).map(|h| h.clone())
    }

    pub fn campaigns(&self) -> Vec<CampaignId> {
        let mut ids: Vec<CampaignId> = self.handles.iter().map(|h| h.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Every committed entry across campaigns, in campaign order.
    pub async fn all_entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut all = Vec::new();
        for campaign in self.campaigns() {
            if let Some(handle) = self.get(&campaign) {
                all.extend(handle.entries().await?);
            }
        }
        Ok(all)
    }

    /// Drop every handle so idle actors stop.
    pub fn close(&self) {
        self.handles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArmId;
    use chrono::Utc;
    use uuid::Uuid;

    fn row(campaign: &str, tick: u64, arm: &str, amount: f64) -> LedgerEntry {
        LedgerEntry {
            tick,
            campaign_id: CampaignId::new(campaign),
            arm_id: ArmId::new(arm),
            amount,
            rationale: "test".into(),
            needs_human: false,
            decision_id: Uuid::now_v7(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_within_budget() {
        let mut ledger = BudgetLedger::new("c".into());
        ledger.open_tick(1, 100.0).unwrap();
        ledger.append(vec![row("c", 1, "a", 60.0), row("c", 1, "b", 40.0)]).unwrap();
        assert_eq!(ledger.remaining(1), Some(0.0));
        assert_eq!(ledger.entries().len(), 2);
    }

    #[test]
    fn test_over_allocation_refused_whole() {
        let mut ledger = BudgetLedger::new("c".into());
        ledger.open_tick(1, 100.0).unwrap();
        ledger.append(vec![row("c", 1, "a", 70.0)]).unwrap();
        let err = ledger
            .append(vec![row("c", 1, "a", 20.0), row("c", 1, "b", 20.0)])
            .unwrap_err();
        assert!(matches!(err, MeridianError::BudgetExceeded { tick: 1, .. }));
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.committed(1), 70.0);
    }

    #[test]
    fn test_any_excess_over_budget_refused() {
        let mut ledger = BudgetLedger::new("c".into());
        ledger.open_tick(1, 1_000_000.0).unwrap();
        let err = ledger.append(vec![row("c", 1, "a", 1_000_000.0005)]).unwrap_err();
        assert!(matches!(err, MeridianError::BudgetExceeded { .. }));
        assert_eq!(ledger.committed(1), 0.0);

        ledger.append(vec![row("c", 1, "a", 1_000_000.0)]).unwrap();
        assert_eq!(ledger.remaining(1), Some(0.0));
    }

    #[test]
    fn test_unopened_tick_and_reopen() {
        let mut ledger = BudgetLedger::new("c".into());
        assert!(matches!(
            ledger.append(vec![row("c", 9, "a", 1.0)]),
            Err(MeridianError::NotFound(_))
        ));
        ledger.open_tick(2, 50.0).unwrap();
        ledger.open_tick(2, 50.0).unwrap();
        assert!(ledger.open_tick(2, 80.0).is_err());
    }

    #[test]
    fn test_rows_must_match_campaign_and_tick() {
        let mut ledger = BudgetLedger::new("c".into());
        ledger.open_tick(1, 100.0).unwrap();
        assert!(ledger.append(vec![row("other", 1, "a", 1.0)]).is_err());
        assert!(ledger.append(vec![row("c", 1, "a", 1.0), row("c", 2, "a", 1.0)]).is_err());
        assert!(ledger.append(vec![row("c", 1, "a", -1.0)]).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_overspend() {
        let registry = std::sync::Arc::new(LedgerRegistry::new(16));
        let campaign = CampaignId::new("c");
        registry.handle(&campaign).open_tick(1, 100.0).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let registry = std::sync::Arc::clone(&registry);
            let campaign = campaign.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .handle(&campaign)
                    .append(vec![row("c", 1, &format!("a{i}"), 15.0)])
                    .await
            }));
        }
        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 6);
        let handle = registry.handle(&campaign);
        assert!((handle.remaining(1).await.unwrap().unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(registry.all_entries().await.unwrap().len(), 6);
    }
}
