//! Online anomaly loop
//!
//! Consumes metric points, refreshes fatigue forecasts from the insight
//! store when a newer predictive run has been published, and forwards
//! anomalies downstream. Each point has a hard deadline covering scoring
//! and delivery; a late point counts as failed and its alert is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::AnomalyEngine;
use super::types::{Anomaly, DetectionOutcome, MetricPoint};
use crate::store::InsightStore;

/// Result of running the anomaly loop.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsumerLoopResult {
    /// Loop stopped due to shutdown signal.
    Shutdown,
    /// Loop stopped because the point stream closed.
    Closed,
}

/// Where the loop reads from and writes to
#[derive(Debug)]
pub struct AnomalyLoopConfig {
    pub points: mpsc::Receiver<MetricPoint>,
    pub alerts: mpsc::Sender<Anomaly>,
    pub insights: Option<Arc<InsightStore>>,
    pub shutdown: CancellationToken,
}

/// Start the anomaly loop on its own task.
pub fn start_anomaly_loop(engine: AnomalyEngine, config: AnomalyLoopConfig) -> JoinHandle<ConsumerLoopResult> {
    info!("Starting anomaly loop");
    tokio::spawn(async move { anomaly_loop(engine, config).await })
}

fn refresh_fatigue(engine: &mut AnomalyEngine, insights: Option<&Arc<InsightStore>>) {
    // never waits on a batch run; whatever is published now is used
    if let Some(store) = insights
        && let Some(snapshot) = store.predictive().latest()
        && engine.fatigue_run() != Some(snapshot.payload.run_id)
    {
        engine.update_fatigue(&snapshot.payload);
    }
}

/// Score points as they arrive until shutdown or the stream closes.
pub async fn anomaly_loop(mut engine: AnomalyEngine, config: AnomalyLoopConfig) -> ConsumerLoopResult {
    let AnomalyLoopConfig {
        mut points,
        alerts,
        insights,
        shutdown,
    } = config;
    let limit = Duration::from_millis(engine.config().point_timeout_ms);
    info!(limit_ms = limit.as_millis() as u64, "Anomaly loop starting");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(summary = ?engine.summary(), "Anomaly loop received shutdown signal");
                return ConsumerLoopResult::Shutdown;
            }

            received = points.recv() => {
                let Some(point) = received else {
                    info!(summary = ?engine.summary(), "Anomaly point stream closed");
                    return ConsumerLoopResult::Closed;
                };
                let started = Instant::now();
                refresh_fatigue(&mut engine, insights.as_ref());

                let outcome = match engine.observe(&point) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(metric = %point.metric, error = %e, "Point rejected");
                        continue;
                    }
                };
                if started.elapsed() > limit {
                    warn!(metric = %point.metric, "Point scoring exceeded deadline, treated as failed");
                    continue;
                }
                let DetectionOutcome::Anomaly(anomaly) = outcome else {
                    continue;
                };

                let remaining = limit.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, alerts.send(anomaly)).await {
                    Ok(Ok(())) => debug!(metric = %point.metric, "Anomaly forwarded"),
                    Ok(Err(_)) => warn!(metric = %point.metric, "Alert receiver closed, anomaly dropped"),
                    Err(_) => warn!(metric = %point.metric, "Alert delivery missed deadline, anomaly dropped"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::types::{AnomalyConfig, Severity};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    fn minute(i: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + ChronoDuration::minutes(i)
    }

    #[tokio::test]
    async fn test_spike_forwarded_within_deadline() {
        let (point_tx, point_rx) = mpsc::channel(128);
        let (alert_tx, mut alert_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let handle = start_anomaly_loop(
            AnomalyEngine::new(AnomalyConfig::default()),
            AnomalyLoopConfig {
                points: point_rx,
                alerts: alert_tx,
                insights: None,
                shutdown: shutdown.clone(),
            },
        );

        for i in 0..30 {
            let value = 100.0 + (i % 5) as f64 - 2.0;
            point_tx.send(MetricPoint::new("revenue", minute(i), value)).await.unwrap();
        }
        let sent = Instant::now();
        point_tx.send(MetricPoint::new("revenue", minute(30), 500.0)).await.unwrap();
        let anomaly = alert_rx.recv().await.unwrap();
        assert!(sent.elapsed() < Duration::from_secs(1));
        assert_eq!(anomaly.severity, Severity::High);

        drop(point_tx);
        assert_eq!(handle.await.unwrap(), ConsumerLoopResult::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (_point_tx, point_rx) = mpsc::channel(1);
        let (alert_tx, _alert_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let handle = start_anomaly_loop(
            AnomalyEngine::new(AnomalyConfig::default()),
            AnomalyLoopConfig {
                points: point_rx,
                alerts: alert_tx,
                insights: None,
                shutdown: shutdown.clone(),
            },
        );
        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), ConsumerLoopResult::Shutdown);
    }
}
