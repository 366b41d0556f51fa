//! Periodic collector reachability probe.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::delivery::Collector;
use crate::status::StatusBoard;

/// Probes the collector and publishes the result on the status board.
///
/// Reachability is informational only: it never pauses or triggers delivery.
pub struct HealthMonitor {
    collector: Arc<dyn Collector>,
    status: StatusBoard,
    period: Duration,
}

impl HealthMonitor {
    pub fn new(collector: Arc<dyn Collector>, status: StatusBoard, period: Duration) -> Self {
        Self {
            collector,
            status,
            period,
        }
    }

    /// Run one probe and publish it.
    pub async fn check(&self) -> bool {
        let reachable = self.collector.probe().await;
        if reachable {
            tracing::debug!("Collector reachable");
        } else {
            tracing::warn!("Collector unreachable");
        }
        self.status.set_reachable(reachable);
        reachable
    }

    /// Probe immediately, then once per period, until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.check().await;
            }
        })
    }
}
