//! Delivery worker: owns the queue state and drives batches to the collector.
//!
//! Producers talk to the worker through an unbounded command channel, so
//! enqueueing never blocks the capture path. One batch is in flight at a
//! time; its outcome comes back on a completion channel.

use std::future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use places_harvest::NormalizedRecord;

use super::collector::{Collector, DeliveryReceipt};
use super::queue::{Batch, QueueSettings, QueueState};
use crate::pipeline::RecordSink;
use crate::status::{RelayStatus, ShutdownReport, StatusBoard};
use crate::types::{DeliveryError, RelayError, RelayResult};

/// Messages accepted by the delivery worker.
#[derive(Debug)]
pub enum QueueCommand {
    Enqueue(NormalizedRecord),
    Flush,
    /// Drain the queue, then reply with the final counters.
    Shutdown(oneshot::Sender<ShutdownReport>),
}

type Completion = (Batch, Result<DeliveryReceipt, DeliveryError>);

/// Handle to a running delivery worker. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<QueueCommand>,
}

impl DeliveryQueue {
    /// Start the worker on the current runtime.
    pub fn spawn(
        collector: Arc<dyn Collector>,
        settings: QueueSettings,
        status: StatusBoard,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            state: QueueState::new(settings),
            collector,
            status,
        };
        let handle = tokio::spawn(worker.run(rx));
        (Self { tx }, handle)
    }

    pub fn enqueue(&self, record: NormalizedRecord) -> RelayResult<()> {
        self.send(QueueCommand::Enqueue(record))
    }

    /// Deliver whatever is queued without waiting for the debounce timer.
    pub fn flush(&self) -> RelayResult<()> {
        self.send(QueueCommand::Flush)
    }

    /// Drain the queue and stop the worker. Draining stops at the first
    /// failed delivery; anything left is counted in
    /// [`ShutdownReport::undelivered`] and dropped.
    pub async fn shutdown(&self) -> RelayResult<ShutdownReport> {
        let (reply, rx) = oneshot::channel();
        self.send(QueueCommand::Shutdown(reply))?;
        rx.await.map_err(|_| RelayError::QueueClosed)
    }

    fn send(&self, command: QueueCommand) -> RelayResult<()> {
        self.tx.send(command).map_err(|_| RelayError::QueueClosed)
    }
}

impl RecordSink for DeliveryQueue {
    fn accept(&self, record: NormalizedRecord) {
        if self.enqueue(record).is_err() {
            tracing::warn!("Delivery queue closed, dropping record");
        }
    }
}

struct Worker {
    state: QueueState,
    collector: Arc<dyn Collector>,
    status: StatusBoard,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<QueueCommand>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut closing = false;
        let mut reply: Option<oneshot::Sender<ShutdownReport>> = None;

        loop {
            if closing && !self.state.is_in_flight() {
                break;
            }
            let deadline = if closing { None } else { self.state.deadline() };

            tokio::select! {
                command = commands.recv(), if !closing => {
                    let batch = match command {
                        Some(QueueCommand::Enqueue(record)) => {
                            let batch = self.state.enqueue(record, Instant::now());
                            if batch.is_none() && !self.state.is_in_flight() {
                                self.status.set(
                                    RelayStatus::Connected,
                                    format!("Queued: {} items", self.state.len()),
                                );
                            }
                            batch
                        }
                        Some(QueueCommand::Flush) => self.state.flush(),
                        Some(QueueCommand::Shutdown(tx)) => {
                            tracing::debug!("Delivery queue shutting down");
                            reply = Some(tx);
                            closing = true;
                            self.state.flush()
                        }
                        None => {
                            closing = true;
                            self.state.flush()
                        }
                    };
                    self.publish();
                    if let Some(batch) = batch {
                        self.dispatch(batch, &done_tx);
                    }
                }
                _ = wait_for(deadline) => {
                    if let Some(batch) = self.state.poll_timer(Instant::now()) {
                        self.dispatch(batch, &done_tx);
                    }
                }
                Some((batch, result)) = done_rx.recv() => {
                    let next = self.complete(batch, result, closing);
                    self.publish();
                    if let Some(batch) = next {
                        self.dispatch(batch, &done_tx);
                    }
                }
            }
        }

        if !self.state.is_empty() {
            tracing::warn!(
                "Delivery queue stopped with {} undelivered records",
                self.state.len()
            );
        }
        self.publish();
        if let Some(tx) = reply {
            let _ = tx.send(ShutdownReport {
                stats: self.state.stats(),
                undelivered: self.state.len(),
            });
        }
    }

    /// Apply a delivery outcome; returns the next batch to send, if any.
    fn complete(
        &mut self,
        batch: Batch,
        result: Result<DeliveryReceipt, DeliveryError>,
        closing: bool,
    ) -> Option<Batch> {
        let now = Instant::now();
        match result {
            Ok(receipt) => {
                tracing::info!("Batch {} delivered: {} saved", batch.id, receipt.saved);
                self.status.record_delivery(chrono::Utc::now());
                self.status.set(
                    RelayStatus::Connected,
                    format!("Last batch: {} saved", receipt.saved),
                );
                let next = self.state.delivered(&batch, now);
                if closing {
                    next.or_else(|| self.state.flush())
                } else {
                    next
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Batch {} failed ({} records requeued): {e}",
                    batch.id,
                    batch.len()
                );
                self.status.set(RelayStatus::Error, format!("Error: {e}"));
                self.state.failed(batch, now);
                None
            }
        }
    }

    fn dispatch(&self, batch: Batch, done: &mpsc::UnboundedSender<Completion>) {
        tracing::debug!("Sending batch {} ({} records)", batch.id, batch.len());
        self.status.set(
            RelayStatus::Sending,
            format!("Sending {} items...", batch.len()),
        );
        self.publish();

        let collector = self.collector.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let result = collector.deliver(batch.records()).await;
            let _ = done.send((batch, result));
        });
    }

    fn publish(&self) {
        self.status.record_queue(self.state.stats(), self.state.len());
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Stats;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DEBOUNCE: Duration = Duration::from_millis(5_000);

    /// Collector that reports each batch's names and fails the first
    /// `failures` deliveries.
    struct ScriptedCollector {
        batches: mpsc::UnboundedSender<Vec<String>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl Collector for ScriptedCollector {
        async fn deliver(
            &self,
            records: &[NormalizedRecord],
        ) -> Result<DeliveryReceipt, DeliveryError> {
            let names = records
                .iter()
                .map(|r| r.name().unwrap_or_default().to_string())
                .collect();
            let _ = self.batches.send(names);

            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                Err(DeliveryError::Status(500))
            } else {
                Ok(DeliveryReceipt {
                    saved: records.len(),
                })
            }
        }

        async fn probe(&self) -> bool {
            true
        }
    }

    fn record(name: &str) -> NormalizedRecord {
        NormalizedRecord::from(json!({ "name": name }).as_object().cloned().unwrap())
    }

    fn start(
        batch_size: usize,
        failures: usize,
    ) -> (
        DeliveryQueue,
        JoinHandle<()>,
        StatusBoard,
        mpsc::UnboundedReceiver<Vec<String>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let collector = Arc::new(ScriptedCollector {
            batches: tx,
            failures: AtomicUsize::new(failures),
        });
        let status = StatusBoard::new();
        let (queue, handle) = DeliveryQueue::spawn(
            collector,
            QueueSettings {
                batch_size,
                debounce: DEBOUNCE,
            },
            status.clone(),
        );
        (queue, handle, status, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_sends_without_waiting() {
        let (queue, _handle, status, mut batches) = start(3, 0);
        let started = Instant::now();

        for name in ["a", "b", "c"] {
            queue.enqueue(record(name)).unwrap();
        }

        assert_eq!(batches.recv().await.unwrap(), vec!["a", "b", "c"]);
        assert!(started.elapsed() < DEBOUNCE);

        let report = queue.shutdown().await.unwrap();
        assert_eq!(report.stats.sent, 3);
        assert!(report.is_complete());
        assert_eq!(status.snapshot().message, "Last batch: 3 saved");
        assert!(status.snapshot().last_delivery.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_sends_once_in_order() {
        let (queue, _handle, status, mut batches) = start(10, 0);
        let started = Instant::now();

        queue.enqueue(record("a")).unwrap();
        queue.enqueue(record("b")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(status.snapshot().message, "Queued: 2 items");

        assert_eq!(batches.recv().await.unwrap(), vec!["a", "b"]);
        assert!(started.elapsed() >= DEBOUNCE);

        // Nothing else is sent after the single debounce flush.
        tokio::time::sleep(DEBOUNCE * 3).await;
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_retried_in_order() {
        let (queue, _handle, status, mut batches) = start(2, 1);

        queue.enqueue(record("a")).unwrap();
        queue.enqueue(record("b")).unwrap();
        assert_eq!(batches.recv().await.unwrap(), vec!["a", "b"]);

        queue.enqueue(record("c")).unwrap();
        assert_eq!(batches.recv().await.unwrap(), vec!["a", "b", "c"]);

        let report = queue.shutdown().await.unwrap();
        assert_eq!(
            report.stats,
            Stats {
                sent: 3,
                errors: 2,
                pending: 0
            }
        );
        assert_eq!(report.undelivered, 0);
        assert_eq!(status.snapshot().status, RelayStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_sets_error_status() {
        let (queue, _handle, status, mut batches) = start(1, 1);
        queue.enqueue(record("a")).unwrap();
        batches.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snap = status.snapshot();
        assert_eq!(snap.status, RelayStatus::Error);
        assert_eq!(snap.message, "Error: HTTP 500");
        assert_eq!(snap.stats.errors, 1);
        assert_eq!(snap.queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_command_skips_debounce() {
        let (queue, _handle, _status, mut batches) = start(10, 0);
        let started = Instant::now();

        queue.enqueue(record("a")).unwrap();
        queue.flush().unwrap();

        assert_eq!(batches.recv().await.unwrap(), vec!["a"]);
        assert!(started.elapsed() < DEBOUNCE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_pending_records() {
        let (queue, handle, _status, mut batches) = start(10, 0);
        queue.enqueue(record("a")).unwrap();
        queue.enqueue(record("b")).unwrap();

        let report = queue.shutdown().await.unwrap();
        assert_eq!(report.stats.sent, 2);
        assert_eq!(batches.recv().await.unwrap(), vec!["a", "b"]);

        handle.await.unwrap();
        assert!(matches!(
            queue.enqueue(record("late")),
            Err(RelayError::QueueClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_after_failure() {
        let (queue, handle, _status, _batches) = start(10, usize::MAX);
        queue.enqueue(record("a")).unwrap();

        let report = queue.shutdown().await.unwrap();
        assert_eq!(
            report,
            ShutdownReport {
                stats: Stats {
                    sent: 0,
                    errors: 1,
                    pending: 0
                },
                undelivered: 1,
            }
        );
        assert!(!report.is_complete());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecovered_collector_retried_every_interval() {
        let (queue, _handle, status, mut batches) = start(10, usize::MAX);
        let started = Instant::now();
        queue.enqueue(record("a")).unwrap();

        // First attempt after one debounce, then one retry per interval.
        for attempt in 1..=5u32 {
            assert_eq!(batches.recv().await.unwrap(), vec!["a"]);
            let elapsed = started.elapsed();
            assert!(elapsed >= DEBOUNCE * attempt);
            assert!(elapsed < DEBOUNCE * attempt + Duration::from_secs(1));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snap = status.snapshot();
        assert_eq!(snap.stats.errors, 5);
        assert_eq!(snap.stats.sent, 0);
        assert_eq!(snap.queued, 1);
        assert!(batches.try_recv().is_err());
    }
}
