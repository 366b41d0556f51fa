//! Delivery queue state machine.
//!
//! Pure and synchronous: every time-dependent method takes the current
//! instant, so the worker (or a test) decides what "now" is. The single
//! debounce timer lives here and is only armed or cancelled by the state
//! transitions below.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use places_harvest::NormalizedRecord;

use crate::status::Stats;

/// Flush threshold and debounce delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub batch_size: usize,
    pub debounce: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            debounce: Duration::from_millis(5_000),
        }
    }
}

/// Snapshot of queued records taken for one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: Uuid,
    records: Vec<NormalizedRecord>,
}

impl Batch {
    fn new(records: Vec<NormalizedRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            records,
        }
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }
}

/// Where the queue is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
    /// Nothing queued, nothing in flight.
    Idle,
    /// Records queued, waiting on the debounce timer.
    Accumulating,
    /// A batch is in flight; new records accumulate separately.
    Flushing,
}

#[derive(Debug, Default)]
struct DebounceTimer {
    deadline: Option<Instant>,
}

impl DebounceTimer {
    fn arm(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }
}

/// Pending records, the debounce timer, and delivery counters.
#[derive(Debug)]
pub struct QueueState {
    records: VecDeque<NormalizedRecord>,
    timer: DebounceTimer,
    in_flight: bool,
    /// A flush was requested while a batch was in flight.
    flush_deferred: bool,
    stats: Stats,
    settings: QueueSettings,
}

impl QueueState {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            records: VecDeque::new(),
            timer: DebounceTimer::default(),
            in_flight: false,
            flush_deferred: false,
            stats: Stats::default(),
            settings: QueueSettings {
                batch_size: settings.batch_size.max(1),
                ..settings
            },
        }
    }

    /// Append a record. Returns a batch when the flush threshold is reached;
    /// otherwise (re)arms the debounce timer.
    pub fn enqueue(&mut self, record: NormalizedRecord, now: Instant) -> Option<Batch> {
        self.records.push_back(record);
        self.timer.cancel();

        if self.records.len() >= self.settings.batch_size {
            self.flush()
        } else {
            self.timer.arm(now, self.settings.debounce);
            None
        }
    }

    /// Fire the debounce timer if it is due.
    pub fn poll_timer(&mut self, now: Instant) -> Option<Batch> {
        if !self.timer.is_due(now) {
            return None;
        }
        self.timer.cancel();
        self.flush()
    }

    /// Take the whole queue as a batch. No-op when empty; deferred while
    /// another batch is in flight.
    pub fn flush(&mut self) -> Option<Batch> {
        if self.records.is_empty() {
            return None;
        }
        if self.in_flight {
            self.flush_deferred = true;
            return None;
        }

        self.timer.cancel();
        let batch = Batch::new(self.records.drain(..).collect());
        self.stats.pending += batch.len() as u64;
        self.in_flight = true;
        Some(batch)
    }

    /// Record a successful delivery. Returns the next batch if a flush was
    /// deferred or the threshold was reached during the flight.
    pub fn delivered(&mut self, batch: &Batch, now: Instant) -> Option<Batch> {
        let size = batch.len() as u64;
        self.in_flight = false;
        self.stats.sent += size;
        self.stats.pending = self.stats.pending.saturating_sub(size);

        if std::mem::take(&mut self.flush_deferred)
            || self.records.len() >= self.settings.batch_size
        {
            return self.flush();
        }
        if !self.records.is_empty() && self.timer.deadline.is_none() {
            self.timer.arm(now, self.settings.debounce);
        }
        None
    }

    /// Record a failed delivery: the batch goes back to the front of the
    /// queue in its original order and the timer is re-armed.
    pub fn failed(&mut self, batch: Batch, now: Instant) {
        let size = batch.len() as u64;
        self.in_flight = false;
        self.flush_deferred = false;
        self.stats.errors += size;
        self.stats.pending = self.stats.pending.saturating_sub(size);

        for record in batch.into_records().into_iter().rev() {
            self.records.push_front(record);
        }
        self.timer.arm(now, self.settings.debounce);
    }

    pub fn phase(&self) -> QueuePhase {
        if self.in_flight {
            QueuePhase::Flushing
        } else if self.records.is_empty() {
            QueuePhase::Idle
        } else {
            QueuePhase::Accumulating
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn settings(&self) -> QueueSettings {
        self.settings
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn queued(&self) -> impl Iterator<Item = &NormalizedRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEBOUNCE: Duration = Duration::from_millis(5_000);

    fn settings(batch_size: usize) -> QueueSettings {
        QueueSettings {
            batch_size,
            debounce: DEBOUNCE,
        }
    }

    fn record(name: &str) -> NormalizedRecord {
        NormalizedRecord::from(json!({ "name": name }).as_object().cloned().unwrap())
    }

    fn names<'a>(records: impl Iterator<Item = &'a NormalizedRecord>) -> Vec<String> {
        records
            .map(|r| r.name().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_enqueue_arms_single_timer() {
        let t0 = Instant::now();
        let mut q = QueueState::new(settings(10));
        assert_eq!(q.phase(), QueuePhase::Idle);

        assert!(q.enqueue(record("a"), t0).is_none());
        assert_eq!(q.deadline(), Some(t0 + DEBOUNCE));
        assert_eq!(q.phase(), QueuePhase::Accumulating);

        // Re-enqueue pushes the single deadline out.
        let t1 = t0 + Duration::from_millis(1_000);
        assert!(q.enqueue(record("b"), t1).is_none());
        assert_eq!(q.deadline(), Some(t1 + DEBOUNCE));
    }

    #[test]
    fn test_threshold_flushes_immediately() {
        let t0 = Instant::now();
        let mut q = QueueState::new(settings(3));
        assert!(q.enqueue(record("a"), t0).is_none());
        assert!(q.enqueue(record("b"), t0).is_none());

        let batch = q.enqueue(record("c"), t0).expect("threshold flush");
        assert_eq!(names(batch.records().iter()), vec!["a", "b", "c"]);
        assert!(q.deadline().is_none());
        assert!(q.is_empty());
        assert_eq!(q.stats().pending, 3);
        assert_eq!(q.phase(), QueuePhase::Flushing);
    }

    #[test]
    fn test_timer_flushes_everything_in_order() {
        let t0 = Instant::now();
        let mut q = QueueState::new(settings(10));
        for name in ["a", "b", "c"] {
            q.enqueue(record(name), t0);
        }

        assert!(q.poll_timer(t0 + DEBOUNCE - Duration::from_millis(1)).is_none());
        let batch = q.poll_timer(t0 + DEBOUNCE).expect("debounce flush");
        assert_eq!(names(batch.records().iter()), vec!["a", "b", "c"]);
        assert!(q.poll_timer(t0 + DEBOUNCE * 3).is_none());
    }

    #[test]
    fn test_flush_on_empty_is_noop() {
        let mut q = QueueState::new(settings(10));
        assert!(q.flush().is_none());
        assert_eq!(q.stats(), Stats::default());
    }

    #[test]
    fn test_success_updates_counters() {
        let t0 = Instant::now();
        let mut q = QueueState::new(settings(2));
        q.enqueue(record("a"), t0);
        let batch = q.enqueue(record("b"), t0).unwrap();

        assert!(q.delivered(&batch, t0).is_none());
        assert_eq!(
            q.stats(),
            Stats {
                sent: 2,
                errors: 0,
                pending: 0
            }
        );
        assert_eq!(q.phase(), QueuePhase::Idle);
    }

    #[test]
    fn test_failure_requeues_at_front_in_order() {
        let t0 = Instant::now();
        let mut q = QueueState::new(settings(3));
        q.enqueue(record("a"), t0);
        q.enqueue(record("b"), t0);
        let batch = q.enqueue(record("c"), t0).unwrap();

        // New arrivals while the batch is in flight.
        q.enqueue(record("d"), t0);
        q.enqueue(record("e"), t0);

        let t1 = t0 + Duration::from_millis(200);
        q.failed(batch, t1);

        assert_eq!(names(q.queued()), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(
            q.stats(),
            Stats {
                sent: 0,
                errors: 3,
                pending: 0
            }
        );
        assert_eq!(q.deadline(), Some(t1 + DEBOUNCE));
        assert_eq!(q.phase(), QueuePhase::Accumulating);
    }

    #[test]
    fn test_retry_after_failure_resends_same_records() {
        let t0 = Instant::now();
        let mut q = QueueState::new(settings(10));
        q.enqueue(record("a"), t0);
        let first = q.poll_timer(t0 + DEBOUNCE).unwrap();
        q.failed(first, t0 + DEBOUNCE);

        let retry = q.poll_timer(t0 + DEBOUNCE * 2).expect("retry flush");
        assert_eq!(names(retry.records().iter()), vec!["a"]);
        assert!(q.delivered(&retry, t0 + DEBOUNCE * 2).is_none());
        assert_eq!(
            q.stats(),
            Stats {
                sent: 1,
                errors: 1,
                pending: 0
            }
        );
    }

    #[test]
    fn test_single_batch_in_flight() {
        let t0 = Instant::now();
        let mut q = QueueState::new(settings(2));
        q.enqueue(record("a"), t0);
        let first = q.enqueue(record("b"), t0).unwrap();

        // Threshold reached again mid-flight: deferred, not a second batch.
        q.enqueue(record("c"), t0);
        assert!(q.enqueue(record("d"), t0).is_none());
        assert!(q.deadline().is_none());

        let second = q.delivered(&first, t0).expect("deferred flush runs on success");
        assert_eq!(names(second.records().iter()), vec!["c", "d"]);
    }

    #[test]
    fn test_timer_during_flight_defers() {
        let t0 = Instant::now();
        let mut q = QueueState::new(settings(10));
        q.enqueue(record("a"), t0);
        let first = q.poll_timer(t0 + DEBOUNCE).unwrap();

        q.enqueue(record("b"), t0 + DEBOUNCE);
        assert!(q.poll_timer(t0 + DEBOUNCE * 2).is_none());
        assert!(q.deadline().is_none());

        let next = q.delivered(&first, t0 + DEBOUNCE * 2).unwrap();
        assert_eq!(names(next.records().iter()), vec!["b"]);
    }

    #[test]
    fn test_failure_clears_deferred_flush() {
        let t0 = Instant::now();
        let mut q = QueueState::new(settings(1));
        let first = q.enqueue(record("a"), t0).unwrap();
        assert!(q.enqueue(record("b"), t0).is_none());

        q.failed(first, t0);
        assert!(!q.is_in_flight());
        assert_eq!(names(q.queued()), vec!["a", "b"]);
        assert_eq!(q.deadline(), Some(t0 + DEBOUNCE));
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let q = QueueState::new(settings(0));
        assert_eq!(q.settings().batch_size, 1);
    }
}
