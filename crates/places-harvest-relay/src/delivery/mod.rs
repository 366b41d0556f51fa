//! Batched, debounced delivery of records to the collector.

pub mod collector;
pub mod queue;
pub mod worker;

pub use collector::{Collector, DeliveryReceipt, HttpCollector};
pub use queue::{Batch, QueuePhase, QueueSettings, QueueState};
pub use worker::{DeliveryQueue, QueueCommand};
