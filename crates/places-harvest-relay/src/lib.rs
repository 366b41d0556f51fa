//! places-harvest relay: captures map search responses, extracts places
//! and delivers them to a collector in debounced batches.

pub mod config;
pub mod delivery;
pub mod health;
pub mod pipeline;
pub mod queries;
#[cfg(feature = "server")]
pub mod server;
pub mod status;
pub mod transport;
pub mod types;

pub use config::{load_config, RelayConfig};
pub use delivery::{Collector, DeliveryQueue, HttpCollector, QueueSettings};
pub use health::HealthMonitor;
pub use pipeline::{CapturePipeline, CaptureSummary, RecordSink};
pub use queries::{QueryRunner, SearchDelay, SearchQuery};
pub use status::{RelayStatus, ShutdownReport, Stats, StatusBoard, StatusSnapshot};
pub use transport::{CaptureInterceptor, HttpRequest, HttpResponse, ReqwestTransport, Transport};
