//! places-harvest: positional field extraction for map search payloads.

pub mod capture;
pub mod extract;
pub mod navigate;
pub mod types;

pub use capture::CaptureLayout;
pub use extract::{display_value, extract, extract_at, is_truthy};
pub use navigate::{has_index, navigate, navigate_segments};
pub use types::*;
