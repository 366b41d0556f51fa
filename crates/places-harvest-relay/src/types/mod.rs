//! Shared relay types.

pub mod error;

pub use error::*;
