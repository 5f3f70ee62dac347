//! Applies a merged wdiff stream to a target device via async IO.

pub mod engine;
pub mod ring;
pub mod stats;

pub use engine::{device_size_lb, DiscardMode, RedoConfig, RedoEngine, RedoError};
pub use stats::RedoStats;
