//! Core utilities shared by every vkcrt crate.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Run configuration ([`RenderConfig`])

mod config;
mod error;
mod logging;
mod timer;

pub use config::{MAX_DIMENSION, RenderConfig, SharedResourceKind};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FrameTimer, IntervalStats};
