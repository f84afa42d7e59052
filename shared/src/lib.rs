//! Shared types and utilities for perfstack
//!
//! This crate contains the time-series and telemetry types passed between the
//! sampler process, the coordinator and the renderers.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{reading::*, sample::*};
