//! Data model for sampled host telemetry

pub mod reading;
pub mod sample;
