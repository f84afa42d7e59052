//! Time series of paired metric values
//!
//! Every metric group the sampler records (CPU/RAM, or one GPU's
//! utilization/memory) is a [`Series`] of [`Sample`]s carrying two co-indexed
//! values. Timestamps are seconds since sampling began and must strictly
//! increase; the series is append-only while sampling runs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single observation of two co-indexed metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds elapsed since sampling began
    pub timestamp: f64,

    /// First metric (CPU%, or GPU utilization%)
    pub value_a: f64,

    /// Second metric (RAM%, or GPU memory%)
    pub value_b: f64,
}

impl Sample {
    pub fn new(timestamp: f64, value_a: f64, value_b: f64) -> Self {
        Self {
            timestamp,
            value_a,
            value_b,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("timestamp {next} does not follow {previous}")]
    NonIncreasingTimestamp { previous: f64, next: f64 },

    #[error("invalid timestamp {0}")]
    InvalidTimestamp(f64),
}

/// Ordered samples for one metric group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    samples: Vec<Sample>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from samples, validating ordering
    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Result<Self, SeriesError> {
        let mut series = Self::new();
        for sample in samples {
            series.push(sample)?;
        }
        Ok(series)
    }

    /// Append a sample. Rejects timestamps that are negative, non-finite, or not
    /// strictly after the previous sample.
    pub fn push(&mut self, sample: Sample) -> Result<(), SeriesError> {
        if !sample.timestamp.is_finite() || sample.timestamp < 0.0 {
            return Err(SeriesError::InvalidTimestamp(sample.timestamp));
        }
        if let Some(last) = self.samples.last() {
            if sample.timestamp <= last.timestamp {
                return Err(SeriesError::NonIncreasingTimestamp {
                    previous: last.timestamp,
                    next: sample.timestamp,
                });
            }
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Timestamp of the last sample, or 0 for an empty series
    pub fn span(&self) -> f64 {
        self.last().map(|s| s.timestamp).unwrap_or(0.0)
    }

    /// Largest value of the first metric (0 for an empty series)
    pub fn max_a(&self) -> f64 {
        self.samples.iter().map(|s| s.value_a).fold(0.0, f64::max)
    }

    /// Largest value of the second metric (0 for an empty series)
    pub fn max_b(&self) -> f64 {
        self.samples.iter().map(|s| s.value_b).fold(0.0, f64::max)
    }
}

/// Maxima of both metrics across sibling series.
///
/// Used to put every GPU panel on one vertical scale.
pub fn shared_maxima<'a>(series: impl IntoIterator<Item = &'a Series>) -> (f64, f64) {
    series
        .into_iter()
        .fold((0.0, 0.0), |(a, b), s| (f64::max(a, s.max_a()), f64::max(b, s.max_b())))
}
