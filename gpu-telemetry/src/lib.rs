//! GPU telemetry
//!
//! Enumerates GPUs once and reads per-device compute and memory utilization.
//! Hosts without a usable driver get no [`DeviceSet`] at all, so callers never
//! retry enumeration in their sampling loop.

#[cfg(feature = "nvml")]
mod nvml;

use perfstack_shared::{DeviceIndex, GpuReading};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("GPU telemetry unavailable: {0}")]
    Unavailable(String),

    #[error("GPU {device}: {message}")]
    Device { device: DeviceIndex, message: String },

    #[error("unknown GPU index {0}")]
    UnknownDevice(DeviceIndex),
}

/// Per-device utilization queries
pub trait GpuTelemetry {
    /// Device indices enumerated at startup, ascending
    fn devices(&self) -> &[DeviceIndex];

    /// Read the current utilization of one device
    fn read(&self, device: DeviceIndex) -> Result<GpuReading, GpuError>;
}

/// The GPUs visible on this host, fixed for the lifetime of a run
pub struct DeviceSet {
    #[cfg(feature = "nvml")]
    backend: nvml::NvmlBackend,
    indices: Vec<DeviceIndex>,
    names: Vec<String>,
}

impl DeviceSet {
    /// Enumerate GPUs. Returns `None` when telemetry is unavailable or no device
    /// is present.
    pub fn detect() -> Option<Self> {
        match Self::try_detect() {
            Ok(set) if set.is_empty() => {
                info!("No GPUs detected; GPU sampling disabled");
                None
            }
            Ok(set) => {
                info!("Detected {} GPU(s)", set.len());
                for &device in &set.indices {
                    info!("  GPU {}: {}", device, set.name(device).unwrap_or("unknown"));
                }
                Some(set)
            }
            Err(e) => {
                info!("{}; GPU sampling disabled", e);
                None
            }
        }
    }

    #[cfg(feature = "nvml")]
    fn try_detect() -> Result<Self, GpuError> {
        let (backend, devices) = nvml::NvmlBackend::init()?;
        let (indices, names) = devices.into_iter().unzip();
        Ok(Self {
            backend,
            indices,
            names,
        })
    }

    #[cfg(not(feature = "nvml"))]
    fn try_detect() -> Result<Self, GpuError> {
        Err(GpuError::Unavailable(
            "built without GPU telemetry support".to_string(),
        ))
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Product name of a device, if known
    pub fn name(&self, device: DeviceIndex) -> Option<&str> {
        self.indices
            .iter()
            .position(|&i| i == device)
            .map(|pos| self.names[pos].as_str())
    }
}

impl GpuTelemetry for DeviceSet {
    fn devices(&self) -> &[DeviceIndex] {
        &self.indices
    }

    fn read(&self, device: DeviceIndex) -> Result<GpuReading, GpuError> {
        if !self.indices.contains(&device) {
            return Err(GpuError::UnknownDevice(device));
        }
        #[cfg(feature = "nvml")]
        {
            self.backend.read(device)
        }
        #[cfg(not(feature = "nvml"))]
        {
            Err(GpuError::Unavailable(
                "built without GPU telemetry support".to_string(),
            ))
        }
    }
}

/// Number of usable GPUs on this host (0 when telemetry is unavailable)
pub fn device_count() -> usize {
    DeviceSet::detect().map(|set| set.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = GpuError::Device {
            device: 1,
            message: "lost".to_string(),
        };
        assert_eq!(err.to_string(), "GPU 1: lost");
        assert_eq!(GpuError::UnknownDevice(7).to_string(), "unknown GPU index 7");
    }

    #[cfg(not(feature = "nvml"))]
    #[test]
    fn test_device_names() {
        let set = DeviceSet {
            indices: vec![0, 2],
            names: vec!["Tesla T4".to_string(), "A100".to_string()],
        };
        assert!(!set.is_empty());
        assert_eq!(set.len(), 2);
        assert_eq!(set.name(2), Some("A100"));
        assert_eq!(set.name(1), None);
    }

    #[test]
    fn test_detect_is_consistent_with_count() {
        // Whatever the host has, detection and counting must agree.
        let detected = DeviceSet::detect().map(|set| set.len()).unwrap_or(0);
        assert_eq!(detected, device_count());
    }
}
