//! NVIDIA Management Library backend

use crate::GpuError;
use nvml_wrapper::Nvml;
use perfstack_shared::{percent_of, DeviceIndex, GpuReading};

pub(crate) struct NvmlBackend {
    nvml: Nvml,
}

impl NvmlBackend {
    /// Initialize NVML and enumerate devices as (index, name) pairs
    pub(crate) fn init() -> Result<(Self, Vec<(DeviceIndex, String)>), GpuError> {
        let nvml = Nvml::init().map_err(|e| GpuError::Unavailable(e.to_string()))?;
        let count = nvml
            .device_count()
            .map_err(|e| GpuError::Unavailable(e.to_string()))?;

        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            let name = nvml
                .device_by_index(index)
                .and_then(|device| device.name())
                .unwrap_or_else(|_| format!("GPU {}", index));
            devices.push((index, name));
        }

        Ok((Self { nvml }, devices))
    }

    pub(crate) fn read(&self, index: DeviceIndex) -> Result<GpuReading, GpuError> {
        let device_err = |e: nvml_wrapper::error::NvmlError| GpuError::Device {
            device: index,
            message: e.to_string(),
        };

        let device = self.nvml.device_by_index(index).map_err(device_err)?;
        let utilization = device.utilization_rates().map_err(device_err)?;
        let memory = device.memory_info().map_err(device_err)?;

        Ok(GpuReading {
            device: index,
            utilization_pct: utilization.gpu as f64,
            memory_pct: percent_of(memory.used, memory.total),
        })
    }
}
