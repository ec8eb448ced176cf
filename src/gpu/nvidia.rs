use std::time::Duration;

use crate::error::ProbeError;
use crate::gpu::common::{Device, DeviceType};
use crate::gpu::VendorProbe;
use crate::utils::{tool_stdout, DEFAULT_TOOL_TIMEOUT};

/// Per-device fields queried from nvidia-smi, in column order.
const SMI_QUERY: &str = "--query-gpu=index,name,memory.total,compute_cap,driver_version,pci.bus_id,utilization.gpu,power.draw,temperature.gpu";

/// Discovers NVIDIA GPUs through `nvidia-smi`.
pub struct NvidiaProbe {
    timeout: Duration,
}

impl Default for NvidiaProbe {
    fn default() -> Self {
        NvidiaProbe {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl VendorProbe for NvidiaProbe {
    fn family(&self) -> DeviceType {
        DeviceType::Nvidia
    }

    fn probe(&self) -> Result<Vec<Device>, ProbeError> {
        let output = tool_stdout(
            "nvidia-smi",
            &[SMI_QUERY, "--format=csv,noheader,nounits"],
            self.timeout,
        )?;
        Ok(parse_smi_output(&output))
    }
}

/// Parse the fixed-column, header-less, unit-free CSV from nvidia-smi.
///
/// Lines with fewer than nine fields are skipped; unparsable numeric
/// fields fall back to zero rather than failing the line.
fn parse_smi_output(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 9 {
            continue;
        }

        let index = fields[0].parse().unwrap_or(0);
        let mut device = Device::new(DeviceType::Nvidia, index, fields[1]);
        device.vram_bytes = fields[2].parse::<u64>().unwrap_or(0) * 1024 * 1024;
        device.compute_capability = fields[3].to_string();
        device.driver_version = fields[4].to_string();
        device.pci_bus_id = fields[5].to_string();
        device.utilization = fields[6].parse().unwrap_or(0.0);
        device.power_draw = fields[7].parse().unwrap_or(0.0);
        device.temperature = fields[8].parse().unwrap_or(0);
        device.estimate_metrics();

        devices.push(device);
    }

    devices
}
