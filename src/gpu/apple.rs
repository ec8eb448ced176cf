use std::time::Duration;

use crate::error::ProbeError;
use crate::gpu::common::{Device, DeviceType};
use crate::gpu::VendorProbe;
use crate::utils::{tool_stdout, DEFAULT_TOOL_TIMEOUT};

const GIB: u64 = 1024 * 1024 * 1024;

/// Unified-memory capacity by chip model, most specific marker first.
const UNIFIED_MEMORY_GIB: &[(&str, u64)] = &[
    ("m3 max", 96),
    ("m3 pro", 36),
    ("m3", 24),
    ("m2 ultra", 192),
    ("m2 max", 96),
    ("m2 pro", 32),
    ("m2", 24),
    ("m1 ultra", 128),
    ("m1 max", 64),
    ("m1 pro", 32),
];

const DEFAULT_UNIFIED_MEMORY_GIB: u64 = 16;

/// Discovers Apple Silicon SoCs through `system_profiler`.
pub struct AppleProbe {
    timeout: Duration,
}

impl Default for AppleProbe {
    fn default() -> Self {
        AppleProbe {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl VendorProbe for AppleProbe {
    fn family(&self) -> DeviceType {
        DeviceType::Apple
    }

    fn probe(&self) -> Result<Vec<Device>, ProbeError> {
        let output = tool_stdout("system_profiler", &["SPDisplaysDataType"], self.timeout)?;
        Ok(parse_profiler_output(&output))
    }
}

/// Scan the platform inventory output for chipset-model lines naming a
/// known Apple part.
fn parse_profiler_output(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();
    let mut index = 0u32;

    for line in output.lines() {
        if line.contains("Chipset Model")
            && (line.contains("Apple")
                || line.contains("M1")
                || line.contains("M2")
                || line.contains("M3"))
        {
            let name = line.splitn(2, ':').nth(1).unwrap_or("").trim();
            let mut device = Device::new(DeviceType::Apple, index, name);
            device.vram_bytes = unified_memory_estimate(name);
            device.estimate_metrics();
            devices.push(device);
            index += 1;
        }
    }

    devices
}

/// Unified memory is not reported per-GPU, so estimate it from the chip
/// model, defaulting to the baseline capacity for unrecognized parts.
fn unified_memory_estimate(name: &str) -> u64 {
    let lower = name.to_lowercase();
    UNIFIED_MEMORY_GIB
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, gib)| gib * GIB)
        .unwrap_or(DEFAULT_UNIFIED_MEMORY_GIB * GIB)
}
