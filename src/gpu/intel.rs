use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ProbeError;
use crate::gpu::common::{Device, DeviceType};
use crate::gpu::VendorProbe;
use crate::utils::{tool_stdout, DEFAULT_TOOL_TIMEOUT};

lazy_static! {
    static ref MEMORY_SIZE_RE: Regex = Regex::new(r"(\d+)").expect("valid regex");
}

/// Discovers Intel GPUs through `sycl-ls`, falling back to `clinfo`.
pub struct IntelProbe {
    timeout: Duration,
}

impl Default for IntelProbe {
    fn default() -> Self {
        IntelProbe {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl VendorProbe for IntelProbe {
    fn family(&self) -> DeviceType {
        DeviceType::Intel
    }

    fn probe(&self) -> Result<Vec<Device>, ProbeError> {
        match tool_stdout("sycl-ls", &[], self.timeout) {
            Ok(output) => Ok(parse_sycl_output(&output)),
            Err(ProbeError::ToolNotFound(_)) => {
                let output = tool_stdout("clinfo", &[], self.timeout)?;
                Ok(parse_clinfo_output(&output))
            }
            Err(err) => Err(err),
        }
    }
}

/// Free-text scan of sycl-ls output for Intel GPU entries.
fn parse_sycl_output(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();
    let mut index = 0u32;

    for line in output.lines() {
        let lower = line.to_lowercase();
        if lower.contains("intel") && lower.contains("gpu") {
            let mut device = Device::new(DeviceType::Intel, index, line.trim());
            device.estimate_metrics();
            devices.push(device);
            index += 1;
        }
    }

    devices
}

/// Line-by-line clinfo parse tracking a current-device record: a new
/// `Device Name` line flushes the previous record, a `Global memory size`
/// line augments it.
fn parse_clinfo_output(output: &str) -> Vec<Device> {
    let mut devices: Vec<Device> = Vec::new();
    let mut current: Option<Device> = None;
    let mut index = 0u32;

    for line in output.lines() {
        if line.contains("Device Name") && line.to_lowercase().contains("intel") {
            if let Some(done) = current.take() {
                devices.push(done);
            }

            let name = line.splitn(2, ':').nth(1).unwrap_or("").trim();
            current = Some(Device::new(DeviceType::Intel, index, name));
            index += 1;
        }

        if let Some(device) = current.as_mut() {
            if line.contains("Global memory size") {
                if let Some(caps) = MEMORY_SIZE_RE.captures(line) {
                    device.vram_bytes = caps[1].parse().unwrap_or(0);
                }
            }
        }
    }

    if let Some(done) = current.take() {
        devices.push(done);
    }

    for device in &mut devices {
        device.estimate_metrics();
    }

    devices
}
