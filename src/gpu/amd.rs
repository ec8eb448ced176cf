use std::fs;
use std::time::Duration;

use crate::error::ProbeError;
use crate::gpu::common::{Device, DeviceType};
use crate::gpu::VendorProbe;
use crate::utils::{tool_stdout, DEFAULT_TOOL_TIMEOUT};

const DEFAULT_VRAM_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Discovers AMD GPUs through `rocm-smi`, with VRAM read from sysfs.
pub struct AmdProbe {
    timeout: Duration,
}

impl Default for AmdProbe {
    fn default() -> Self {
        AmdProbe {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl VendorProbe for AmdProbe {
    fn family(&self) -> DeviceType {
        DeviceType::Amd
    }

    fn probe(&self) -> Result<Vec<Device>, ProbeError> {
        let output = tool_stdout("rocm-smi", &["--showid", "--showmeminfo", "vram"], self.timeout)?;

        let driver_version = rocm_driver_version();
        let mut devices = Vec::new();
        for (index, name) in scan_device_lines(&output) {
            let mut device = Device::new(DeviceType::Amd, index, &name);
            device.vram_bytes = vram_total(index);
            device.driver_version = driver_version.clone();
            device.estimate_metrics();
            devices.push(device);
        }

        Ok(devices)
    }
}

/// Scan rocm-smi output for device lines. The format varies across
/// versions, so this matches any line carrying both a `GPU` marker and a
/// hexadecimal address token.
fn scan_device_lines(output: &str) -> Vec<(u32, String)> {
    let mut found = Vec::new();
    let mut index = 0u32;

    for line in output.lines() {
        if line.contains("GPU") && line.contains("0x") {
            found.push((index, extract_device_name(line)));
            index += 1;
        }
    }

    found
}

/// Take the line from its `GPU` token onward as the display name.
fn extract_device_name(line: &str) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    for (pos, token) in tokens.iter().enumerate() {
        if *token == "GPU" {
            return tokens[pos..].join(" ");
        }
    }
    "AMD GPU".to_string()
}

/// VRAM capacity from the per-device sysfs pseudo-file, else 8 GiB.
fn vram_total(index: u32) -> u64 {
    let path = format!("/sys/class/drm/card{index}/device/mem_info_vram_total");
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(DEFAULT_VRAM_BYTES)
}

fn rocm_driver_version() -> String {
    fs::read_to_string("/opt/rocm/.info/version")
        .map(|raw| raw.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lines_need_marker_and_hex_token() {
        let output = "\
========= ROCm System Management Interface =========
GPU[0] : GPU ID: 0x73bf
GPU[1] : GPU ID: 0x744c
VRAM Total Memory (B): 17163091968
====================================================";

        let found = scan_device_lines(output);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, 0);
        assert_eq!(found[1].0, 1);
    }

    #[test]
    fn name_starts_at_gpu_token() {
        assert_eq!(
            extract_device_name("card0 GPU ID: 0x73bf"),
            "GPU ID: 0x73bf"
        );
        assert_eq!(extract_device_name("no marker here"), "AMD GPU");
    }

    #[test]
    fn lines_without_hex_are_ignored() {
        assert!(scan_device_lines("GPU usage is high\n0x1002 vendor\n").is_empty());
    }
}
