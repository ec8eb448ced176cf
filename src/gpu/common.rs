use std::fmt;

/// Vendor family of an accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Nvidia => "nvidia",
            DeviceType::Amd => "amd",
            DeviceType::Intel => "intel",
            DeviceType::Apple => "apple",
            DeviceType::Unknown => "unknown",
        }
    }

    /// Parse a vendor-family name; anything unrecognized maps to `Unknown`.
    pub fn parse(value: &str) -> DeviceType {
        match value.trim().to_lowercase().as_str() {
            "nvidia" => DeviceType::Nvidia,
            "amd" => DeviceType::Amd,
            "intel" => DeviceType::Intel,
            "apple" => DeviceType::Apple,
            _ => DeviceType::Unknown,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One discovered accelerator.
///
/// Devices are ephemeral: rebuilt on every detection pass, never mutated
/// after construction, and never persisted. Identity within one host is
/// the {vendor family, index} pair.
#[derive(Debug, Clone)]
pub struct Device {
    pub device_type: DeviceType,
    pub index: u32,
    pub name: String,
    pub vram_bytes: u64,
    pub compute_capability: String,
    pub driver_version: String,
    pub pci_bus_id: String,
    pub available: bool,
    pub utilization: f64,
    pub power_draw: f64,
    pub temperature: i32,

    /// Heuristic hourly price estimate; 0.0 for local accelerators.
    pub cost_per_hour: f64,
    /// Heuristic ranking score derived from vendor and memory size.
    pub performance_score: i64,
}

/// Published hourly price points for recognizable NVIDIA models.
const NVIDIA_HOURLY_RATES: &[(&str, f64)] = &[
    ("A100", 3.06),
    ("H100", 4.50),
    ("V100", 2.48),
    ("T4", 0.35),
    ("RTX 4090", 1.20),
    ("RTX 4080", 0.90),
];

const NVIDIA_DEFAULT_RATE: f64 = 0.50;

impl Device {
    pub fn new(device_type: DeviceType, index: u32, name: &str) -> Self {
        Device {
            device_type,
            index,
            name: name.to_string(),
            vram_bytes: 0,
            compute_capability: String::new(),
            driver_version: String::new(),
            pci_bus_id: String::new(),
            available: true,
            utilization: 0.0,
            power_draw: 0.0,
            temperature: 0,
            cost_per_hour: 0.0,
            performance_score: 0,
        }
    }

    /// Fill in the heuristic performance score and hourly cost estimate.
    ///
    /// NVIDIA scores scale with the major compute-capability digit and
    /// memory size; the other vendors scale with memory size alone and
    /// carry one generic per-vendor rate. Apple unified-memory parts are
    /// local hardware and cost nothing per hour.
    pub fn estimate_metrics(&mut self) {
        let vram_gib = (self.vram_bytes / (1024 * 1024 * 1024)) as i64;

        match self.device_type {
            DeviceType::Nvidia => {
                let major = self
                    .compute_capability
                    .split('.')
                    .next()
                    .and_then(|part| part.parse::<i64>().ok());

                if let Some(major) = major {
                    self.performance_score = major * 10 + vram_gib;
                    self.cost_per_hour = NVIDIA_HOURLY_RATES
                        .iter()
                        .find(|(model, _)| self.name.contains(model))
                        .map(|(_, rate)| *rate)
                        .unwrap_or(NVIDIA_DEFAULT_RATE);
                }
            }
            DeviceType::Amd => {
                self.performance_score = vram_gib * 8;
                self.cost_per_hour = 0.40;
            }
            DeviceType::Intel => {
                self.performance_score = vram_gib * 6;
                self.cost_per_hour = 0.30;
            }
            DeviceType::Apple => {
                self.performance_score = vram_gib * 7;
                self.cost_per_hour = 0.00;
            }
            DeviceType::Unknown => {}
        }
    }

    /// Host paths (possibly glob patterns) that grant access to this
    /// device. Only entries that resolve to existing files are injected.
    pub fn device_node_candidates(&self) -> Vec<String> {
        match self.device_type {
            DeviceType::Nvidia => vec![
                "/dev/nvidiactl".to_string(),
                "/dev/nvidia-uvm".to_string(),
                "/dev/nvidia-uvm-tools".to_string(),
                format!("/dev/nvidia{}", self.index),
            ],
            DeviceType::Amd => vec![
                "/dev/kfd".to_string(),
                "/dev/dri".to_string(),
                format!("/dev/dri/card{}", self.index),
                format!("/dev/dri/renderD{}", 128 + self.index),
            ],
            DeviceType::Intel => vec![
                "/dev/dri".to_string(),
                format!("/dev/dri/card{}", self.index),
                format!("/dev/dri/renderD{}", 128 + self.index),
            ],
            // Unified-memory SoCs have no discrete device nodes to grant.
            DeviceType::Apple | DeviceType::Unknown => vec![],
        }
    }
}
