pub mod spec;
pub mod state;

use std::fmt;
use std::path::Path;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::ShimError;
use crate::gpu::{Detector, Device, DeviceType};

use state::{ContainerState, DeviceReservation};

/// Device selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Performance,
    Cost,
    Balanced,
}

impl Strategy {
    /// Parse a strategy name; anything unrecognized falls back to
    /// `Balanced`.
    pub fn parse(value: &str) -> Strategy {
        match value.trim().to_lowercase().as_str() {
            "performance" => Strategy::Performance,
            "cost" => Strategy::Cost,
            _ => Strategy::Balanced,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Performance => "performance",
            Strategy::Cost => "cost",
            Strategy::Balanced => "balanced",
        };
        write!(f, "{name}")
    }
}

/// Vendor constraint of a selection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorFilter {
    Any,
    Family(DeviceType),
}

impl VendorFilter {
    pub fn parse(value: &str) -> VendorFilter {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("any") {
            VendorFilter::Any
        } else {
            VendorFilter::Family(DeviceType::parse(trimmed))
        }
    }
}

impl fmt::Display for VendorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorFilter::Any => write!(f, "any"),
            VendorFilter::Family(family) => write!(f, "{family}"),
        }
    }
}

/// One selection request; created fresh per container-create call.
#[derive(Debug, Clone)]
pub struct Requirements {
    pub vendor: VendorFilter,
    /// Minimum memory as a human string ("8GB"); empty means no minimum.
    pub min_memory: String,
    pub strategy: Strategy,
}

/// Parse a human memory-size string into bytes.
///
/// Accepts GB/MB/KB/B suffixes (case-insensitive, with single-letter
/// forms) and bare byte counts; empty, "0", and "0GB" mean no minimum.
pub fn parse_mem_size(value: &str) -> Result<u64, ShimError> {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("0gb") {
        return Ok(0);
    }

    let upper = trimmed.to_uppercase();
    let split = upper
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(upper.len());
    let (number, unit) = upper.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| ShimError::InvalidMemorySpec(value.to_string()))?;
    let multiplier = match unit {
        "GB" | "G" => GB,
        "MB" | "M" => MB,
        "KB" | "K" => KB,
        "B" | "" => 1.0,
        _ => return Err(ShimError::InvalidMemorySpec(value.to_string())),
    };

    Ok((number * multiplier) as u64)
}

/// The accelerator broker: detection, selection, spec mutation, and
/// prestart re-validation behind one handle.
pub struct Manager {
    config: Config,
    detector: Detector,
}

impl Manager {
    pub fn new(config: Config) -> Self {
        Manager {
            config,
            detector: Detector::new(),
        }
    }

    /// Swap in a custom detector, for callers that register their own
    /// probes.
    pub fn with_detector(config: Config, detector: Detector) -> Self {
        Manager { config, detector }
    }

    /// All detected devices, in probe order.
    pub fn devices(&mut self) -> Vec<Device> {
        self.detector.detect_all().to_vec()
    }

    /// Detected devices of one vendor family.
    pub fn devices_by_type(&mut self, family: DeviceType) -> Vec<Device> {
        self.detector.get_by_type(family)
    }

    /// Pick exactly one device meeting `requirements`.
    ///
    /// No reservation is recorded here and no lock is taken anywhere:
    /// two concurrent callers can be handed the same physical device.
    pub fn select_device(&mut self, requirements: &Requirements) -> Result<Device, ShimError> {
        let min_bytes = parse_mem_size(&requirements.min_memory)?;

        let candidates = match requirements.vendor {
            VendorFilter::Any => self.detector.detect_all().to_vec(),
            VendorFilter::Family(family) => self.detector.get_by_type(family),
        };

        let allowed: Vec<Device> = candidates
            .into_iter()
            .filter(|device| device.available && device.vram_bytes >= min_bytes)
            .filter(|device| self.device_allowed(device))
            .collect();

        if allowed.is_empty() {
            return Err(ShimError::NoDevicesAvailable {
                constraint: describe_constraint(requirements),
            });
        }

        let chosen = pick(&allowed, requirements.strategy).clone();
        info!(
            family = chosen.device_type.as_str(),
            index = chosen.index,
            name = %chosen.name,
            strategy = %requirements.strategy,
            "selected device"
        );

        Ok(chosen)
    }

    /// Grant `device` to the container whose launch spec lives at
    /// `spec_path`, and stamp the reservation annotations.
    pub fn modify_spec(&self, spec_path: &Path, device: &Device) -> Result<(), ShimError> {
        let mut launch_spec = spec::read_spec(spec_path)?;
        let paths = spec::resolve_host_paths(device, &self.config);
        spec::inject_device(&mut launch_spec, device, &paths);
        spec::write_spec(spec_path, &launch_spec)?;

        info!(
            family = device.device_type.as_str(),
            index = device.index,
            path = %spec_path.display(),
            "launch spec updated"
        );
        Ok(())
    }

    /// Re-validate the reserved device immediately before the container
    /// process starts. Containers without a reservation pass through.
    pub fn prestart(&mut self, container: &ContainerState) -> Result<(), ShimError> {
        let Some(reservation) = DeviceReservation::from_annotations(&container.annotations)
        else {
            debug!(id = %container.id, "no device reserved, nothing to validate");
            return Ok(());
        };

        // The reservation was taken in a different process; probe the
        // hardware again rather than trusting any earlier result.
        self.detector.refresh();
        let live = self
            .detector
            .detect_all()
            .iter()
            .find(|device| {
                device.device_type == reservation.family && device.index == reservation.index
            })
            .cloned();

        match live {
            Some(device) if device.available => Ok(()),
            _ => Err(ShimError::DeviceGone {
                family: reservation.family,
                index: reservation.index,
            }),
        }
    }

    /// Apply the configured allow and block lists. Entries match the
    /// `family:index` identity key or the exact display name.
    fn device_allowed(&self, device: &Device) -> bool {
        let identity = format!("{}:{}", device.device_type, device.index);
        let matches = |entry: &String| *entry == identity || *entry == device.name;

        if !self.config.whitelist_devices.is_empty()
            && !self.config.whitelist_devices.iter().any(matches)
        {
            return false;
        }

        !self.config.blacklist_devices.iter().any(matches)
    }
}

fn describe_constraint(requirements: &Requirements) -> String {
    let memory = if requirements.min_memory.is_empty() {
        "no minimum".to_string()
    } else {
        format!(">= {}", requirements.min_memory)
    };
    format!(
        "vendor {}, memory {memory}",
        requirements.vendor
    )
}

/// Score the candidates and pick one; first-seen wins ties.
fn pick(candidates: &[Device], strategy: Strategy) -> &Device {
    let mut best = &candidates[0];

    match strategy {
        Strategy::Performance => {
            for device in candidates {
                if device.performance_score > best.performance_score {
                    best = device;
                }
            }
        }
        Strategy::Cost => {
            for device in candidates {
                if device.cost_per_hour < best.cost_per_hour {
                    best = device;
                }
            }
        }
        Strategy::Balanced => {
            for device in candidates {
                if value_score(device) > value_score(best) {
                    best = device;
                }
            }
        }
    }

    best
}

/// Performance per dollar; the 0.01 floor keeps free local accelerators
/// out of a division by zero.
fn value_score(device: &Device) -> f64 {
    device.performance_score as f64 / (device.cost_per_hour + 0.01)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::gpu::testing::{FailingProbe, StaticProbe};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn gpu(index: u32, name: &str, vram_gib: u64, cost: f64, score: i64) -> Device {
        let mut device = Device::new(DeviceType::Nvidia, index, name);
        device.vram_bytes = vram_gib * GIB;
        device.cost_per_hour = cost;
        device.performance_score = score;
        device
    }

    fn manager_with(devices: Vec<Device>) -> Manager {
        manager_with_config(devices, Config::default())
    }

    fn manager_with_config(devices: Vec<Device>, config: Config) -> Manager {
        let detector =
            Detector::with_probes(vec![Box::new(StaticProbe::new(DeviceType::Nvidia, devices))]);
        Manager::with_detector(config, detector)
    }

    /// The two-device fleet from the pricing heuristics: a 40 GiB
    /// flagship and a 16 GiB budget card.
    fn fleet() -> Vec<Device> {
        vec![
            gpu(0, "NVIDIA A100", 40, 3.06, 120),
            gpu(1, "Tesla T4", 16, 0.35, 80),
        ]
    }

    fn requirements(vendor: &str, min: &str, strategy: &str) -> Requirements {
        Requirements {
            vendor: VendorFilter::parse(vendor),
            min_memory: min.to_string(),
            strategy: Strategy::parse(strategy),
        }
    }

    #[test]
    fn mem_size_parsing() {
        assert_eq!(parse_mem_size("8GB").unwrap(), 8 * GIB);
        assert_eq!(parse_mem_size("512MB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_mem_size("4K").unwrap(), 4096);
        assert_eq!(parse_mem_size("1.5GB").unwrap(), (1.5 * GIB as f64) as u64);
        assert_eq!(parse_mem_size("1024").unwrap(), 1024);
        assert_eq!(parse_mem_size("").unwrap(), 0);
        assert_eq!(parse_mem_size("0").unwrap(), 0);
        assert_eq!(parse_mem_size("0GB").unwrap(), 0);

        assert!(matches!(
            parse_mem_size("abc"),
            Err(ShimError::InvalidMemorySpec(_))
        ));
        assert!(matches!(
            parse_mem_size("8XB"),
            Err(ShimError::InvalidMemorySpec(_))
        ));
    }

    #[test]
    fn cost_strategy_picks_the_cheapest_meeting_the_floor() {
        let mut manager = manager_with(fleet());
        let chosen = manager
            .select_device(&requirements("nvidia", "8GB", "cost"))
            .unwrap();
        assert_eq!(chosen.name, "Tesla T4");
    }

    #[test]
    fn performance_strategy_picks_the_highest_score() {
        let mut manager = manager_with(fleet());
        let chosen = manager
            .select_device(&requirements("nvidia", "", "performance"))
            .unwrap();
        assert_eq!(chosen.name, "NVIDIA A100");
    }

    #[test]
    fn balanced_strategy_maximizes_value_per_dollar() {
        let mut manager = manager_with(fleet());
        let chosen = manager
            .select_device(&requirements("any", "", "balanced"))
            .unwrap();
        // 80 / 0.36 beats 120 / 3.07.
        assert_eq!(chosen.name, "Tesla T4");
    }

    #[test]
    fn unrecognized_strategy_falls_back_to_balanced() {
        let mut manager = manager_with(fleet());
        let chosen = manager
            .select_device(&requirements("any", "", "best-effort"))
            .unwrap();
        assert_eq!(chosen.name, "Tesla T4");
    }

    #[test]
    fn first_seen_wins_ties() {
        let mut manager = manager_with(vec![
            gpu(0, "first", 16, 1.0, 100),
            gpu(1, "second", 16, 1.0, 100),
        ]);

        for strategy in ["performance", "cost", "balanced"] {
            let chosen = manager
                .select_device(&requirements("any", "", strategy))
                .unwrap();
            assert_eq!(chosen.name, "first", "strategy {strategy}");
        }
    }

    #[test]
    fn oversized_minimum_yields_no_devices_available() {
        let mut manager = manager_with(fleet());
        let err = manager
            .select_device(&requirements("nvidia", "64GB", "performance"))
            .unwrap_err();

        match err {
            ShimError::NoDevicesAvailable { constraint } => {
                assert!(constraint.contains("nvidia"));
                assert!(constraint.contains("64GB"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unavailable_devices_are_filtered_out() {
        let mut busy = gpu(0, "busy", 40, 1.0, 100);
        busy.available = false;
        let mut manager = manager_with(vec![busy]);

        assert!(manager
            .select_device(&requirements("any", "", "performance"))
            .is_err());
    }

    #[test]
    fn malformed_minimum_fails_before_filtering() {
        let mut manager = manager_with(fleet());
        let err = manager
            .select_device(&requirements("nvidia", "lots", "performance"))
            .unwrap_err();
        assert!(matches!(err, ShimError::InvalidMemorySpec(_)));
    }

    #[test]
    fn vendor_filter_narrows_candidates() {
        let detector = Detector::with_probes(vec![
            Box::new(StaticProbe::new(DeviceType::Nvidia, fleet())),
            Box::new(StaticProbe::new(
                DeviceType::Amd,
                vec![{
                    let mut device = Device::new(DeviceType::Amd, 0, "Radeon");
                    device.vram_bytes = 32 * GIB;
                    device.cost_per_hour = 0.40;
                    device.performance_score = 256;
                    device
                }],
            )),
        ]);
        let mut manager = Manager::with_detector(Config::default(), detector);

        let chosen = manager
            .select_device(&requirements("amd", "", "performance"))
            .unwrap();
        assert_eq!(chosen.device_type, DeviceType::Amd);
    }

    #[test]
    fn block_list_removes_devices_by_identity_key() {
        let mut config = Config::default();
        config.blacklist_devices.push("nvidia:0".to_string());
        let mut manager = manager_with_config(fleet(), config);

        let chosen = manager
            .select_device(&requirements("any", "", "performance"))
            .unwrap();
        assert_eq!(chosen.index, 1);
    }

    #[test]
    fn allow_list_restricts_to_named_devices() {
        let mut config = Config::default();
        config.whitelist_devices.push("NVIDIA A100".to_string());
        let mut manager = manager_with_config(fleet(), config);

        let chosen = manager
            .select_device(&requirements("any", "", "cost"))
            .unwrap();
        assert_eq!(chosen.name, "NVIDIA A100");
    }

    fn state_with(annotations: BTreeMap<String, String>) -> ContainerState {
        ContainerState {
            version: "1.0.2".to_string(),
            id: "c1".to_string(),
            status: "created".to_string(),
            pid: 0,
            bundle: "/run/bundle".to_string(),
            annotations,
        }
    }

    #[test]
    fn prestart_passes_without_a_reservation() {
        let mut manager = manager_with(Vec::new());
        assert!(manager.prestart(&state_with(BTreeMap::new())).is_ok());
    }

    #[test]
    fn prestart_confirms_a_live_reservation() {
        let mut manager = manager_with(fleet());
        let mut annotations = BTreeMap::new();
        DeviceReservation::for_device(&fleet()[1]).stamp(&mut annotations);

        assert!(manager.prestart(&state_with(annotations)).is_ok());
    }

    #[test]
    fn prestart_fails_when_the_device_vanished() {
        let mut manager = manager_with(fleet());
        let mut annotations = BTreeMap::new();
        DeviceReservation::for_device(&gpu(7, "gone", 16, 0.35, 80)).stamp(&mut annotations);

        let err = manager.prestart(&state_with(annotations)).unwrap_err();
        assert!(matches!(
            err,
            ShimError::DeviceGone {
                family: DeviceType::Nvidia,
                index: 7
            }
        ));
    }

    #[test]
    fn prestart_fails_when_the_device_is_no_longer_available() {
        let mut busy = gpu(0, "busy", 40, 1.0, 100);
        busy.available = false;
        let mut manager = manager_with(vec![busy.clone()]);

        let mut annotations = BTreeMap::new();
        DeviceReservation::for_device(&busy).stamp(&mut annotations);

        assert!(manager.prestart(&state_with(annotations)).is_err());
    }

    #[test]
    fn probe_failures_do_not_break_selection_for_other_vendors() {
        let detector = Detector::with_probes(vec![
            Box::new(FailingProbe(DeviceType::Intel)),
            Box::new(StaticProbe::new(DeviceType::Nvidia, fleet())),
        ]);
        let mut manager = Manager::with_detector(Config::default(), detector);

        assert!(manager
            .select_device(&requirements("any", "8GB", "cost"))
            .is_ok());
    }
}
