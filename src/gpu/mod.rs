pub mod amd;
pub mod apple;
pub mod common;
pub mod intel;
pub mod nvidia;

use tracing::{debug, warn};

pub use common::{Device, DeviceType};

use crate::error::ProbeError;

/// A vendor-specific discovery procedure.
///
/// Each probe produces normalized device records for exactly one vendor
/// family, or fails independently of its siblings.
pub trait VendorProbe {
    fn family(&self) -> DeviceType;

    fn probe(&self) -> Result<Vec<Device>, ProbeError>;
}

/// Orchestrates all vendor probes and caches the merged result.
///
/// The cache lives on the instance, never in module state: construct a
/// fresh `Detector` (or call [`Detector::refresh`]) to force re-probing.
pub struct Detector {
    probes: Vec<Box<dyn VendorProbe>>,
    cache: Option<Vec<Device>>,
}

impl Detector {
    /// A detector wired with every supported vendor probe.
    pub fn new() -> Self {
        Detector::with_probes(vec![
            Box::new(nvidia::NvidiaProbe::default()),
            Box::new(amd::AmdProbe::default()),
            Box::new(intel::IntelProbe::default()),
            Box::new(apple::AppleProbe::default()),
        ])
    }

    pub fn with_probes(probes: Vec<Box<dyn VendorProbe>>) -> Self {
        Detector { probes, cache: None }
    }

    /// Run every probe, merging results in registration order.
    ///
    /// A probe failure (tool missing, execution error, timeout) is logged
    /// and contributes nothing; it is never fatal to the overall call.
    /// Results are cached for the lifetime of this instance.
    pub fn detect_all(&mut self) -> &[Device] {
        if self.cache.is_none() {
            let mut devices = Vec::new();

            for probe in &self.probes {
                match probe.probe() {
                    Ok(found) => {
                        debug!(
                            family = probe.family().as_str(),
                            count = found.len(),
                            "probe finished"
                        );
                        devices.extend(found);
                    }
                    Err(err) => {
                        warn!(family = probe.family().as_str(), "probe failed: {err}");
                    }
                }
            }

            self.cache = Some(devices);
        }

        match &self.cache {
            Some(devices) => devices,
            None => &[],
        }
    }

    /// Devices of one vendor family, from the cached merged list.
    pub fn get_by_type(&mut self, family: DeviceType) -> Vec<Device> {
        self.detect_all()
            .iter()
            .filter(|device| device.device_type == family)
            .cloned()
            .collect()
    }

    /// Drop the cached result so the next call re-probes the hardware.
    pub fn refresh(&mut self) {
        self.cache = None;
    }
}

impl Default for Detector {
    fn default() -> Self {
        Detector::new()
    }
}
