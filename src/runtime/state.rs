use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gpu::common::{Device, DeviceType};

/// Annotation keys carrying the reservation between the create-time
/// decision and the prestart-time re-validation. The two run in separate
/// processes, so these annotations are the entire contract.
pub const ANNOTATION_DEVICE_TYPE: &str = "io.accelshim.device.type";
pub const ANNOTATION_DEVICE_INDEX: &str = "io.accelshim.device.index";
pub const ANNOTATION_DEVICE_NAME: &str = "io.accelshim.device.name";
pub const ANNOTATION_DEVICE_VRAM: &str = "io.accelshim.device.vram";

/// Container state as recorded by the engine, read at prestart time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "ociVersion", default)]
    pub version: String,
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub bundle: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// The serialized hand-off value identifying the chosen accelerator.
///
/// {family, index} is the device's identity key; name and memory size are
/// carried for operator-facing messages only.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReservation {
    pub family: DeviceType,
    pub index: u32,
    pub name: String,
    pub vram_bytes: u64,
}

impl DeviceReservation {
    pub fn for_device(device: &Device) -> Self {
        DeviceReservation {
            family: device.device_type,
            index: device.index,
            name: device.name.clone(),
            vram_bytes: device.vram_bytes,
        }
    }

    /// Write the reservation into an annotation map under the fixed keys.
    pub fn stamp(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.insert(ANNOTATION_DEVICE_TYPE.to_string(), self.family.to_string());
        annotations.insert(ANNOTATION_DEVICE_INDEX.to_string(), self.index.to_string());
        annotations.insert(ANNOTATION_DEVICE_NAME.to_string(), self.name.clone());
        annotations.insert(
            ANNOTATION_DEVICE_VRAM.to_string(),
            self.vram_bytes.to_string(),
        );
    }

    /// Read a reservation back from an annotation map.
    ///
    /// Returns `None` when the family/index pair is absent, meaning the
    /// container never requested an accelerator.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        let family = DeviceType::parse(annotations.get(ANNOTATION_DEVICE_TYPE)?);
        let index = annotations
            .get(ANNOTATION_DEVICE_INDEX)?
            .parse()
            .unwrap_or(0);

        Some(DeviceReservation {
            family,
            index,
            name: annotations
                .get(ANNOTATION_DEVICE_NAME)
                .cloned()
                .unwrap_or_default(),
            vram_bytes: annotations
                .get(ANNOTATION_DEVICE_VRAM)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation() -> DeviceReservation {
        DeviceReservation {
            family: DeviceType::Nvidia,
            index: 1,
            name: "NVIDIA A100".to_string(),
            vram_bytes: 40 * 1024 * 1024 * 1024,
        }
    }

    #[test]
    fn stamp_and_read_back_round_trip() {
        let mut annotations = BTreeMap::new();
        reservation().stamp(&mut annotations);

        assert_eq!(annotations.len(), 4);
        assert_eq!(
            DeviceReservation::from_annotations(&annotations),
            Some(reservation())
        );
    }

    #[test]
    fn absent_pair_means_no_reservation() {
        assert_eq!(DeviceReservation::from_annotations(&BTreeMap::new()), None);

        let mut only_type = BTreeMap::new();
        only_type.insert(ANNOTATION_DEVICE_TYPE.to_string(), "nvidia".to_string());
        assert_eq!(DeviceReservation::from_annotations(&only_type), None);
    }

    #[test]
    fn stamping_does_not_disturb_other_annotations() {
        let mut annotations = BTreeMap::new();
        annotations.insert("org.example.key".to_string(), "kept".to_string());
        reservation().stamp(&mut annotations);

        assert_eq!(annotations.get("org.example.key").unwrap(), "kept");
    }

    #[test]
    fn container_state_parses_engine_json() {
        let state: ContainerState = serde_json::from_str(
            r#"{
                "ociVersion": "1.0.2",
                "id": "busy-container",
                "status": "created",
                "pid": 4242,
                "bundle": "/run/bundles/busy-container",
                "annotations": {"io.accelshim.device.type": "amd"}
            }"#,
        )
        .unwrap();

        assert_eq!(state.id, "busy-container");
        assert_eq!(state.pid, 4242);
        assert_eq!(
            state.annotations.get(ANNOTATION_DEVICE_TYPE).unwrap(),
            "amd"
        );
    }
}
