use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::Config;
use crate::error::ShimError;
use crate::gpu::common::{Device, DeviceType};
use crate::runtime::state::DeviceReservation;

/// OCI launch specification, modelled just deeply enough to mutate.
///
/// Every struct carries a flattened map so fields the shim does not know
/// about survive a read-modify-write cycle verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OciSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<Linux>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Process {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Linux {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<LinuxDevice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinuxDevice {
    pub path: String,
    #[serde(rename = "type")]
    pub dev_type: String,
    #[serde(default)]
    pub major: i64,
    #[serde(default)]
    pub minor: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceCgroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCgroup {
    pub allow: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub dev_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Host paths resolved for one device, separated so the spec transform
/// itself never touches the filesystem.
#[derive(Debug, Clone, Default)]
pub struct HostPaths {
    /// Device nodes that exist on the host.
    pub device_nodes: Vec<PathBuf>,
    /// Vendor library directories, for the library search path.
    pub library_dirs: Vec<PathBuf>,
    /// The subset of `library_dirs` that exists, for bind mounts.
    pub library_mounts: Vec<PathBuf>,
}

/// Resolve the host paths to grant for `device`, expanding glob patterns
/// and keeping only paths that actually exist.
pub fn resolve_host_paths(device: &Device, config: &Config) -> HostPaths {
    let mut nodes = Vec::new();
    for pattern in device.device_node_candidates() {
        let mut matched = false;
        if let Ok(paths) = glob::glob(&pattern) {
            for path in paths.flatten() {
                nodes.push(path);
                matched = true;
            }
        }
        if !matched {
            let path = PathBuf::from(&pattern);
            if path.exists() {
                nodes.push(path);
            }
        }
    }

    let library_dirs = if config.inject_drivers {
        library_dirs(device.device_type, config)
    } else {
        Vec::new()
    };
    let library_mounts = library_dirs
        .iter()
        .filter(|dir| dir.exists())
        .cloned()
        .collect();

    HostPaths {
        device_nodes: nodes,
        library_dirs,
        library_mounts,
    }
}

/// Vendor shared-library directories, rooted at the configured toolkit
/// install paths.
fn library_dirs(family: DeviceType, config: &Config) -> Vec<PathBuf> {
    match family {
        DeviceType::Nvidia => vec![
            PathBuf::from(&config.cuda_path).join("lib64"),
            PathBuf::from(&config.cuda_path).join("lib"),
            PathBuf::from("/usr/lib/x86_64-linux-gnu"),
        ],
        DeviceType::Amd => vec![
            PathBuf::from(&config.rocm_path).join("lib"),
            PathBuf::from(&config.rocm_path).join("lib64"),
        ],
        DeviceType::Intel => vec![
            PathBuf::from(&config.one_api_path).join("compiler/latest/linux/lib"),
            PathBuf::from(&config.one_api_path).join("compiler/latest/linux/lib/x64"),
        ],
        DeviceType::Apple | DeviceType::Unknown => Vec::new(),
    }
}

/// Environment variables selecting `device` inside the container.
fn device_env(device: &Device) -> Vec<String> {
    match device.device_type {
        DeviceType::Nvidia => vec![
            format!("NVIDIA_VISIBLE_DEVICES={}", device.index),
            "NVIDIA_DRIVER_CAPABILITIES=compute,utility".to_string(),
            format!("CUDA_VISIBLE_DEVICES={}", device.index),
        ],
        DeviceType::Amd => vec![
            format!("ROCR_VISIBLE_DEVICES={}", device.index),
            format!("GPU_DEVICE_ORDINAL={}", device.index),
            "HSA_OVERRIDE_GFX_VERSION=9.0.0".to_string(),
        ],
        DeviceType::Intel => vec![
            format!("ONEAPI_DEVICE_SELECTOR=level_zero:{}", device.index),
            format!("ZE_AFFINITY_MASK={}", device.index),
        ],
        DeviceType::Apple => vec!["METAL_DEVICE_WRAPPER_TYPE=1".to_string()],
        DeviceType::Unknown => Vec::new(),
    }
}

/// Grant `device` to the container described by `spec`.
///
/// Strictly additive: device nodes, cgroup rules, environment variables,
/// mounts, and annotations are appended; nothing pre-existing is removed
/// or reordered. The cgroup rules deliberately mirror the established
/// coarse policy of blanket character-device access.
pub fn inject_device(spec: &mut OciSpec, device: &Device, paths: &HostPaths) {
    let linux = spec.linux.get_or_insert_with(Linux::default);
    for node in &paths.device_nodes {
        linux.devices.push(LinuxDevice {
            path: node.display().to_string(),
            dev_type: "c".to_string(),
            major: 0,
            minor: 0,
            extra: Map::new(),
        });

        let resources = linux.resources.get_or_insert_with(Resources::default);
        resources.devices.push(DeviceCgroup {
            allow: true,
            dev_type: Some("c".to_string()),
            major: None,
            minor: None,
            access: Some("rwm".to_string()),
            extra: Map::new(),
        });
    }

    let process = spec.process.get_or_insert_with(Process::default);
    process.env.extend(device_env(device));

    if !paths.library_dirs.is_empty() {
        let joined = paths
            .library_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        process
            .env
            .push(format!("LD_LIBRARY_PATH={joined}:${{LD_LIBRARY_PATH}}"));
    }

    for dir in &paths.library_mounts {
        spec.mounts.push(Mount {
            destination: dir.display().to_string(),
            fs_type: Some("bind".to_string()),
            source: Some(dir.display().to_string()),
            options: vec!["ro".to_string(), "rbind".to_string()],
            extra: Map::new(),
        });
    }

    DeviceReservation::for_device(device).stamp(&mut spec.annotations);
}

/// Read the launch spec at `path`.
pub fn read_spec(path: &Path) -> Result<OciSpec, ShimError> {
    let raw =
        std::fs::read_to_string(path).map_err(|err| ShimError::spec_io("read", path, err))?;
    serde_json::from_str(&raw).map_err(|err| ShimError::spec_io("parse", path, err))
}

/// Rewrite the launch spec at `path` as one atomic unit.
///
/// The document is staged in a temp file beside the target and renamed
/// over it, so a failure never leaves a partial spec behind.
pub fn write_spec(path: &Path, spec: &OciSpec) -> Result<(), ShimError> {
    let raw = serde_json::to_vec_pretty(spec).map_err(|err| ShimError::spec_io("encode", path, err))?;

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut staged = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))
        .map_err(|err| ShimError::spec_io("stage", path, err))?;
    staged
        .write_all(&raw)
        .map_err(|err| ShimError::spec_io("write", path, err))?;
    staged
        .persist(path)
        .map_err(|err| ShimError::spec_io("write", path, err))?;

    debug!(path = %path.display(), "launch spec rewritten");
    Ok(())
}
