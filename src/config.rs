use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime configuration.
///
/// Every field falls back to its fixed default individually when missing
/// from the file, so partial configs stay valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    // Runtime settings
    pub debug: bool,
    pub log_file: String,
    pub runtime_path: String,

    // Device selection
    pub default_strategy: String,
    pub preferred_vendor: String,
    pub blacklist_devices: Vec<String>,
    pub whitelist_devices: Vec<String>,

    // Scheduling
    #[serde(rename = "enableMultiGPU")]
    pub enable_multi_gpu: bool,
    #[serde(rename = "maxGPUPerContainer")]
    pub max_gpu_per_container: u32,

    // Driver injection
    pub inject_drivers: bool,
    pub cuda_path: String,
    pub rocm_path: String,
    #[serde(rename = "oneAPIPath")]
    pub one_api_path: String,

    // Monitoring
    pub enable_metrics: bool,
    pub metrics_port: u16,
    pub metrics_path: String,

    // Cost tracking
    pub enable_cost_tracking: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debug: false,
            log_file: "/var/log/accelshim.log".to_string(),
            runtime_path: "/usr/bin/runc".to_string(),
            default_strategy: "balanced".to_string(),
            preferred_vendor: "any".to_string(),
            blacklist_devices: Vec::new(),
            whitelist_devices: Vec::new(),
            enable_multi_gpu: false,
            max_gpu_per_container: 1,
            inject_drivers: true,
            cuda_path: "/usr/local/cuda".to_string(),
            rocm_path: "/opt/rocm".to_string(),
            one_api_path: "/opt/intel/oneapi".to_string(),
            enable_metrics: true,
            metrics_port: 9100,
            metrics_path: "/metrics".to_string(),
            enable_cost_tracking: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Config> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Load configuration, or the defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Config> {
        if path.exists() {
            Config::load(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Write configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, raw)
            .with_context(|| format!("failed to write config at {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_every_field() {
        let mut config = Config {
            debug: true,
            default_strategy: "cost".to_string(),
            preferred_vendor: "nvidia".to_string(),
            max_gpu_per_container: 4,
            metrics_port: 9200,
            ..Config::default()
        };
        config.blacklist_devices.push("nvidia:1".to_string());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_fields_fall_back_individually() {
        let loaded: Config = serde_json::from_str(r#"{"debug": true, "metricsPort": 9300}"#).unwrap();

        assert!(loaded.debug);
        assert_eq!(loaded.metrics_port, 9300);
        assert_eq!(loaded.runtime_path, "/usr/bin/runc");
        assert_eq!(loaded.default_strategy, "balanced");
        assert_eq!(loaded.cuda_path, "/usr/local/cuda");
    }

    #[test]
    fn load_or_default_without_a_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/accelshim.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn json_keys_match_the_published_shape() {
        let raw = serde_json::to_value(Config::default()).unwrap();
        for key in [
            "logFile",
            "runtimePath",
            "defaultStrategy",
            "preferredVendor",
            "enableMultiGPU",
            "maxGPUPerContainer",
            "injectDrivers",
            "cudaPath",
            "rocmPath",
            "oneAPIPath",
            "enableCostTracking",
        ] {
            assert!(raw.get(key).is_some(), "missing key {key}");
        }
    }
}
