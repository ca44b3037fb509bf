use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_http_port() -> u16 {
    8080
}

fn default_model_path() -> PathBuf {
    PathBuf::from("model/drive_failure_model.onnx")
}

fn default_feature_map_path() -> PathBuf {
    PathBuf::from("model/feature_map.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port for the loopback HTTP/WebSocket surface
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Replay scripted command fixtures instead of touching the system
    #[serde(default)]
    pub simulation: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub json_logs: bool,
    /// Pretrained SATA failure classifier artifact; absence is expected
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_feature_map_path")]
    pub feature_map_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            simulation: false,
            verbose: false,
            json_logs: false,
            model_path: default_model_path(),
            feature_map_path: default_feature_map_path(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: AppConfig = toml::from_str("http_port = 9090").unwrap();
        assert_eq!(config.http_port, 9090);
        assert!(!config.simulation);
        assert_eq!(config.model_path, default_model_path());
    }
}
