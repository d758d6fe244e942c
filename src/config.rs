//! Project configuration.
//!
//! Handles parsing and management of `arnicomp.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file not found: {0}")]
    NotFound(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching `arnicomp.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArniCompConfig {
    #[serde(default)]
    pub package: PackageConfig,

    /// Data-memory window the compiler may allocate variables into.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Memory-mapped devices attached to the emulator's data bus.
    #[serde(default)]
    pub devices: DevicesConfig,

    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl ArniCompConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: ArniCompConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Search up from `start_dir` for `arnicomp.toml`; fall back to defaults
    /// if none is found before the filesystem root.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join("arnicomp.toml");
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default = "default_package_name")]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: String,
}

fn default_package_name() -> String {
    "arnicomp-project".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            name: default_package_name(),
            version: default_version(),
            description: String::new(),
        }
    }
}

/// The compiler's variable arena and scratch byte within the 16-bit data
/// address space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_var_start")]
    pub var_start: u16,

    #[serde(default = "default_var_end")]
    pub var_end: u16,

    #[serde(default = "default_scratch_addr")]
    pub scratch_addr: u16,
}

fn default_var_start() -> u16 {
    0x0000
}

fn default_var_end() -> u16 {
    0xFE00
}

fn default_scratch_addr() -> u16 {
    0xFEFF
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            var_start: default_var_start(),
            var_end: default_var_end(),
            scratch_addr: default_scratch_addr(),
        }
    }
}

/// One configured MMIO device's placement on the data bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub base: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    #[serde(default = "default_seven_segment")]
    pub seven_segment: Vec<DeviceConfig>,
}

fn default_seven_segment() -> Vec<DeviceConfig> {
    vec![DeviceConfig {
        id: "seg0".to_string(),
        base: 0xFF00,
    }]
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            seven_segment: default_seven_segment(),
        }
    }
}

/// Emulator run-loop defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,
}

fn default_max_cycles() -> u64 {
    1_000_000
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_full_data_window() {
        let config = ArniCompConfig::default();
        assert_eq!(config.memory.var_start, 0x0000);
        assert_eq!(config.devices.seven_segment[0].base, 0xFF00);
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let toml_str = r#"
[package]
name = "blink"
version = "1.0.0"

[memory]
var_start = 16
var_end = 240
scratch_addr = 250
"#;
        let config: ArniCompConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.package.name, "blink");
        assert_eq!(config.memory.var_start, 16);
        assert_eq!(config.memory.scratch_addr, 250);
        // devices section omitted -> falls back to the seven-segment default
        assert_eq!(config.devices.seven_segment[0].id, "seg0");
    }
}
