use crate::allowlist::SHUTDOWN_PINS;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from heartline.toml.
///
/// Everything here is deployment plumbing: which chip and pin to use, where
/// markers live, what to run on the way down. Protocol timing is deliberately
/// absent; those values are constants in the engine and dispatcher.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct HeartlineConfig {
    pub line: LineConfig,
    pub shutdown: ShutdownConfig,
    pub markers: MarkerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// GPIO character device the communication pin lives on.
    pub chip: PathBuf,
    /// Communication pin (BCM numbering). Must be in `allowed_pins`.
    pub pin: u32,
    /// Pins this deployment may use. Defaults to the shutdown-protocol set.
    pub allowed_pins: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Best-effort cleanup script run before the OS action. Optional.
    pub kill_script: Option<PathBuf>,
    /// Command invoked when the controller requests a halt.
    pub halt_command: String,
    /// Command invoked when the controller requests a reboot.
    pub reboot_command: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Directory kill markers are written to.
    pub dir: PathBuf,
    /// Filename prefix for kill markers.
    pub prefix: String,
}

// --- Default implementations ---

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            chip: PathBuf::from("/dev/gpiochip0"),
            pin: 20,
            allowed_pins: SHUTDOWN_PINS.to_vec(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            kill_script: None,
            halt_command: "halt".to_string(),
            reboot_command: "reboot".to_string(),
        }
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "heartline-kill".to_string(),
        }
    }
}

/// Errors from loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load configuration from `path`. A missing file is not an error; every
/// setting has a default that matches the stock deployment.
pub fn load(path: &Path) -> Result<HeartlineConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(HeartlineConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
