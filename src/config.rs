use std::{collections::HashSet, fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GpioError;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_CONSUMER: &str = env!("CARGO_PKG_NAME");

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Directory holding `export` and the `gpio<N>` attribute directories.
    pub sysfs_root: PathBuf,
    /// Treat failed or short attribute writes as errors.
    pub strict_writes: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            strict_writes: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub controller: ControllerConfig,
    pub consumer: String,
    pub allowed_uids: HashSet<u32>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            consumer: DEFAULT_CONSUMER.to_string(),
            allowed_uids: HashSet::new(),
        }
    }
}

impl ServiceConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))
    }
}
