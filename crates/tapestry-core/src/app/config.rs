//! Controller configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Worker creations per second across all compositions (burst is fixed at 1).
    #[serde(default = "default_creation_qps")]
    pub creation_qps: f64,
}

const fn default_creation_qps() -> f64 {
    5.0
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            creation_qps: default_creation_qps(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("creation_qps must be a positive finite number, got {0}")]
    InvalidCreationQps(f64),
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.creation_qps.is_finite() || self.creation_qps <= 0.0 {
            return Err(ConfigError::InvalidCreationQps(self.creation_qps));
        }
        Ok(())
    }
}
