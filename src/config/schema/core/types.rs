use super::super::{ApplyConfig, ObservabilityConfig, PreflightConfig, RebootConfig};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub apply: ApplyConfig,

    #[serde(default)]
    pub preflight: PreflightConfig,

    #[serde(default)]
    pub reboot: RebootConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.apply.validate()?;
        if self.preflight.timeout_secs == 0 {
            bail!("preflight.timeout_secs must be greater than zero");
        }
        if self.preflight.interpreter.trim().is_empty() {
            bail!("preflight.interpreter cannot be empty");
        }
        Ok(())
    }
}
