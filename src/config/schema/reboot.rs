use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_flag_paths() -> Vec<String> {
    vec!["/var/run/reboot-required".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebootConfig {
    /// Files whose presence means the host has a reboot pending.
    #[serde(default = "default_flag_paths")]
    pub flag_paths: Vec<String>,
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self {
            flag_paths: default_flag_paths(),
        }
    }
}

impl RebootConfig {
    pub fn resolved_flag_paths(&self) -> Vec<PathBuf> {
        self.flag_paths
            .iter()
            .map(|raw| PathBuf::from(shellexpand::tilde(raw).into_owned()))
            .collect()
    }
}
