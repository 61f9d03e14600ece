use super::CollabFuture;
use crate::apply::types::HardeningMode;
use crate::error::ConfigManagerError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Settings of the host's declarative-configuration manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationState {
    pub refresh_mode: String,
    pub configuration_mode: String,
    pub reboot_node_if_needed: bool,
    pub action_after_reboot: String,
}

impl Default for ConfigurationState {
    fn default() -> Self {
        Self {
            refresh_mode: "Push".into(),
            configuration_mode: "ApplyAndMonitor".into(),
            reboot_node_if_needed: false,
            action_after_reboot: "ContinueConfiguration".into(),
        }
    }
}

/// Settings pushed to the configuration manager before declarative apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyConfiguration {
    pub refresh_mode: String,
    pub configuration_mode: String,
    /// Always false: reboots are coordinated by the apply engine.
    pub reboot_node_if_needed: bool,
    pub action_after_reboot: String,
}

impl ApplyConfiguration {
    pub fn for_mode(mode: HardeningMode) -> Self {
        let configuration_mode = match mode {
            HardeningMode::AuditOnly => "ApplyAndMonitor",
            HardeningMode::Safe => "ApplyOnly",
            HardeningMode::Full => "ApplyAndAutoCorrect",
        };
        Self {
            refresh_mode: "Push".into(),
            configuration_mode: configuration_mode.into(),
            reboot_node_if_needed: false,
            action_after_reboot: "ContinueConfiguration".into(),
        }
    }
}

pub trait ConfigurationManager: Send + Sync {
    fn name(&self) -> &str;

    fn get_state(&self) -> CollabFuture<'_, Result<ConfigurationState, ConfigManagerError>>;

    fn configure<'a>(
        &'a self,
        config: &'a ApplyConfiguration,
    ) -> CollabFuture<'a, Result<(), ConfigManagerError>>;

    fn reset<'a>(
        &'a self,
        state: &'a ConfigurationState,
    ) -> CollabFuture<'a, Result<(), ConfigManagerError>>;
}

/// Process-local configuration manager for hosts without a declarative
/// configuration service.
pub struct InMemoryConfigurationManager {
    state: Mutex<ConfigurationState>,
}

impl InMemoryConfigurationManager {
    pub fn new() -> Self {
        Self::with_state(ConfigurationState::default())
    }

    pub fn with_state(state: ConfigurationState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn current(&self) -> ConfigurationState {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, next: ConfigurationState) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = next;
    }
}

impl ConfigurationManager for InMemoryConfigurationManager {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn get_state(&self) -> CollabFuture<'_, Result<ConfigurationState, ConfigManagerError>> {
        Box::pin(async move { Ok(self.current()) })
    }

    fn configure<'a>(
        &'a self,
        config: &'a ApplyConfiguration,
    ) -> CollabFuture<'a, Result<(), ConfigManagerError>> {
        Box::pin(async move {
            self.replace(ConfigurationState {
                refresh_mode: config.refresh_mode.clone(),
                configuration_mode: config.configuration_mode.clone(),
                reboot_node_if_needed: config.reboot_node_if_needed,
                action_after_reboot: config.action_after_reboot.clone(),
            });
            Ok(())
        })
    }

    fn reset<'a>(
        &'a self,
        state: &'a ConfigurationState,
    ) -> CollabFuture<'a, Result<(), ConfigManagerError>> {
        Box::pin(async move {
            self.replace(state.clone());
            Ok(())
        })
    }
}
