//! Per-workspace sync configuration.
//!
//! # Storage layout
//!
//! ```text
//! <workspace>/
//!   .agora/
//!     config.yaml   (mode 0600, optional; defaults apply when absent)
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::reputation::{ReputationParams, DEFAULT_LEARNING_RATE, DEFAULT_MONTHLY_DECAY_RATE};
use crate::types::{AgentId, RemoteDescriptor, SyncRemote};

/// Resolution for artifacts at equal versions whose bodies differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreakPolicy {
    /// Remote body replaces the local one; local gains a `merged` entry.
    #[default]
    RemoteWins,
    /// Local body is pushed over the remote one.
    LocalWins,
}

/// Contents of `.agora/config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Author recorded in provenance entries written by the engine.
    pub agent: AgentId,
    pub learning_rate: f64,
    pub monthly_decay_rate: f64,
    /// Reconnect-and-retry attempts after a rejected push.
    pub max_push_retries: u32,
    pub tie_break: TieBreakPolicy,
    pub remotes: BTreeMap<String, RemoteDescriptor>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            agent: AgentId::from("agora"),
            learning_rate: DEFAULT_LEARNING_RATE,
            monthly_decay_rate: DEFAULT_MONTHLY_DECAY_RATE,
            max_push_retries: 2,
            tie_break: TieBreakPolicy::default(),
            remotes: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    pub fn reputation_params(&self) -> ReputationParams {
        ReputationParams {
            learning_rate: self.learning_rate,
            monthly_decay_rate: self.monthly_decay_rate,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "learning_rate",
                reason: format!("{} is outside (0, 1]", self.learning_rate),
            });
        }
        if !(self.monthly_decay_rate >= 0.0 && self.monthly_decay_rate.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "monthly_decay_rate",
                reason: format!("{} must be a non-negative number", self.monthly_decay_rate),
            });
        }
        Ok(())
    }

    /// Look up a named remote and validate its descriptor.
    pub fn remote(&self, name: &str) -> Option<Result<SyncRemote, ConfigError>> {
        self.remotes
            .get(name)
            .map(|desc| SyncRemote::try_from(desc.clone()))
    }
}

/// `<root>/.agora/config.yaml`. Pure, no I/O.
pub fn config_path_at(root: &Path) -> PathBuf {
    root.join(".agora").join("config.yaml")
}

/// Load the workspace config. Missing file yields defaults.
///
/// Returns `ConfigError::Parse` (with path) if the YAML is malformed.
pub fn load_at(root: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(root);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(io_err(&path))?;
    let config: SyncConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;
    config.validate()?;
    Ok(config)
}

/// Atomically save the workspace config (`.tmp` sibling, chmod 0600, rename).
pub fn save_at(root: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let path = config_path_at(root);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    }
    let tmp = path.with_file_name("config.yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(io_err(&tmp))?;
    set_file_permissions(&tmp).map_err(io_err(&tmp))?;
    std::fs::rename(&tmp, &path).map_err(io_err(&path))?;
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError {
    let path = path.to_path_buf();
    move |source| ConfigError::Io { path, source }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
