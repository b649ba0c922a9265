//! Global configuration model for the Stackwire engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StackwireError};
use crate::types::RemovalPolicy;

/// Root configuration for a Stackwire deployment session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackwireConfig {
    /// Directory holding the state and registry documents.
    pub state_dir: PathBuf,
    /// Upper bound for a single provider call, in seconds.
    pub operation_timeout_secs: u64,
    /// Removal policy applied to declarations that do not set one.
    pub default_removal_policy: RemovalPolicy,
    /// Tags merged into every resource of every stack.
    pub tags: BTreeMap<String, String>,
}

impl Default for StackwireConfig {
    fn default() -> Self {
        Self {
            state_dir: crate::constants::data_dir().clone(),
            operation_timeout_secs: crate::constants::DEFAULT_OPERATION_TIMEOUT_SECS,
            default_removal_policy: RemovalPolicy::default(),
            tags: BTreeMap::new(),
        }
    }
}

impl StackwireConfig {
    /// Parses a configuration from YAML text. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or a field has the wrong type.
    pub fn from_yaml(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).map_err(|e| StackwireError::Config {
            message: format!("malformed configuration: {e}"),
        })
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path).map_err(|e| StackwireError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Returns the provider operation timeout.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Path of the deployment state document.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join(crate::constants::STATE_FILE)
    }

    /// Path of the parameter registry document.
    #[must_use]
    pub fn registry_file(&self) -> PathBuf {
        self.state_dir.join(crate::constants::REGISTRY_FILE)
    }
}
