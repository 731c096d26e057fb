use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cause::{CauseSerializer, DEFAULT_MAX_CAUSE_DEPTH};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Error reading broker config from {}", path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Invalid broker config")]
    Parse { source: serde_yaml::Error },
}

/// Tunables of a [`crate::Broker`].
///
/// Usually set in code with [`crate::BrokerBuilder::with_config`], but can also be loaded from
/// YAML:
///
/// ```yaml
/// prettyPrint: true
/// maxCauseDepth: 8
/// includeStackFrames: false
/// slowInvocationThreshold: 250ms
/// ```
///
/// Every key is optional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BrokerConfig {
    /// Pretty-print encoded responses.
    pub pretty_print: bool,

    /// How many links of a failure's cause chain are included in error responses.  Deeper causes
    /// are cut off and the cut is marked on the last cause included.
    pub max_cause_depth: usize,

    /// Include the stack frames of the backtrace captured with a failure, if one was captured.
    pub include_stack_frames: bool,

    /// Log a warning for every invocation that takes longer than this.
    ///
    /// `None` indicates no limit.
    #[serde(with = "humantime_serde")]
    pub slow_invocation_threshold: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            pretty_print: false,
            max_cause_depth: DEFAULT_MAX_CAUSE_DEPTH,
            include_stack_frames: true,
            slow_invocation_threshold: None,
        }
    }
}

impl BrokerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse { source })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml_str(&yaml)
    }

    pub(crate) fn cause_serializer(&self) -> CauseSerializer {
        CauseSerializer::new(self.max_cause_depth, self.include_stack_frames)
    }
}
