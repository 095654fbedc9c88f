//! Policy file loading.
//!
//! Policies may be YAML (`.yaml`, `.yml`) or JSON (`.json`). A document with a
//! top-level `execute` key uses that subtree as the pipeline policy; otherwise
//! the whole document is the policy.

use super::{PipelinePolicy, StageBinding};
use crate::errors::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use tracing::warn;

const EXECUTE_KEY: &str = "execute";

impl PipelinePolicy {
    /// Loads and validates a policy file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, has an unknown
    /// extension, does not parse, or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase);

        let document: serde_json::Value = match extension.as_deref() {
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlParse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|source| ConfigError::JsonParse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        let mut policy = Self::from_document(document, path)?;
        policy.source = Some(path.to_path_buf());
        Ok(policy)
    }

    /// Parses a YAML policy from a string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing or validation fails.
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let origin = PathBuf::from("<inline>");
        let document: serde_json::Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::YamlParse {
                path: origin.clone(),
                source,
            })?;
        Self::from_document(document, &origin)
    }

    fn from_document(mut document: serde_json::Value, origin: &Path) -> ConfigResult<Self> {
        if let Some(execute) = document.get_mut(EXECUTE_KEY).map(serde_json::Value::take) {
            document = execute;
        }
        if document.is_null() {
            document = serde_json::Value::Object(serde_json::Map::new());
        }

        let policy: Self =
            serde_json::from_value(document).map_err(|source| ConfigError::JsonParse {
                path: origin.to_path_buf(),
                source,
            })?;
        policy.validate()?;
        Ok(policy)
    }

    /// Checks structural constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violation found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.event_receive_timeout == 0 {
            return Err(ConfigError::invalid("eventReceiveTimeout must be positive"));
        }
        for (index, binding) in self.app_stage.iter().enumerate() {
            if binding.resolved_name().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "appStage {} has no usable name",
                    index + 1
                )));
            }
        }
        if let Some(topic) = self.failure_stage.as_ref().and_then(StageBinding::topic) {
            warn!(topic, "Ignoring eventTopic on failureStage; it is never event-gated");
        }
        Ok(())
    }
}
