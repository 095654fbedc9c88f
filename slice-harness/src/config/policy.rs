//! Pipeline policy model.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Implementation reference of the pass-through stage used when a binding
/// names no `parallelClass`.
pub const NOOP_STAGE: &str = "NoOpParallelProcessing";

/// Topic value that means "no event gate" in policy documents.
const NO_TOPIC: &str = "None";

fn default_broker_host() -> String {
    "localhost".to_string()
}

const fn default_receive_timeout_ms() -> u64 {
    900
}

const fn default_retry_delay_ms() -> u64 {
    100
}

/// Whether the slice loops over visits forever or stops after one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run visits until shutdown.
    #[default]
    Continuous,
    /// Run exactly one visit, then return.
    #[serde(alias = "oneLoop", alias = "single")]
    OneLoop,
}

/// One stage entry of the policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageBinding {
    /// Display name; defaults to the last segment of `parallel_class`.
    #[serde(default)]
    pub name: Option<String>,
    /// Registry key of the stage implementation.
    #[serde(default)]
    pub parallel_class: Option<String>,
    /// Configuration sub-document handed to the stage factory.
    #[serde(default)]
    pub stage_policy: Option<serde_json::Value>,
    /// Topic to wait on before the stage runs.
    #[serde(default)]
    pub event_topic: Option<String>,
    /// Whether the stage participates in inter-slice data sharing.
    #[serde(default)]
    pub share_data: bool,
}

impl StageBinding {
    /// Creates a binding for the given implementation.
    #[must_use]
    pub fn new(name: impl Into<String>, parallel_class: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            parallel_class: Some(parallel_class.into()),
            ..Default::default()
        }
    }

    /// Sets the stage policy.
    #[must_use]
    pub fn with_policy(mut self, policy: serde_json::Value) -> Self {
        self.stage_policy = Some(policy);
        self
    }

    /// Sets the event topic.
    #[must_use]
    pub fn with_event_topic(mut self, topic: impl Into<String>) -> Self {
        self.event_topic = Some(topic.into());
        self
    }

    /// Sets the share-data flag.
    #[must_use]
    pub fn with_share_data(mut self, share_data: bool) -> Self {
        self.share_data = share_data;
        self
    }

    /// Returns the implementation reference, falling back to the no-op stage.
    #[must_use]
    pub fn implementation(&self) -> &str {
        self.parallel_class
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(NOOP_STAGE)
    }

    /// Returns the configured name, or the last path segment of the
    /// implementation reference.
    #[must_use]
    pub fn resolved_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => last_segment(self.implementation()).to_string(),
        }
    }

    /// Returns the bound topic, treating `"None"` and blanks as unbound.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.event_topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != NO_TOPIC)
    }
}

/// Returns the last `.` or `::` separated segment of an implementation path.
#[must_use]
pub fn last_segment(path: &str) -> &str {
    path.rsplit(|c| c == '.' || c == ':')
        .find(|s| !s.is_empty())
        .unwrap_or(path)
}

/// Database settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabasePolicy {
    /// Connection URL passed through to stages as `dbUrl`.
    #[serde(default)]
    pub url: Option<String>,
}

/// The `execute` section of a pipeline policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelinePolicy {
    /// Event broker address handed to stages and the event system.
    #[serde(default = "default_broker_host")]
    pub event_broker_host: String,
    /// Continuous or single-visit execution.
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Ordered application stages.
    #[serde(default)]
    pub app_stage: Vec<StageBinding>,
    /// Stage invoked with diagnostics when another stage fails.
    #[serde(default)]
    pub failure_stage: Option<StageBinding>,
    /// Log filter directive (e.g. `"debug"` or `"slice_harness=trace"`).
    #[serde(default)]
    pub log_threshold: Option<String>,
    /// Also copy log output to a per-rank `Slice{rank}.log` file.
    #[serde(default)]
    pub local_log_mode: bool,
    /// Directory policy handed to the directory resolver, uninterpreted here.
    #[serde(default)]
    pub dir: Option<serde_json::Value>,
    /// Database settings.
    #[serde(default)]
    pub database: Option<DatabasePolicy>,
    /// Per-attempt event receive timeout in milliseconds.
    #[serde(default = "default_receive_timeout_ms")]
    pub event_receive_timeout: u64,
    /// Delay between event receive attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub event_retry_delay: u64,
    /// File the policy was loaded from.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            event_broker_host: default_broker_host(),
            execution_mode: ExecutionMode::default(),
            app_stage: Vec::new(),
            failure_stage: None,
            log_threshold: None,
            local_log_mode: false,
            dir: None,
            database: None,
            event_receive_timeout: default_receive_timeout_ms(),
            event_retry_delay: default_retry_delay_ms(),
            source: None,
        }
    }
}

impl PipelinePolicy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage binding.
    #[must_use]
    pub fn with_stage(mut self, binding: StageBinding) -> Self {
        self.app_stage.push(binding);
        self
    }

    /// Sets the failure stage binding.
    #[must_use]
    pub fn with_failure_stage(mut self, binding: StageBinding) -> Self {
        self.failure_stage = Some(binding);
        self
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Returns the number of application stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.app_stage.len()
    }

    /// Returns the per-attempt receive timeout.
    #[must_use]
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.event_receive_timeout)
    }

    /// Returns the delay between receive attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.event_retry_delay)
    }

    /// Returns the database URL, if configured.
    #[must_use]
    pub fn database_url(&self) -> Option<&str> {
        self.database.as_ref().and_then(|db| db.url.as_deref())
    }

    /// Returns the policy file name up to its first `.`, if loaded from a file.
    #[must_use]
    pub fn policy_name(&self) -> Option<&str> {
        self.source
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('.').next())
            .filter(|name| !name.is_empty())
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.app_stage.iter().map(StageBinding::resolved_name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_binding_defaults_to_noop() {
        let binding = StageBinding::default();
        assert_eq!(binding.implementation(), NOOP_STAGE);
        assert_eq!(binding.resolved_name(), NOOP_STAGE);
    }

    #[test]
    fn test_binding_name_from_implementation_path() {
        let binding = StageBinding {
            parallel_class: Some("lsst.ip.isr.IsrStage".to_string()),
            ..Default::default()
        };
        assert_eq!(binding.resolved_name(), "IsrStage");

        let binding = StageBinding {
            parallel_class: Some("crate::stages::Calibrate".to_string()),
            ..Default::default()
        };
        assert_eq!(binding.resolved_name(), "Calibrate");
    }

    #[test]
    fn test_topic_none_is_unbound() {
        assert_eq!(StageBinding::default().with_event_topic("None").topic(), None);
        assert_eq!(StageBinding::default().with_event_topic("  ").topic(), None);
        assert_eq!(
            StageBinding::default().with_event_topic("triggerVisit").topic(),
            Some("triggerVisit")
        );
    }

    #[test]
    fn test_policy_deserialize_camel_case() {
        let policy: PipelinePolicy = serde_json::from_value(json!({
            "eventBrokerHost": "broker.example.org",
            "executionMode": "oneloop",
            "appStage": [
                {"name": "a", "parallelClass": "Echo", "eventTopic": "go", "shareData": true},
                {"parallelClass": "Echo"}
            ],
            "failureStage": {"name": "fail", "parallelClass": "LogFailureStage"},
            "database": {"url": "mysql://db/run"}
        }))
        .unwrap();

        assert_eq!(policy.event_broker_host, "broker.example.org");
        assert_eq!(policy.execution_mode, ExecutionMode::OneLoop);
        assert_eq!(policy.stage_count(), 2);
        assert!(policy.app_stage[0].share_data);
        assert_eq!(policy.stage_names(), vec!["a".to_string(), "Echo".to_string()]);
        assert_eq!(policy.database_url(), Some("mysql://db/run"));
        assert_eq!(policy.event_receive_timeout, 900);
        assert_eq!(policy.retry_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_execution_mode_default() {
        let policy: PipelinePolicy = serde_json::from_value(json!({})).unwrap();
        assert_eq!(policy.execution_mode, ExecutionMode::Continuous);
        assert_eq!(policy.event_broker_host, "localhost");
    }
}
