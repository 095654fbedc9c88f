//! Error types for the slice harness.
//!
//! The taxonomy follows how failures are treated by the engine:
//!
//! - [`ConfigError`] is fatal and raised before the first visit.
//! - [`StageError`] is what stage work returns; the engine absorbs it into the
//!   visit's fault flag and never lets it cross a visit boundary.
//! - [`EventError`] and [`BarrierError`] come from the transport collaborators
//!   and propagate, since a desynchronized barrier cannot be recovered locally.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for slice harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration could not be resolved.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The event transport failed.
    #[error("{0}")]
    Event(#[from] EventError),

    /// The barrier handshake with the communication layer failed.
    #[error("{0}")]
    Barrier(#[from] BarrierError),

    /// A clipboard was used after being closed.
    #[error("{0}")]
    Clipboard(#[from] ClipboardError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading or resolving the pipeline policy.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a policy file from disk.
    #[error("Failed to read policy file at {path}: {source}")]
    FileRead {
        /// The policy path.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse a YAML policy file.
    #[error("Failed to parse YAML policy at {path}: {source}")]
    YamlParse {
        /// The policy path.
        path: PathBuf,
        /// The underlying YAML error.
        source: serde_yaml::Error,
    },

    /// Failed to parse a JSON policy file, or to map a parsed document onto the
    /// policy structure.
    #[error("Failed to parse policy at {path}: {source}")]
    JsonParse {
        /// The policy path.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The policy file extension is not one we know how to read.
    #[error("Unsupported policy format for {path} (expected .yaml, .yml or .json)")]
    UnsupportedFormat {
        /// The policy path.
        path: PathBuf,
    },

    /// No factory is registered for a stage implementation reference.
    #[error("Unknown stage implementation '{implementation}' for stage '{stage}'")]
    UnknownStage {
        /// The stage name.
        stage: String,
        /// The implementation reference that failed to resolve.
        implementation: String,
    },

    /// A stage requires a configuration sub-document that was not supplied.
    #[error("Stage '{stage}' requires a stagePolicy but none was given")]
    MissingStagePolicy {
        /// The stage name.
        stage: String,
    },

    /// The per-rank log file could not be created.
    #[error("Failed to create log file at {path}: {source}")]
    LogFile {
        /// The log file path.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Structurally invalid configuration.
    #[error("Invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-configuration error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Type alias for results of configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised by clipboard access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipboardError {
    /// The clipboard has been closed and may no longer be read or written.
    #[error("Clipboard {id} is closed")]
    Closed {
        /// The clipboard id.
        id: String,
    },
}

/// Errors returned by stage work.
///
/// Any of these, returned from `apply_process`, sets the visit fault flag.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage was invoked before `initialize` wired its queues.
    #[error("Stage '{0}' was not initialized with a queue pair")]
    NotInitialized(String),

    /// The stage's input queue was empty when it ran.
    #[error("Stage '{0}' found no clipboard on its input queue")]
    EmptyInput(String),

    /// A required clipboard entry was missing.
    #[error("Missing clipboard key '{0}'")]
    MissingKey(String),

    /// A clipboard entry had an unexpected shape.
    #[error("Invalid value for clipboard key '{key}': {reason}")]
    InvalidValue {
        /// The clipboard key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Clipboard access failed.
    #[error("{0}")]
    Clipboard(#[from] ClipboardError),

    /// Domain processing failed.
    #[error("{0}")]
    Processing(String),

    /// Stage work panicked; the payload message is captured.
    #[error("Stage panicked: {0}")]
    Panicked(String),

    /// Any other error raised by stage code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    /// Creates a processing error.
    #[must_use]
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }

    /// Returns the failure category recorded under `failureType`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "NotInitialized",
            Self::EmptyInput(_) => "EmptyInput",
            Self::MissingKey(_) => "MissingKey",
            Self::InvalidValue { .. } => "InvalidValue",
            Self::Clipboard(_) => "ClipboardError",
            Self::Processing(_) => "ProcessingError",
            Self::Panicked(_) => "Panic",
            Self::Other(_) => "Error",
        }
    }

    /// Renders the error and its source chain, one cause per line.
    ///
    /// For `anyhow` errors with a captured backtrace the backtrace is appended.
    #[must_use]
    pub fn traceback(&self) -> String {
        let mut out = format!("{}: {self}", self.kind());
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\nCaused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        if let Self::Other(err) = self {
            let backtrace = err.backtrace();
            if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
                out.push_str("\nBacktrace:\n");
                out.push_str(&backtrace.to_string());
            }
        }
        out
    }
}

/// Errors raised by the event transport.
#[derive(Debug, Clone, Error)]
pub enum EventError {
    /// `receive` was called for a topic with no receiver.
    #[error("No receiver created for topic '{topic}'")]
    NoReceiver {
        /// The scoped topic name.
        topic: String,
    },

    /// The broker connection failed.
    #[error("Event broker '{broker}' unavailable: {reason}")]
    BrokerUnavailable {
        /// The broker address.
        broker: String,
        /// The reason.
        reason: String,
    },
}

/// Errors raised by the barrier handshake.
#[derive(Debug, Clone, Error)]
pub enum BarrierError {
    /// The communication side of the handshake has gone away.
    #[error("Barrier peer disconnected for rank {rank}")]
    PeerDisconnected {
        /// The slice rank.
        rank: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_kinds() {
        assert_eq!(StageError::MissingKey("x".into()).kind(), "MissingKey");
        assert_eq!(StageError::processing("boom").kind(), "ProcessingError");
        assert_eq!(StageError::Panicked("oops".into()).kind(), "Panic");
        assert_eq!(StageError::from(anyhow::anyhow!("other")).kind(), "Error");
    }

    #[test]
    fn test_traceback_includes_causes() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err = StageError::from(anyhow::Error::new(io).context("reading input"));

        let trace = err.traceback();
        assert!(trace.starts_with("Error: reading input"));
        assert!(trace.contains("Caused by: missing file"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::UnknownStage {
            stage: "isr".to_string(),
            implementation: "lsst.ip.IsrStage".to_string(),
        };
        assert!(err.to_string().contains("lsst.ip.IsrStage"));

        let harness: HarnessError = err.into();
        assert!(matches!(harness, HarnessError::Config(_)));
    }

    #[test]
    fn test_clipboard_error_into_stage_error() {
        let err: StageError = ClipboardError::Closed { id: "abc".into() }.into();
        assert_eq!(err.kind(), "ClipboardError");
    }
}
