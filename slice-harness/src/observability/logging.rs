//! Subscriber installation for slice processes.
//!
//! Output always goes to stdout. With local log mode on, every record is also
//! copied to `Slice{rank}.log`, in the log directory when one is set.

use crate::config::PipelinePolicy;
use crate::errors::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const DEFAULT_DIRECTIVE: &str = "info";

/// How a slice process formats, filters, and copies its log output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive; `RUST_LOG` is consulted when unset.
    pub threshold: Option<String>,
    /// Emit one JSON object per line on stdout.
    pub json: bool,
    /// Copy output to a per-rank log file.
    pub local_file: bool,
    /// Directory for the per-rank log file; the working directory when unset.
    pub log_dir: Option<PathBuf>,
    /// Rank the log file is named after.
    pub rank: i32,
}

impl LoggingConfig {
    /// Reads `logThreshold` and `localLogMode` from the policy.
    #[must_use]
    pub fn from_policy(policy: &PipelinePolicy) -> Self {
        Self {
            threshold: policy.log_threshold.clone(),
            local_file: policy.local_log_mode,
            ..Self::default()
        }
    }

    /// Sets the filter directive.
    #[must_use]
    pub fn with_threshold(mut self, threshold: impl Into<String>) -> Self {
        self.threshold = Some(threshold.into());
        self
    }

    /// Switches JSON output on or off.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Switches the per-rank log file on or off.
    #[must_use]
    pub fn with_local_file(mut self, local_file: bool) -> Self {
        self.local_file = local_file;
        self
    }

    /// Sets the log directory. Blank and `"None"` clear it.
    #[must_use]
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        let log_dir = log_dir.into();
        self.log_dir = match log_dir.to_str().map(str::trim) {
            Some("" | "None") => None,
            _ => Some(log_dir),
        };
        self
    }

    /// Sets the rank.
    #[must_use]
    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    /// The per-rank log file, if local log mode is on.
    #[must_use]
    pub fn log_file_path(&self) -> Option<PathBuf> {
        if !self.local_file {
            return None;
        }
        let name = format!("Slice{}.log", self.rank);
        Some(match &self.log_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        })
    }

    /// Builds the filter this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the threshold is not a valid filter directive.
    pub fn filter(&self) -> ConfigResult<EnvFilter> {
        match self.threshold.as_deref().map(str::trim) {
            Some(directive) if !directive.is_empty() => EnvFilter::try_new(directive)
                .map_err(|e| ConfigError::invalid(format!("bad logThreshold '{directive}': {e}"))),
            _ => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))),
        }
    }

    /// Builds the subscriber without installing it.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for a bad threshold and `LogFile` if the per-rank
    /// log file cannot be created.
    pub fn subscriber(&self) -> ConfigResult<impl Subscriber + Send + Sync + 'static> {
        let stdout = fmt::layer().with_target(true);
        let mut layers = vec![if self.json {
            stdout.json().boxed()
        } else {
            stdout.boxed()
        }];

        if let Some(path) = self.log_file_path() {
            let file = File::create(&path).map_err(|source| ConfigError::LogFile {
                path: path.clone(),
                source,
            })?;
            layers.push(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            );
        }

        Ok(tracing_subscriber::registry()
            .with(self.filter()?)
            .with(layers))
    }
}

/// Installs the global subscriber.
///
/// Returns `false` if a subscriber was already installed, which is not an
/// error: tests and embedding applications often install their own.
///
/// # Errors
///
/// Returns `Invalid` if the threshold cannot be parsed, `LogFile` if the
/// per-rank log file cannot be created.
pub fn init_logging(config: &LoggingConfig) -> ConfigResult<bool> {
    let subscriber = config.subscriber()?;
    let installed = subscriber.try_init().is_ok();
    if installed {
        if let Some(path) = config.log_file_path() {
            tracing::info!(rank = config.rank, path = %path.display(), "Replicating log output");
        }
    }
    Ok(installed)
}
