//! Per-stage outcome within a visit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a stage during one visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageDisposition {
    /// The stage's work ran and returned successfully.
    Processed,
    /// The fault flag was already set; the clipboard was forwarded unchanged.
    PassedThrough,
    /// The stage's work failed and the fault flag was raised.
    Failed,
    /// The stage produced the shutdown sentinel.
    ShutdownRequested,
}

impl StageDisposition {
    /// Returns true if the stage's own work ran to completion.
    #[must_use]
    pub fn ran(&self) -> bool {
        matches!(self, Self::Processed | Self::ShutdownRequested)
    }
}

impl fmt::Display for StageDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processed => write!(f, "processed"),
            Self::PassedThrough => write!(f, "passed_through"),
            Self::Failed => write!(f, "failed"),
            Self::ShutdownRequested => write!(f, "shutdown_requested"),
        }
    }
}
