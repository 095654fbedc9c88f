//! Process-wide identity of a slice and the per-stage context derived from it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies one slice worker within a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceIdentity {
    /// The production run identifier shared by the pipeline and all slices.
    pub run_id: String,
    /// The pipeline name, used to scope event topics.
    pub pipeline_name: String,
    /// This slice's rank in the communicator.
    pub rank: i32,
    /// Worker identifier assigned by the launcher, `-1` if unknown.
    pub worker_id: i32,
    /// Total number of processes (coordinator plus slices).
    pub universe_size: usize,
}

impl Default for SliceIdentity {
    fn default() -> Self {
        Self {
            run_id: "TEST".to_string(),
            pipeline_name: "unnamed".to_string(),
            rank: -1,
            worker_id: -1,
            universe_size: 1,
        }
    }
}

impl SliceIdentity {
    /// Creates an identity for the given run and pipeline.
    #[must_use]
    pub fn new(run_id: impl Into<String>, pipeline_name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_name: pipeline_name.into(),
            ..Default::default()
        }
    }

    /// Sets the rank.
    #[must_use]
    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    /// Sets the worker id.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: i32) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// Sets the universe size.
    #[must_use]
    pub fn with_universe_size(mut self, universe_size: usize) -> Self {
        self.universe_size = universe_size;
        self
    }

    /// Builds the context handed to the stage at `stage_id`.
    #[must_use]
    pub fn stage_context(&self, name: impl Into<String>, stage_id: i32) -> StageContext {
        StageContext {
            name: name.into(),
            rank: self.rank,
            stage_id,
            universe_size: self.universe_size,
            run_id: self.run_id.clone(),
            locations: HashMap::new(),
        }
    }
}

/// System data given to a stage at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageContext {
    /// The stage name.
    pub name: String,
    /// The hosting slice's rank.
    pub rank: i32,
    /// 1-based stage ordinal; `-1` for the failure stage.
    pub stage_id: i32,
    /// Total number of processes.
    pub universe_size: usize,
    /// The run identifier.
    pub run_id: String,
    /// Named persistence locations (work, input, output, ..., `dbUrl`).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub locations: HashMap<String, String>,
}

impl StageContext {
    /// Sets the location map.
    #[must_use]
    pub fn with_locations(mut self, locations: HashMap<String, String>) -> Self {
        self.locations = locations;
        self
    }

    /// Returns true if this is the failure stage's context.
    #[must_use]
    pub fn is_failure_stage(&self) -> bool {
        self.stage_id < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_defaults() {
        let identity = SliceIdentity::default();
        assert_eq!(identity.run_id, "TEST");
        assert_eq!(identity.rank, -1);
        assert_eq!(identity.worker_id, -1);
    }

    #[test]
    fn test_stage_context_from_identity() {
        let identity = SliceIdentity::new("run42", "imgPipe")
            .with_rank(3)
            .with_universe_size(5);

        let ctx = identity.stage_context("isr", 2);
        assert_eq!(ctx.name, "isr");
        assert_eq!(ctx.rank, 3);
        assert_eq!(ctx.stage_id, 2);
        assert_eq!(ctx.universe_size, 5);
        assert_eq!(ctx.run_id, "run42");
        assert!(!ctx.is_failure_stage());
        assert!(identity.stage_context("fail", -1).is_failure_stage());
    }
}
