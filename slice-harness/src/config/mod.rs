//! Pipeline policy: the configuration document that drives a slice.
//!
//! - [`PipelinePolicy`]: the `execute` section, with stage bindings
//! - [`StageBinding`]: one stage entry (implementation, policy, topic)
//! - loading from YAML or JSON files via [`PipelinePolicy::from_file`]

mod loader;
mod policy;

pub use policy::{
    last_segment, DatabasePolicy, ExecutionMode, PipelinePolicy, StageBinding, NOOP_STAGE,
};
