//! # Slice Harness
//!
//! The worker side of a barrier-synchronized parallel pipeline.
//!
//! A pipeline run consists of one coordinator and many identical slice
//! workers. Each slice executes the same ordered list of stages over
//! successive visits, meeting the coordinator at a barrier around every
//! stage so all slices move in lockstep:
//!
//! - **Lockstep visits**: four barrier handshakes per stage per visit, always
//! - **Event gating**: stages can wait for a broker message before running
//! - **Fault isolation**: a failing stage raises a per-visit flag, an
//!   optional failure stage sees annotated diagnostics, and later stages pass
//!   the clipboard through
//! - **Policy driven**: stages are resolved by name through a registry from a
//!   YAML or JSON policy document
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use slice_harness::prelude::*;
//!
//! let policy = PipelinePolicy::from_file("pipeline.yaml")?;
//! let (local, link) = handshake_pair(rank);
//!
//! let mut engine = SliceEngine::builder(SliceIdentity::new(run_id, "imgPipe"), policy)
//!     .registry(Arc::new(registry))
//!     .barrier(Arc::new(local))
//!     .build()?;
//!
//! // `link` belongs to the communication layer.
//! engine.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod barrier;
pub mod config;
pub mod context;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::barrier::{handshake_pair, BarrierHandshake, CommLink, LocalHandshake};
    pub use crate::config::{ExecutionMode, PipelinePolicy, StageBinding};
    pub use crate::context::{DirectoryResolver, PolicyDirectories, SliceIdentity, StageContext};
    pub use crate::core::{failure_keys, Clipboard, Queue, StageDisposition, NO_MORE_DATASETS};
    pub use crate::engine::{
        KillProcess, RunSummary, ShutdownHook, SliceEngine, SliceEngineBuilder, VisitReport,
    };
    pub use crate::errors::{
        BarrierError, ClipboardError, ConfigError, EventError, HarnessError, StageError,
    };
    pub use crate::events::{EventReceiver, InMemoryEventSystem};
    pub use crate::observability::{init_logging, LoggingConfig};
    pub use crate::stages::{
        FnProcessing, ParallelProcessing, ProcessingStage, Stage, StageConstruction,
        StageRegistry,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
