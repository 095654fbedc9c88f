//! Stage trait and implementations.
//!
//! A stage is wired once to an input/output queue pair with
//! [`Stage::initialize`] and then invoked once per visit with
//! [`Stage::apply_process`]. Most stages only need to look at the clipboard
//! and should implement [`ParallelProcessing`], wrapped in
//! [`ProcessingStage`], rather than `Stage` directly.

mod builtin;
mod processing;
mod registry;

pub use builtin::{LogFailure, NoOpProcessing, LOG_FAILURE_STAGE};
pub use processing::{FnProcessing, ParallelProcessing, ProcessingStage};
pub use registry::{StageConstruction, StageFactory, StageRegistry};

use crate::core::{Clipboard, Queue};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Wires the stage to the queues it consumes from and produces into.
    ///
    /// The failure stage is re-initialized onto the failing stage's pair
    /// every time it runs.
    fn initialize(&mut self, output: Arc<Queue>, input: Arc<Queue>);

    /// Runs the stage's work for the current visit.
    ///
    /// On success the stage must have moved (or replaced) the clipboard from
    /// its input queue onto its output queue. On failure the engine takes over;
    /// stages should leave the input clipboard in place so it can be annotated.
    async fn apply_process(&self) -> Result<(), StageError>;

    /// Returns true for the pass-through variant, which the engine treats as
    /// "no failure stage" when bound as one.
    fn is_noop(&self) -> bool {
        false
    }
}

/// A stage's queue pair.
#[derive(Debug, Clone)]
pub struct StageIo {
    /// The queue the stage consumes from.
    pub input: Arc<Queue>,
    /// The queue the stage produces into.
    pub output: Arc<Queue>,
}

impl StageIo {
    /// Creates a queue pair, in `initialize` argument order.
    #[must_use]
    pub fn new(output: Arc<Queue>, input: Arc<Queue>) -> Self {
        Self { input, output }
    }

    /// Moves the head clipboard from input to output unchanged.
    pub fn transfer(&self) -> Option<Arc<Clipboard>> {
        let clipboard = self.input.get_next_dataset()?;
        self.output.add_dataset(clipboard.clone());
        Some(clipboard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_preserves_identity() {
        let io = StageIo::new(Arc::new(Queue::new()), Arc::new(Queue::new()));
        let clipboard = Arc::new(Clipboard::new());
        io.input.add_dataset(clipboard.clone());

        let moved = io.transfer().unwrap();
        assert!(Arc::ptr_eq(&moved, &clipboard));
        assert!(io.input.is_empty());
        assert!(Arc::ptr_eq(&io.output.element().unwrap(), &clipboard));
    }

    #[test]
    fn test_transfer_empty_input() {
        let io = StageIo::new(Arc::new(Queue::new()), Arc::new(Queue::new()));
        assert!(io.transfer().is_none());
        assert!(io.output.is_empty());
    }
}
