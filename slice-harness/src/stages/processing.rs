//! Clipboard-level stage work and the adapter that wires it to queues.

use super::{Stage, StageIo};
use crate::context::StageContext;
use crate::core::{Clipboard, Queue};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::{Instrument, Span};

/// The work a stage performs on one clipboard.
#[async_trait]
pub trait ParallelProcessing: Send + Sync + Debug {
    /// Processes the clipboard in place.
    async fn process(&self, clipboard: &Clipboard, ctx: &StageContext) -> Result<(), StageError>;

    /// Returns true for the pass-through variant.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Adapts a [`ParallelProcessing`] implementation to the [`Stage`] contract.
///
/// The input clipboard is peeked, processed, and only moved to the output
/// queue once processing succeeds, so a failing stage leaves it in place for
/// failure annotation.
pub struct ProcessingStage<P> {
    name: String,
    context: StageContext,
    span: Span,
    io: Option<StageIo>,
    processor: P,
}

impl<P: ParallelProcessing> ProcessingStage<P> {
    /// Creates a stage around `processor`.
    pub fn new(context: StageContext, span: Span, processor: P) -> Self {
        Self {
            name: context.name.clone(),
            context,
            span,
            io: None,
            processor,
        }
    }

    /// Returns the stage context.
    #[must_use]
    pub fn context(&self) -> &StageContext {
        &self.context
    }
}

impl<P: ParallelProcessing> Debug for ProcessingStage<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingStage")
            .field("name", &self.name)
            .field("stage_id", &self.context.stage_id)
            .field("initialized", &self.io.is_some())
            .field("processor", &self.processor)
            .finish()
    }
}

#[async_trait]
impl<P: ParallelProcessing> Stage for ProcessingStage<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, output: Arc<Queue>, input: Arc<Queue>) {
        self.io = Some(StageIo::new(output, input));
    }

    async fn apply_process(&self) -> Result<(), StageError> {
        let io = self
            .io
            .as_ref()
            .ok_or_else(|| StageError::NotInitialized(self.name.clone()))?;
        let clipboard = io
            .input
            .element()
            .ok_or_else(|| StageError::EmptyInput(self.name.clone()))?;

        self.processor
            .process(&clipboard, &self.context)
            .instrument(self.span.clone())
            .await?;

        io.transfer();
        Ok(())
    }

    fn is_noop(&self) -> bool {
        self.processor.is_noop()
    }
}

/// A closure-based processor.
pub struct FnProcessing<F>
where
    F: Fn(&Clipboard, &StageContext) -> Result<(), StageError> + Send + Sync,
{
    func: F,
}

impl<F> FnProcessing<F>
where
    F: Fn(&Clipboard, &StageContext) -> Result<(), StageError> + Send + Sync,
{
    /// Creates a processor from a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnProcessing<F>
where
    F: Fn(&Clipboard, &StageContext) -> Result<(), StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProcessing").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> ParallelProcessing for FnProcessing<F>
where
    F: Fn(&Clipboard, &StageContext) -> Result<(), StageError> + Send + Sync,
{
    async fn process(&self, clipboard: &Clipboard, ctx: &StageContext) -> Result<(), StageError> {
        (self.func)(clipboard, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SliceIdentity;
    use serde_json::json;

    fn area_stage() -> ProcessingStage<impl ParallelProcessing> {
        let ctx = SliceIdentity::new("run", "pipe").stage_context("area", 1);
        ProcessingStage::new(
            ctx,
            Span::none(),
            FnProcessing::new(|clipboard, _ctx| {
                let width = clipboard
                    .get("width")?
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| StageError::MissingKey("width".into()))?;
                let height = clipboard
                    .get("height")?
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| StageError::MissingKey("height".into()))?;
                clipboard.put("area", json!(width * height))?;
                Ok(())
            }),
        )
    }

    fn wire(stage: &mut impl Stage) -> StageIo {
        let io = StageIo::new(Arc::new(Queue::new()), Arc::new(Queue::new()));
        stage.initialize(io.output.clone(), io.input.clone());
        io
    }

    #[tokio::test]
    async fn test_success_moves_clipboard() {
        let mut stage = area_stage();
        let io = wire(&mut stage);
        let clipboard = Arc::new(Clipboard::new());
        clipboard.put("width", json!(2.0)).unwrap();
        clipboard.put("height", json!(3.0)).unwrap();
        io.input.add_dataset(clipboard.clone());

        stage.apply_process().await.unwrap();

        assert!(io.input.is_empty());
        let out = io.output.element().unwrap();
        assert!(Arc::ptr_eq(&out, &clipboard));
        assert_eq!(out.get("area").unwrap(), Some(json!(6.0)));
    }

    #[tokio::test]
    async fn test_failure_leaves_clipboard_on_input() {
        let mut stage = area_stage();
        let io = wire(&mut stage);
        io.input.add_dataset(Arc::new(Clipboard::new()));

        let err = stage.apply_process().await.unwrap_err();

        assert!(matches!(err, StageError::MissingKey(ref k) if k == "width"));
        assert_eq!(io.input.len(), 1);
        assert!(io.output.is_empty());
    }

    #[tokio::test]
    async fn test_uninitialized_stage_fails() {
        let stage = area_stage();
        let err = stage.apply_process().await.unwrap_err();
        assert!(matches!(err, StageError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_empty_input_fails() {
        let mut stage = area_stage();
        wire(&mut stage);
        let err = stage.apply_process().await.unwrap_err();
        assert!(matches!(err, StageError::EmptyInput(_)));
    }
}
