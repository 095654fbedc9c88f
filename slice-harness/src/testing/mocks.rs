//! Stage doubles for exercising the engine.
//!
//! Each double is a [`ParallelProcessing`] implementation that is cheap to
//! clone; clones share their recordings, so a test can keep one handle and
//! register another with the stage registry.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::context::StageContext;
use crate::core::{Clipboard, Queue, NO_MORE_DATASETS};
use crate::errors::StageError;
use crate::stages::{ParallelProcessing, Stage, StageIo};

/// What a [`RecordingStage`] saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Stage name from the context.
    pub stage: String,
    /// Stage ordinal from the context.
    pub stage_id: i32,
    /// The clipboard processed.
    pub clipboard: Uuid,
    /// Clipboard contents on entry.
    pub data: HashMap<String, serde_json::Value>,
}

/// Records every clipboard it is given, then optionally writes values.
#[derive(Debug, Clone, Default)]
pub struct RecordingStage {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    writes: Vec<(String, serde_json::Value)>,
}

impl RecordingStage {
    /// Creates a new recording stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` under `key` on every clipboard processed.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.writes.push((key.into(), value));
        self
    }

    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the most recent call.
    #[must_use]
    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl ParallelProcessing for RecordingStage {
    async fn process(&self, clipboard: &Clipboard, ctx: &StageContext) -> Result<(), StageError> {
        self.calls.lock().push(RecordedCall {
            stage: ctx.name.clone(),
            stage_id: ctx.stage_id,
            clipboard: clipboard.id(),
            data: clipboard.to_dict()?,
        });
        for (key, value) in &self.writes {
            clipboard.put(key.clone(), value.clone())?;
        }
        Ok(())
    }
}

/// A stage whose work always fails.
#[derive(Debug, Clone)]
pub struct FailingStage {
    message: String,
}

impl FailingStage {
    /// Creates a failing stage with the given error message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ParallelProcessing for FailingStage {
    async fn process(&self, _clipboard: &Clipboard, _ctx: &StageContext) -> Result<(), StageError> {
        Err(StageError::processing(self.message.clone()))
    }
}

/// A stage whose work panics.
#[derive(Debug, Clone)]
pub struct PanickingStage {
    message: String,
}

impl PanickingStage {
    /// Creates a stage that panics with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ParallelProcessing for PanickingStage {
    async fn process(&self, _clipboard: &Clipboard, _ctx: &StageContext) -> Result<(), StageError> {
        panic!("{}", self.message);
    }
}

/// Places the shutdown sentinel on the clipboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentinelStage;

#[async_trait]
impl ParallelProcessing for SentinelStage {
    async fn process(&self, clipboard: &Clipboard, _ctx: &StageContext) -> Result<(), StageError> {
        clipboard.put(NO_MORE_DATASETS, serde_json::Value::Bool(true))?;
        Ok(())
    }
}

/// A stage that takes time to execute.
#[derive(Debug, Clone, Copy)]
pub struct SlowStage {
    delay: Duration,
}

impl SlowStage {
    /// Creates a slow stage with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
        }
    }
}

#[async_trait]
impl ParallelProcessing for SlowStage {
    async fn process(&self, _clipboard: &Clipboard, _ctx: &StageContext) -> Result<(), StageError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// A full [`Stage`] that forwards its clipboard to the output queue and then
/// reports a failure anyway.
#[derive(Debug)]
pub struct ForwardThenFailStage {
    name: String,
    io: Option<StageIo>,
}

impl ForwardThenFailStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            io: None,
        }
    }
}

#[async_trait]
impl Stage for ForwardThenFailStage {
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
        io.transfer();
        Err(StageError::processing("failed after forwarding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SliceIdentity;
    use serde_json::json;

    fn ctx(name: &str) -> StageContext {
        SliceIdentity::new("run", "pipe").stage_context(name, 1)
    }

    #[tokio::test]
    async fn test_recording_stage_shares_calls_across_clones() {
        let stage = RecordingStage::new().with_output("seen", json!(true));
        let registered = stage.clone();
        let clipboard = Clipboard::new();
        clipboard.put("in", json!(1)).unwrap();

        registered.process(&clipboard, &ctx("rec")).await.unwrap();

        assert_eq!(stage.call_count(), 1);
        let call = stage.last_call().unwrap();
        assert_eq!(call.stage, "rec");
        assert_eq!(call.clipboard, clipboard.id());
        assert_eq!(call.data.len(), 1);
        assert_eq!(clipboard.get("seen").unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_failing_stage() {
        let err = FailingStage::new("nope")
            .process(&Clipboard::new(), &ctx("fail"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ProcessingError");
    }

    #[tokio::test]
    async fn test_forward_then_fail_moves_clipboard() {
        let (input, output) = (Arc::new(Queue::new()), Arc::new(Queue::new()));
        input.add_dataset(Arc::new(Clipboard::new()));
        let mut stage = ForwardThenFailStage::new("half");
        stage.initialize(output.clone(), input.clone());

        assert!(stage.apply_process().await.is_err());
        assert!(input.is_empty());
        assert_eq!(output.len(), 1);
    }

    #[tokio::test]
    async fn test_sentinel_stage() {
        let clipboard = Clipboard::new();
        SentinelStage.process(&clipboard, &ctx("end")).await.unwrap();
        assert!(clipboard.contains_key(NO_MORE_DATASETS));
    }

    #[tokio::test]
    async fn test_slow_stage() {
        let start = std::time::Instant::now();
        SlowStage::with_delay_ms(10)
            .process(&Clipboard::new(), &ctx("slow"))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
