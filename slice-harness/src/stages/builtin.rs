//! Stages shipped with the harness.

use super::ParallelProcessing;
use crate::context::StageContext;
use crate::core::{failure_keys, Clipboard};
use crate::errors::StageError;
use async_trait::async_trait;
use tracing::error;

/// Registry name of [`LogFailure`].
pub const LOG_FAILURE_STAGE: &str = "LogFailureStage";

/// Pass-through processing: forwards the clipboard untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProcessing;

#[async_trait]
impl ParallelProcessing for NoOpProcessing {
    async fn process(&self, _clipboard: &Clipboard, _ctx: &StageContext) -> Result<(), StageError> {
        Ok(())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// A failure stage that logs the failure annotations found on its clipboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFailure;

#[async_trait]
impl ParallelProcessing for LogFailure {
    async fn process(&self, clipboard: &Clipboard, ctx: &StageContext) -> Result<(), StageError> {
        let field = |key: &str| -> Result<String, StageError> {
            Ok(match clipboard.get(key)? {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            })
        };

        let stage = field(failure_keys::FAILED_IN_STAGE)?;
        let stage_n = field(failure_keys::FAILED_IN_STAGE_N)?;
        let failure_type = field(failure_keys::FAILURE_TYPE)?;
        let message = field(failure_keys::FAILURE_MESSAGE)?;
        let traceback = field(failure_keys::FAILURE_TRACEBACK)?;

        error!(
            rank = ctx.rank,
            failed_in_stage = %stage,
            failed_in_stage_n = %stage_n,
            failure_type = %failure_type,
            failure_message = %message,
            "Stage failure recorded"
        );
        error!(traceback = %traceback, "Failure traceback");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SliceIdentity;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_leaves_clipboard_alone() {
        let ctx = SliceIdentity::default().stage_context("noop", 1);
        let clipboard = Clipboard::new();
        clipboard.put("k", json!(1)).unwrap();

        NoOpProcessing.process(&clipboard, &ctx).await.unwrap();

        assert_eq!(clipboard.len(), 1);
        assert!(NoOpProcessing.is_noop());
    }

    #[test]
    fn test_log_failure_reads_annotations() {
        let ctx = SliceIdentity::default().stage_context("failure", -1);
        let clipboard = Clipboard::new();
        clipboard.put(failure_keys::FAILED_IN_STAGE, json!("calibrate")).unwrap();
        clipboard.put(failure_keys::FAILED_IN_STAGE_N, json!(2)).unwrap();

        tokio_test::block_on(LogFailure.process(&clipboard, &ctx)).unwrap();
        assert!(!LogFailure.is_noop());
        assert_eq!(clipboard.len(), 2);
    }

    #[tokio::test]
    async fn test_log_failure_on_closed_clipboard_errors() {
        let ctx = SliceIdentity::default().stage_context("failure", -1);
        let clipboard = Clipboard::new();
        clipboard.close();

        assert!(LogFailure.process(&clipboard, &ctx).await.is_err());
    }
}
