//! Records of what happened during a visit.

use crate::core::{failure_keys, Clipboard, StageDisposition};
use crate::errors::{ClipboardError, StageError};
use crate::observability::{MemorySnapshot, VisitTiming};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One stage's passage through a visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTrace {
    /// Stage name.
    pub stage: String,
    /// 1-based stage ordinal.
    pub stage_id: i32,
    /// Outcome.
    pub disposition: StageDisposition,
    /// Clipboard at the head of the input queue before the stage ran.
    pub input: Option<Uuid>,
    /// Clipboard at the head of the output queue afterwards.
    pub output: Option<Uuid>,
}

impl StageTrace {
    /// Returns true if the stage forwarded its input clipboard untouched.
    #[must_use]
    pub fn passed_through_unchanged(&self) -> bool {
        self.disposition == StageDisposition::PassedThrough
            && self.input.is_some()
            && self.input == self.output
    }
}

/// Diagnostics for a failed stage, as written onto the failure clipboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    /// Name of the failing stage.
    pub stage: String,
    /// Ordinal of the failing stage.
    pub stage_id: i32,
    /// Error category.
    pub failure_type: String,
    /// Error message.
    pub message: String,
    /// Formatted cause chain.
    pub traceback: String,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
    /// Whether a failure stage was invoked for it.
    pub failure_stage_ran: bool,
}

impl FailureReport {
    /// Captures `error` raised by the stage at `stage_id`.
    #[must_use]
    pub fn new(stage: impl Into<String>, stage_id: i32, error: &StageError) -> Self {
        Self {
            stage: stage.into(),
            stage_id,
            failure_type: error.kind().to_string(),
            message: error.to_string(),
            traceback: error.traceback(),
            timestamp: Utc::now(),
            failure_stage_ran: false,
        }
    }

    /// Writes the five failure annotations onto `clipboard`.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the clipboard has been discarded.
    pub fn annotate(&self, clipboard: &Clipboard) -> Result<(), ClipboardError> {
        clipboard.put(failure_keys::FAILED_IN_STAGE, self.stage.clone().into())?;
        clipboard.put(failure_keys::FAILED_IN_STAGE_N, self.stage_id.into())?;
        clipboard.put(failure_keys::FAILURE_TYPE, self.failure_type.clone().into())?;
        clipboard.put(failure_keys::FAILURE_MESSAGE, self.message.clone().into())?;
        clipboard.put(failure_keys::FAILURE_TRACEBACK, self.traceback.clone().into())?;
        Ok(())
    }
}

/// Result of one visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitReport {
    /// 1-based visit number.
    pub visit: u64,
    /// Handshakes performed during the visit.
    pub handshakes: usize,
    /// Fault flag at the end of the visit.
    pub fault: bool,
    /// A stage produced the shutdown sentinel.
    pub shutdown: bool,
    /// Clipboards left over from the previous visit and discarded.
    pub leftovers_dropped: usize,
    /// Per-stage trace, in stage order.
    pub stages: Vec<StageTrace>,
    /// Failures, in the order they occurred.
    pub failures: Vec<FailureReport>,
    /// Time spent.
    pub timing: VisitTiming,
    /// Memory at the end of the visit.
    pub memory: MemorySnapshot,
}

impl VisitReport {
    pub(crate) fn new(visit: u64) -> Self {
        Self {
            visit,
            handshakes: 0,
            fault: false,
            shutdown: false,
            leftovers_dropped: 0,
            stages: Vec::new(),
            failures: Vec::new(),
            timing: VisitTiming::default(),
            memory: MemorySnapshot::default(),
        }
    }

    /// Looks up the trace of the named stage.
    #[must_use]
    pub fn trace(&self, stage: &str) -> Option<&StageTrace> {
        self.stages.iter().find(|t| t.stage == stage)
    }

    /// Returns true if every stage processed successfully.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.fault && !self.shutdown
    }
}

/// Totals across [`SliceEngine::run`](super::SliceEngine::run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Visits started.
    pub visits: u64,
    /// Visits that ended with the fault flag set.
    pub faulted_visits: u64,
    /// Handshakes performed inside visits; the startup handshake is excluded.
    pub visit_handshakes: usize,
    /// The run ended on the shutdown sentinel.
    pub shutdown: bool,
}

impl RunSummary {
    pub(crate) fn record(&mut self, report: &VisitReport) {
        self.visits += 1;
        self.visit_handshakes += report.handshakes;
        if report.fault {
            self.faulted_visits += 1;
        }
        self.shutdown |= report.shutdown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_annotate_writes_five_keys() {
        let error = StageError::processing("bad pixel");
        let report = FailureReport::new("calibrate", 2, &error);
        let clipboard = Clipboard::new();

        report.annotate(&clipboard).unwrap();

        for key in failure_keys::ALL {
            assert!(clipboard.contains_key(key), "missing {key}");
        }
        assert_eq!(clipboard.get(failure_keys::FAILED_IN_STAGE_N).unwrap(), Some(json!(2)));
        assert_eq!(
            clipboard.get(failure_keys::FAILURE_TYPE).unwrap(),
            Some(json!("ProcessingError"))
        );
    }

    #[test]
    fn test_annotate_closed_clipboard() {
        let report = FailureReport::new("s", 1, &StageError::processing("x"));
        let clipboard = Clipboard::new();
        clipboard.close();
        assert!(report.annotate(&clipboard).is_err());
    }

    #[test]
    fn test_pass_through_detection() {
        let id = Uuid::new_v4();
        let mut trace = StageTrace {
            stage: "s".into(),
            stage_id: 3,
            disposition: StageDisposition::PassedThrough,
            input: Some(id),
            output: Some(id),
        };
        assert!(trace.passed_through_unchanged());

        trace.output = Some(Uuid::new_v4());
        assert!(!trace.passed_through_unchanged());
    }

    #[test]
    fn test_summary_accumulates() {
        let mut summary = RunSummary::default();
        let mut first = VisitReport::new(1);
        first.handshakes = 8;
        first.fault = true;
        let mut second = VisitReport::new(2);
        second.handshakes = 6;
        second.shutdown = true;

        summary.record(&first);
        summary.record(&second);

        assert_eq!(summary.visits, 2);
        assert_eq!(summary.faulted_visits, 1);
        assert_eq!(summary.visit_handshakes, 14);
        assert!(summary.shutdown);
    }
}
