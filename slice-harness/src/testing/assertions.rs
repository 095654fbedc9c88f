//! Assertions over visit reports and failure clipboards.

use std::collections::HashMap;

use crate::core::failure_keys;
use crate::core::StageDisposition;
use crate::engine::VisitReport;

/// Asserts that a visit performed four handshakes per stage.
pub fn assert_lockstep(report: &VisitReport, stage_count: usize) {
    assert_eq!(
        report.handshakes,
        4 * stage_count,
        "Expected {} handshakes for {} stages, got {}",
        4 * stage_count,
        stage_count,
        report.handshakes
    );
}

/// Asserts that the named stage has the expected disposition.
pub fn assert_disposition(report: &VisitReport, stage: &str, expected: StageDisposition) {
    let trace = report
        .trace(stage)
        .unwrap_or_else(|| panic!("No trace for stage '{stage}'"));
    assert_eq!(
        trace.disposition, expected,
        "Expected stage '{stage}' to be {expected}, got {}",
        trace.disposition
    );
}

/// Asserts that the named stage forwarded its input clipboard unchanged.
pub fn assert_passed_through(report: &VisitReport, stage: &str) {
    let trace = report
        .trace(stage)
        .unwrap_or_else(|| panic!("No trace for stage '{stage}'"));
    assert!(
        trace.passed_through_unchanged(),
        "Expected stage '{stage}' to pass its clipboard through, got {trace:?}"
    );
}

/// Asserts that clipboard contents carry all five failure annotations for
/// the given stage.
pub fn assert_failure_annotations(
    data: &HashMap<String, serde_json::Value>,
    stage: &str,
    stage_n: i32,
) {
    for key in failure_keys::ALL {
        assert!(
            data.contains_key(key),
            "Expected failure key '{key}'. Keys: {:?}",
            data.keys().collect::<Vec<_>>()
        );
    }
    assert_eq!(
        data.get(failure_keys::FAILED_IN_STAGE),
        Some(&serde_json::json!(stage))
    );
    assert_eq!(
        data.get(failure_keys::FAILED_IN_STAGE_N),
        Some(&serde_json::json!(stage_n))
    );
}
