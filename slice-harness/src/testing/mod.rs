//! Testing utilities for slice harness pipelines.
//!
//! This module provides:
//! - Stage doubles that record, fail, panic, or request shutdown
//! - A coordinator stand-in and an in-process slice fixture
//! - Assertions over visit reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_disposition, assert_failure_annotations, assert_lockstep, assert_passed_through,
};
pub use fixtures::{spawn_lockstep_peer, LockstepSlice, RecordingShutdown, SliceFixture};
pub use mocks::{
    FailingStage, ForwardThenFailStage, PanickingStage, RecordedCall, RecordingStage,
    SentinelStage, SlowStage,
};
