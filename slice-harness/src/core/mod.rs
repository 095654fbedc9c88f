//! Core data model for the slice harness.
//!
//! This module contains the types that flow between stages:
//! - [`Clipboard`], the per-visit data carrier
//! - [`Queue`], the hand-off buffer between adjacent stages
//! - [`StageDisposition`], the per-stage outcome of a visit

mod clipboard;
mod queue;
mod status;

pub use clipboard::{failure_keys, Clipboard, NO_MORE_DATASETS};
pub use queue::Queue;
pub use status::StageDisposition;
