//! Logging setup and visit diagnostics.

mod diagnostics;
mod logging;

pub use diagnostics::{log_visit, CpuTimes, MemorySnapshot, VisitTimer, VisitTiming};
pub use logging::{init_logging, LoggingConfig};
