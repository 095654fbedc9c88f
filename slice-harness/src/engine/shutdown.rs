//! What happens when a stage asks the slice to stop.

use crate::context::SliceIdentity;
use tracing::warn;

/// Invoked when a stage places the shutdown sentinel on its output clipboard.
///
/// The production hook never returns. A hook that does return makes the
/// engine stop the current visit on the spot, without further handshakes.
pub trait ShutdownHook: Send + Sync {
    /// Terminates the slice.
    fn terminate(&self, identity: &SliceIdentity);
}

/// Aborts the process.
///
/// This is not a coordinated exit: the coordinator and the other slices may
/// still be waiting on the next barrier.
///
/// The process ends through `SIGABRT` rather than `SIGKILL`, so the exit is
/// equally immediate (no destructors, no buffered output flushed) but may
/// leave a core dump where core dumps are enabled. Install a different hook
/// if the launcher needs `SIGKILL` semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct KillProcess;

impl ShutdownHook for KillProcess {
    fn terminate(&self, identity: &SliceIdentity) {
        warn!(
            rank = identity.rank,
            run_id = %identity.run_id,
            "Shutdown requested; aborting slice while peers may still be waiting on a handshake"
        );
        std::process::abort();
    }
}
