//! Harness fixtures: a coordinator stand-in and a ready-to-run slice.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::barrier::{handshake_pair, CommLink};
use crate::config::PipelinePolicy;
use crate::context::SliceIdentity;
use crate::engine::{ShutdownHook, SliceEngine};
use crate::errors::HarnessError;
use crate::events::InMemoryEventSystem;
use crate::stages::{ParallelProcessing, StageRegistry};

/// Plays the coordinator's side of the barrier until the slice goes away.
///
/// The task resolves to the number of completed handshakes, startup
/// rendezvous included.
pub fn spawn_lockstep_peer(link: CommLink) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut completed = 0;
        while link.release().await.is_ok() {
            completed += 1;
        }
        completed
    })
}

/// A shutdown hook that only counts how often it was invoked.
#[derive(Debug, Clone, Default)]
pub struct RecordingShutdown {
    calls: Arc<AtomicUsize>,
}

impl RecordingShutdown {
    /// Creates a new hook.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of shutdown requests seen.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ShutdownHook for RecordingShutdown {
    fn terminate(&self, _identity: &SliceIdentity) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything needed to run a slice in-process.
#[derive(Debug)]
pub struct SliceFixture {
    /// Identity given to the slice.
    pub identity: SliceIdentity,
    /// Registry holding the built-ins plus any registered doubles.
    pub registry: Arc<StageRegistry>,
    /// In-process event broker.
    pub events: Arc<InMemoryEventSystem>,
    /// Shutdown hook installed on the slice.
    pub shutdown: RecordingShutdown,
}

impl Default for SliceFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl SliceFixture {
    /// Creates a fixture for rank 1 of a two-process run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            identity: SliceIdentity::new("TEST", "testPipe")
                .with_rank(1)
                .with_universe_size(2),
            registry: Arc::new(StageRegistry::with_builtins()),
            events: Arc::new(InMemoryEventSystem::new()),
            shutdown: RecordingShutdown::new(),
        }
    }

    /// Registers `processor` under `implementation`; every stage bound to it
    /// gets a clone.
    #[must_use]
    pub fn with_stage<P>(self, implementation: &str, processor: P) -> Self
    where
        P: ParallelProcessing + Clone + 'static,
    {
        self.registry
            .register_processing(implementation, move |_| Ok(processor.clone()));
        self
    }

    /// Builds a slice for `policy` and starts its coordinator peer.
    ///
    /// # Errors
    ///
    /// Returns whatever [`SliceEngineBuilder::build`](crate::engine::SliceEngineBuilder::build)
    /// rejects.
    pub fn launch(&self, policy: PipelinePolicy) -> Result<LockstepSlice, HarnessError> {
        let (local, link) = handshake_pair(self.identity.rank);
        let engine = SliceEngine::builder(self.identity.clone(), policy)
            .registry(Arc::clone(&self.registry))
            .barrier(Arc::new(local))
            .events(self.events.clone())
            .shutdown(Arc::new(self.shutdown.clone()))
            .build()?;
        Ok(LockstepSlice {
            engine,
            peer: spawn_lockstep_peer(link),
        })
    }
}

/// A built slice paired with its coordinator peer.
#[derive(Debug)]
pub struct LockstepSlice {
    /// The engine under test.
    pub engine: SliceEngine,
    peer: JoinHandle<usize>,
}

impl LockstepSlice {
    /// Drops the engine and returns the peer's handshake count.
    pub async fn finish(self) -> usize {
        drop(self.engine);
        self.peer.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::BarrierHandshake;

    #[tokio::test]
    async fn test_peer_counts_rounds() {
        let (local, link) = handshake_pair(0);
        let peer = spawn_lockstep_peer(link);

        for _ in 0..3 {
            local.handshake().await.unwrap();
        }
        drop(local);

        assert_eq!(peer.await.unwrap(), 3);
    }

    #[test]
    fn test_recording_shutdown() {
        let hook = RecordingShutdown::new();
        let installed: Arc<dyn ShutdownHook> = Arc::new(hook.clone());
        installed.terminate(&SliceIdentity::default());
        assert_eq!(hook.calls(), 1);
    }

    #[tokio::test]
    async fn test_launch_empty_policy() {
        let fixture = SliceFixture::new();
        let mut slice = fixture.launch(PipelinePolicy::new()).unwrap();

        let report = slice.engine.run_visit().await.unwrap();
        assert_eq!(report.handshakes, 0);
        assert_eq!(slice.finish().await, 1);
    }
}
