//! The slice engine: lockstep visit loop with fault isolation.
//!
//! A slice runs the same ordered stages as its peers. Every stage is
//! bracketed by two barrier rendezvous before and two after its work, so a
//! visit over N stages always performs `4 * N` handshakes, whatever the
//! stages do. A failing stage raises the visit's fault flag; the remaining
//! stages forward the clipboard untouched so the lockstep is kept.
//!
//! ```text
//! Q0 -> [stage 1] -> Q1 -> [stage 2] -> Q2 -> ... -> [stage N] -> QN
//! ```

mod builder;
mod configured;
mod report;
mod shutdown;

pub use builder::SliceEngineBuilder;
pub use configured::ConfiguredStage;
pub use report::{FailureReport, RunSummary, StageTrace, VisitReport};
pub use shutdown::{KillProcess, ShutdownHook};

use crate::barrier::BarrierHandshake;
use crate::config::{ExecutionMode, PipelinePolicy};
use crate::context::SliceIdentity;
use crate::core::{Clipboard, Queue, StageDisposition, NO_MORE_DATASETS};
use crate::errors::{HarnessError, StageError};
use crate::events::EventGate;
use crate::observability::{log_visit, MemorySnapshot, VisitTimer};
use crate::stages::{Stage, StageIo};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// One slice worker.
pub struct SliceEngine {
    identity: SliceIdentity,
    policy: PipelinePolicy,
    stages: Vec<ConfiguredStage>,
    failure_stage: Option<ConfiguredStage>,
    queues: Vec<Arc<Queue>>,
    barrier: Arc<dyn BarrierHandshake>,
    gate: EventGate,
    shutdown: Arc<dyn ShutdownHook>,
    fault: bool,
    started: bool,
    terminated: bool,
    visits: u64,
}

impl fmt::Debug for SliceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceEngine")
            .field("identity", &self.identity)
            .field("stages", &self.stages)
            .field("failure_stage", &self.failure_stage)
            .field("fault", &self.fault)
            .field("visits", &self.visits)
            .finish_non_exhaustive()
    }
}

/// Runs stage work, converting a panic into a stage error.
async fn guarded(stage: &dyn Stage) -> Result<(), StageError> {
    AssertUnwindSafe(stage.apply_process())
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(StageError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl SliceEngine {
    /// Starts building an engine.
    #[must_use]
    pub fn builder(identity: SliceIdentity, policy: PipelinePolicy) -> SliceEngineBuilder {
        SliceEngineBuilder::new(identity, policy)
    }

    /// The slice's identity.
    #[must_use]
    pub fn identity(&self) -> &SliceIdentity {
        &self.identity
    }

    /// The policy the engine was built from.
    #[must_use]
    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    /// The application stages, in order.
    #[must_use]
    pub fn stages(&self) -> &[ConfiguredStage] {
        &self.stages
    }

    /// The failure stage, if one is bound.
    #[must_use]
    pub fn failure_stage(&self) -> Option<&ConfiguredStage> {
        self.failure_stage.as_ref()
    }

    /// The `stage_count + 1` queues; stage `i` reads `Q[i-1]` and writes `Q[i]`.
    #[must_use]
    pub fn queues(&self) -> &[Arc<Queue>] {
        &self.queues
    }

    /// The current fault flag.
    #[must_use]
    pub fn fault(&self) -> bool {
        self.fault
    }

    /// Visits started so far.
    #[must_use]
    pub fn visits(&self) -> u64 {
        self.visits
    }

    /// Performs the startup rendezvous with the coordinator.
    ///
    /// Called implicitly by the first visit; calling it again is a no-op.
    pub async fn start(&mut self) -> Result<(), HarnessError> {
        if !self.started {
            debug!(rank = self.identity.rank, "Startup handshake");
            self.barrier.handshake().await?;
            self.started = true;
        }
        Ok(())
    }

    /// Runs visits until the execution mode or a shutdown request ends the run.
    pub async fn run(&mut self) -> Result<RunSummary, HarnessError> {
        self.start().await?;
        let mut summary = RunSummary::default();
        loop {
            let report = self.run_visit().await?;
            summary.record(&report);
            if report.shutdown {
                break;
            }
            if self.policy.execution_mode == ExecutionMode::OneLoop {
                info!(rank = self.identity.rank, "Single visit complete; terminating");
                break;
            }
        }
        Ok(summary)
    }

    /// Runs one visit over every stage.
    ///
    /// # Errors
    ///
    /// Event transport and barrier failures end the visit with an error;
    /// stage failures do not.
    pub async fn run_visit(&mut self) -> Result<VisitReport, HarnessError> {
        if self.terminated {
            return Err(HarnessError::Internal("slice has already shut down".into()));
        }
        self.start().await?;
        self.visits += 1;
        let span = info_span!("visit", rank = self.identity.rank, visit = self.visits);
        self.visit(self.visits).instrument(span).await
    }

    async fn visit(&mut self, visit: u64) -> Result<VisitReport, HarnessError> {
        let timer = VisitTimer::start();
        let mut report = VisitReport::new(visit);

        report.leftovers_dropped = self.queues.iter().map(|q| q.drain_and_close()).sum();
        if report.leftovers_dropped > 0 {
            debug!(dropped = report.leftovers_dropped, "Discarded clipboards left by the previous visit");
        }
        self.fault = false;
        self.queues[0].add_dataset(Arc::new(Clipboard::new()));

        for index in 0..self.stages.len() {
            if let Some(topic) = self.stages[index].topic() {
                self.gate.admit(topic, &self.queues[index]).await?;
            }

            self.handshake(&mut report).await?;
            self.handshake(&mut report).await?;

            if self.process_stage(index, &mut report).await {
                report.shutdown = true;
                report.fault = self.fault;
                self.terminated = true;
                self.shutdown.terminate(&self.identity);
                warn!("Shutdown hook returned; ending visit without further handshakes");
                return Ok(report);
            }

            self.handshake(&mut report).await?;
            self.handshake(&mut report).await?;
        }

        if !self.fault {
            if let Some(last) = self.queues.last().and_then(|q| q.get_next_dataset()) {
                last.close();
            }
        }

        report.fault = self.fault;
        report.timing = timer.finish();
        report.memory = MemorySnapshot::capture();
        log_visit(self.identity.rank, visit, &report.timing, &report.memory);
        Ok(report)
    }

    async fn handshake(&self, report: &mut VisitReport) -> Result<(), HarnessError> {
        self.barrier.handshake().await?;
        report.handshakes += 1;
        Ok(())
    }

    /// Runs or bypasses the stage at `index`; returns true on a shutdown request.
    async fn process_stage(&mut self, index: usize, report: &mut VisitReport) -> bool {
        let input = Arc::clone(&self.queues[index]);
        let output = Arc::clone(&self.queues[index + 1]);
        let input_id = input.element().map(|c| c.id());
        let stage = &self.stages[index];
        let (name, stage_id) = (stage.name().to_string(), stage.stage_id());

        let disposition = if self.fault {
            StageIo::new(Arc::clone(&output), Arc::clone(&input)).transfer();
            debug!(stage = %name, stage_id, "Fault flag set; passing clipboard through");
            StageDisposition::PassedThrough
        } else {
            debug!(stage = %name, stage_id, "Processing stage");
            let outcome = guarded(stage.stage()).await;
            match outcome {
                Ok(()) if output
                    .element()
                    .is_some_and(|c| c.contains_key(NO_MORE_DATASETS)) =>
                {
                    info!(stage = %name, stage_id, "Found {NO_MORE_DATASETS} on clipboard");
                    StageDisposition::ShutdownRequested
                }
                Ok(()) => StageDisposition::Processed,
                Err(err) => {
                    self.handle_failure(index, &err, report).await;
                    StageDisposition::Failed
                }
            }
        };

        report.stages.push(StageTrace {
            stage: name,
            stage_id,
            disposition,
            input: input_id,
            output: output.element().map(|c| c.id()),
        });
        disposition == StageDisposition::ShutdownRequested
    }

    async fn handle_failure(&mut self, index: usize, err: &StageError, report: &mut VisitReport) {
        self.fault = true;
        let input = Arc::clone(&self.queues[index]);
        let output = Arc::clone(&self.queues[index + 1]);
        let failing = &self.stages[index];
        let mut failure = FailureReport::new(failing.name(), failing.stage_id(), err);

        error!(
            rank = self.identity.rank,
            stage = %failure.stage,
            stage_id = failure.stage_id,
            failure_type = %failure.failure_type,
            error = %err,
            "Stage failed"
        );

        if let Some(failure_stage) = self.failure_stage.as_mut().filter(|s| !s.is_noop()) {
            let clipboard = input.element().unwrap_or_else(|| {
                let clipboard = Arc::new(Clipboard::new());
                input.add_dataset(Arc::clone(&clipboard));
                clipboard
            });
            if let Err(e) = failure.annotate(&clipboard) {
                warn!(error = %e, "Could not annotate failure clipboard");
            }

            // Output the failing stage already produced stays queued.
            let produced_before = output.len();
            failure_stage
                .stage
                .initialize(Arc::clone(&output), Arc::clone(&input));
            if let Err(e) = guarded(failure_stage.stage()).await {
                error!(
                    stage = %failure_stage.name(),
                    failure_type = e.kind(),
                    error = %e,
                    "Failure stage failed"
                );
            }
            let discarded = output.truncate_and_close(produced_before);
            debug!(discarded, "Closed failure stage output");
            failure.failure_stage_ran = true;
        }

        if output.is_empty() {
            output.add_dataset(
                input
                    .get_next_dataset()
                    .unwrap_or_else(|| Arc::new(Clipboard::new())),
            );
        }
        report.failures.push(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::handshake_pair;
    use crate::config::StageBinding;
    use crate::stages::{FnProcessing, StageConstruction, StageRegistry};
    use crate::testing::{spawn_lockstep_peer, RecordingShutdown};

    fn registry() -> Arc<StageRegistry> {
        let registry = StageRegistry::with_builtins();
        registry.register_processing("Boom", |_: &StageConstruction| {
            Ok(FnProcessing::new(|_, _| Err(StageError::processing("boom"))))
        });
        Arc::new(registry)
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }

    #[test]
    fn test_build_wires_queues() {
        let (local, _link) = handshake_pair(1);
        let policy = PipelinePolicy::new()
            .with_stage(StageBinding::new("a", "NoOpParallelProcessing"))
            .with_stage(StageBinding::new("b", "NoOpParallelProcessing").with_share_data(true));

        let engine = SliceEngine::builder(SliceIdentity::new("run", "pipe"), policy)
            .barrier(Arc::new(local))
            .build()
            .unwrap();

        assert_eq!(engine.queues().len(), 3);
        assert_eq!(engine.stages()[1].stage_id(), 2);
        assert!(engine.stages()[1].share_data());
        assert!(engine.failure_stage().is_none());
    }

    #[test]
    fn test_short_name_defaults_to_policy_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("isrPipe.yaml");
        std::fs::write(
            &path,
            "dir:\n  defaultRoot: /data\n  runDirPattern: \"%(shortname)s/%(runid)s\"\n",
        )
        .unwrap();
        let policy = PipelinePolicy::from_file(&path)
            .unwrap()
            .with_stage(StageBinding::new("a", "NoOpParallelProcessing"));
        let (local, _link) = handshake_pair(1);

        let engine = SliceEngine::builder(SliceIdentity::new("run7", "pipe"), policy)
            .barrier(Arc::new(local))
            .build()
            .unwrap();

        assert_eq!(engine.stages()[0].context().locations["work"], "/data/isrPipe/run7");
    }

    #[test]
    fn test_failure_stage_topic_is_dropped() {
        let events = Arc::new(crate::events::InMemoryEventSystem::new());
        let policy = PipelinePolicy::new()
            .with_stage(StageBinding::new("a", "NoOpParallelProcessing"))
            .with_failure_stage(
                StageBinding::new("fail", "LogFailureStage").with_event_topic("late"),
            );
        let (local, _link) = handshake_pair(1);

        let engine = SliceEngine::builder(SliceIdentity::new("run", "pipe"), policy)
            .barrier(Arc::new(local))
            .events(events.clone())
            .build()
            .unwrap();

        assert!(engine.failure_stage().unwrap().topic().is_none());
        assert!(!events.has_receiver("late_pipe"));
    }

    #[test]
    fn test_build_without_barrier_fails() {
        let err = SliceEngine::builder(SliceIdentity::default(), PipelinePolicy::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[tokio::test]
    async fn test_failure_without_failure_stage_forwards_input() {
        let (local, link) = handshake_pair(1);
        let peer = spawn_lockstep_peer(link);
        let policy = PipelinePolicy::new()
            .with_stage(StageBinding::new("boom", "Boom"))
            .with_stage(StageBinding::new("after", "NoOpParallelProcessing"));

        let mut engine = SliceEngine::builder(SliceIdentity::new("run", "pipe"), policy)
            .registry(registry())
            .barrier(Arc::new(local))
            .shutdown(Arc::new(RecordingShutdown::new()))
            .build()
            .unwrap();

        let report = engine.run_visit().await.unwrap();

        assert!(report.fault);
        assert_eq!(report.handshakes, 8);
        let boom = report.trace("boom").unwrap();
        assert_eq!(boom.disposition, StageDisposition::Failed);
        assert_eq!(boom.input, boom.output);
        assert!(report.trace("after").unwrap().passed_through_unchanged());
        assert!(!report.failures[0].failure_stage_ran);
        assert_eq!(engine.queues()[2].len(), 1);

        drop(engine);
        assert_eq!(peer.await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_leftovers_dropped_next_visit() {
        let (local, link) = handshake_pair(1);
        let peer = spawn_lockstep_peer(link);
        let policy = PipelinePolicy::new().with_stage(StageBinding::new("boom", "Boom"));

        let mut engine = SliceEngine::builder(SliceIdentity::new("run", "pipe"), policy)
            .registry(registry())
            .barrier(Arc::new(local))
            .build()
            .unwrap();

        let first = engine.run_visit().await.unwrap();
        let leftover = engine.queues()[1].element().unwrap();
        let second = engine.run_visit().await.unwrap();

        assert_eq!(first.leftovers_dropped, 0);
        assert_eq!(second.leftovers_dropped, 1);
        assert!(leftover.is_closed());
        assert_eq!(engine.visits(), 2);

        drop(engine);
        assert_eq!(peer.await.unwrap(), 9);
    }
}
