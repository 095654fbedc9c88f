//! Configuration of a slice: stage resolution and queue wiring.

use super::{ConfiguredStage, KillProcess, ShutdownHook, SliceEngine};
use crate::barrier::BarrierHandshake;
use crate::config::{PipelinePolicy, StageBinding};
use crate::context::{DirectoryResolver, PolicyDirectories, SliceIdentity, DB_URL_KEY};
use crate::core::Queue;
use crate::errors::{ConfigError, ConfigResult, HarnessError};
use crate::events::{EventGate, EventReceiver, EventTopic, InMemoryEventSystem};
use crate::stages::{StageConstruction, StageRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, info_span};

/// Builder for [`SliceEngine`].
///
/// Only the barrier is mandatory. Without a registry the built-in stages are
/// available; without an event receiver an in-process one is used; without a
/// shutdown hook the process is aborted on shutdown.
pub struct SliceEngineBuilder {
    identity: SliceIdentity,
    policy: PipelinePolicy,
    registry: Option<Arc<StageRegistry>>,
    barrier: Option<Arc<dyn BarrierHandshake>>,
    events: Option<Arc<dyn EventReceiver>>,
    shutdown: Option<Arc<dyn ShutdownHook>>,
    directories: Option<Arc<dyn DirectoryResolver>>,
}

impl std::fmt::Debug for SliceEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceEngineBuilder")
            .field("identity", &self.identity)
            .field("stages", &self.policy.stage_names())
            .field("has_barrier", &self.barrier.is_some())
            .finish_non_exhaustive()
    }
}

impl SliceEngineBuilder {
    /// Starts a builder for the slice `identity` running `policy`.
    #[must_use]
    pub fn new(identity: SliceIdentity, policy: PipelinePolicy) -> Self {
        Self {
            identity,
            policy,
            registry: None,
            barrier: None,
            events: None,
            shutdown: None,
            directories: None,
        }
    }

    /// Sets the stage registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<StageRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the barrier handshake.
    #[must_use]
    pub fn barrier(mut self, barrier: Arc<dyn BarrierHandshake>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Sets the event receiver.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventReceiver>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the shutdown hook.
    #[must_use]
    pub fn shutdown(mut self, shutdown: Arc<dyn ShutdownHook>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Sets the resolver for the policy's `dir` section.
    #[must_use]
    pub fn directories(mut self, directories: Arc<dyn DirectoryResolver>) -> Self {
        self.directories = Some(directories);
        self
    }

    /// Resolves every stage, registers event receivers, and wires the queues.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid policy, a missing
    /// barrier, or a stage that cannot be constructed; an event error if a
    /// receiver cannot be created.
    pub fn build(self) -> Result<SliceEngine, HarnessError> {
        self.policy.validate()?;
        let barrier = self
            .barrier
            .ok_or_else(|| ConfigError::invalid("no barrier handshake configured"))?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(StageRegistry::with_builtins()));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InMemoryEventSystem::new()));
        let shutdown = self.shutdown.unwrap_or_else(|| Arc::new(KillProcess));
        let directories = self
            .directories
            .unwrap_or_else(|| Arc::new(PolicyDirectories::new()));

        let identity = self.identity;
        let policy = self.policy;

        info!(
            universe_size = identity.universe_size,
            run_id = %identity.run_id,
            rank = identity.rank,
            "Configuring slice"
        );

        let locations = resolve_locations(&identity, &policy, directories.as_ref())?;
        let configure = |binding: &StageBinding, stage_id: i32| {
            configure_stage(&registry, &identity, &policy, binding, stage_id, &locations)
        };

        let mut stages = Vec::with_capacity(policy.stage_count());
        for (index, binding) in policy.app_stage.iter().enumerate() {
            let stage_id = i32::try_from(index + 1)
                .map_err(|_| ConfigError::invalid("too many stages"))?;
            stages.push(configure(binding, stage_id)?);
        }
        let failure_stage = policy
            .failure_stage
            .as_ref()
            .map(|binding| {
                let ungated = StageBinding {
                    event_topic: None,
                    ..binding.clone()
                };
                configure(&ungated, -1)
            })
            .transpose()?;
        if failure_stage.as_ref().is_some_and(ConfiguredStage::is_noop) {
            debug!("Failure stage is a no-op; failures will only raise the fault flag");
        }

        for topic in stages.iter().filter_map(ConfiguredStage::topic) {
            events.create_receiver(&policy.event_broker_host, topic.scoped())?;
            debug!(topic = %topic, broker = %policy.event_broker_host, "Created event receiver");
        }

        let gate = EventGate::new(events, policy.receive_timeout(), policy.retry_delay());
        let queues: Vec<Arc<Queue>> = (0..=stages.len()).map(|_| Arc::new(Queue::new())).collect();
        for (index, stage) in stages.iter_mut().enumerate() {
            stage
                .stage
                .initialize(Arc::clone(&queues[index + 1]), Arc::clone(&queues[index]));
        }

        Ok(SliceEngine {
            identity,
            policy,
            stages,
            failure_stage,
            queues,
            barrier,
            gate,
            shutdown,
            fault: false,
            started: false,
            terminated: false,
            visits: 0,
        })
    }
}

fn resolve_locations(
    identity: &SliceIdentity,
    policy: &PipelinePolicy,
    directories: &dyn DirectoryResolver,
) -> ConfigResult<HashMap<String, String>> {
    let mut locations = HashMap::new();
    if let Some(dir) = &policy.dir {
        let short_name = dir
            .get("shortName")
            .and_then(serde_json::Value::as_str)
            .or_else(|| policy.policy_name())
            .unwrap_or(&identity.pipeline_name);
        locations = directories.resolve(dir, short_name, &identity.run_id)?;
    }
    if let Some(url) = policy.database_url() {
        locations.insert(DB_URL_KEY.to_string(), url.to_string());
    }
    Ok(locations)
}

fn configure_stage(
    registry: &StageRegistry,
    identity: &SliceIdentity,
    policy: &PipelinePolicy,
    binding: &StageBinding,
    stage_id: i32,
    locations: &HashMap<String, String>,
) -> ConfigResult<ConfiguredStage> {
    let name = binding.resolved_name();
    let implementation = binding.implementation();
    let context = identity
        .stage_context(name.as_str(), stage_id)
        .with_locations(locations.clone());
    let construction = StageConstruction {
        policy: binding.stage_policy.clone(),
        span: info_span!("stage", stage = %name, stage_id, rank = identity.rank),
        broker: policy.event_broker_host.clone(),
        context: context.clone(),
    };

    let stage = registry.create(implementation, construction)?;
    debug!(stage = %name, stage_id, implementation, "Configured stage");

    let topic = binding
        .topic()
        .map(|topic| EventTopic::new(topic, &identity.pipeline_name));
    Ok(ConfiguredStage::new(
        stage,
        context,
        implementation,
        topic,
        binding.share_data,
    ))
}
