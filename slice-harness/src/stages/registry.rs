//! Registry mapping implementation references to stage factories.

use super::{LogFailure, NoOpProcessing, ParallelProcessing, ProcessingStage, Stage, LOG_FAILURE_STAGE};
use crate::config::{last_segment, NOOP_STAGE};
use crate::context::StageContext;
use crate::errors::{ConfigError, ConfigResult};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Span;

/// Everything a stage receives at construction.
#[derive(Debug, Clone)]
pub struct StageConstruction {
    /// The stage's configuration sub-document.
    pub policy: Option<serde_json::Value>,
    /// Logger handle scoped to the stage.
    pub span: Span,
    /// Event broker address.
    pub broker: String,
    /// System data: name, rank, stage id, universe size, run id.
    pub context: StageContext,
}

impl StageConstruction {
    /// Returns the policy, failing if none was configured.
    ///
    /// # Errors
    ///
    /// Returns `MissingStagePolicy` when the binding has no `stagePolicy`.
    pub fn require_policy(&self) -> ConfigResult<&serde_json::Value> {
        self.policy
            .as_ref()
            .ok_or_else(|| ConfigError::MissingStagePolicy {
                stage: self.context.name.clone(),
            })
    }

    /// Deserializes the policy into a typed settings struct.
    ///
    /// # Errors
    ///
    /// Returns `MissingStagePolicy` if absent and `Invalid` if it does not
    /// match `T`.
    pub fn policy_as<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        let policy = self.require_policy()?.clone();
        serde_json::from_value(policy).map_err(|e| {
            ConfigError::invalid(format!(
                "stagePolicy for '{}' is malformed: {e}",
                self.context.name
            ))
        })
    }
}

/// Factory function type for creating stages.
pub type StageFactory =
    Arc<dyn Fn(StageConstruction) -> ConfigResult<Box<dyn Stage>> + Send + Sync>;

/// Registry of stage factories keyed by implementation reference.
///
/// Lookups try the full reference first and then its last path segment, so
/// `lsst.pex.harness.stage.NoOpParallelProcessing` finds a factory registered
/// as `NoOpParallelProcessing`.
#[derive(Default)]
pub struct StageRegistry {
    factories: RwLock<HashMap<String, StageFactory>>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.names())
            .finish()
    }
}

impl StageRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in stages.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_processing(NOOP_STAGE, |_| Ok(NoOpProcessing));
        registry.register_processing(LOG_FAILURE_STAGE, |_| Ok(LogFailure));
        registry
    }

    /// Registers a factory producing a full [`Stage`].
    pub fn register<F>(&self, implementation: impl Into<String>, factory: F)
    where
        F: Fn(StageConstruction) -> ConfigResult<Box<dyn Stage>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(implementation.into(), Arc::new(factory));
    }

    /// Registers a factory for clipboard-level processing; the result is
    /// wrapped in a [`ProcessingStage`].
    pub fn register_processing<P, F>(&self, implementation: impl Into<String>, build: F)
    where
        P: ParallelProcessing + 'static,
        F: Fn(&StageConstruction) -> ConfigResult<P> + Send + Sync + 'static,
    {
        self.register(implementation, move |construction: StageConstruction| {
            let processor = build(&construction)?;
            Ok(Box::new(ProcessingStage::new(
                construction.context,
                construction.span,
                processor,
            )) as Box<dyn Stage>)
        });
    }

    fn lookup(&self, implementation: &str) -> Option<StageFactory> {
        let factories = self.factories.read();
        factories
            .get(implementation)
            .or_else(|| factories.get(last_segment(implementation)))
            .cloned()
    }

    /// Returns true if `implementation` resolves to a factory.
    #[must_use]
    pub fn contains(&self, implementation: &str) -> bool {
        self.lookup(implementation).is_some()
    }

    /// Lists registered implementation references, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Constructs a stage.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStage` if no factory matches, or whatever error the
    /// factory raises for its configuration.
    pub fn create(
        &self,
        implementation: &str,
        construction: StageConstruction,
    ) -> ConfigResult<Box<dyn Stage>> {
        let factory = self
            .lookup(implementation)
            .ok_or_else(|| ConfigError::UnknownStage {
                stage: construction.context.name.clone(),
                implementation: implementation.to_string(),
            })?;
        factory(construction)
    }
}
