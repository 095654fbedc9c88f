//! Stages as configured for one slice, ready to run.

use crate::context::StageContext;
use crate::events::EventTopic;
use crate::stages::Stage;

/// A stage resolved from its policy binding, with the binding's settings.
#[derive(Debug)]
pub struct ConfiguredStage {
    pub(crate) stage: Box<dyn Stage>,
    context: StageContext,
    implementation: String,
    topic: Option<EventTopic>,
    share_data: bool,
}

impl ConfiguredStage {
    pub(crate) fn new(
        stage: Box<dyn Stage>,
        context: StageContext,
        implementation: impl Into<String>,
        topic: Option<EventTopic>,
        share_data: bool,
    ) -> Self {
        Self {
            stage,
            context,
            implementation: implementation.into(),
            topic,
            share_data,
        }
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// 1-based ordinal, or `-1` for the failure stage.
    #[must_use]
    pub fn stage_id(&self) -> i32 {
        self.context.stage_id
    }

    /// The context the stage was constructed with.
    #[must_use]
    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// The implementation reference from the binding.
    #[must_use]
    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    /// The event topic gating this stage.
    #[must_use]
    pub fn topic(&self) -> Option<&EventTopic> {
        self.topic.as_ref()
    }

    /// Whether the stage takes part in inter-slice data sharing.
    #[must_use]
    pub fn share_data(&self) -> bool {
        self.share_data
    }

    /// The stage itself.
    #[must_use]
    pub fn stage(&self) -> &dyn Stage {
        self.stage.as_ref()
    }

    /// Returns true for the pass-through variant.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.stage.is_noop()
    }
}
