//! Engine wiring: shared context, configuration and the step/run
//! machinery
//!
//! Process-wide collaborators (model registry, definition provider,
//! activity factory, resolver, id generator) thread through an explicit
//! [`EngineContext`] rather than globals; everything it holds is safe
//! for concurrent read.

use crate::domain::definition::FlowDefinition;
use crate::model::{FlowModel, ModelRegistry};
use crate::{Activity, AttributeResolver, DefinitionProvider, EngineError, StateRecorder};
use std::sync::Arc;
use uuid::Uuid;

/// Step-wise instance scheduler
pub mod scheduler;

/// Asynchronous run driver and result delivery
pub mod runner;

/// Environment variable toggling best-effort state recording
pub const RECORD_ENV_VAR: &str = "FLOWLET_FLOW_RECORD";

/// Default per-run step ceiling
pub const DEFAULT_MAX_STEP_COUNT: usize = 1_000_000;

/// Maps an activity reference to an activity implementation
pub type ActivityFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn Activity>, EngineError> + Send + Sync>;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Runaway-loop safety ceiling per run; exceeding it leaves the
    /// instance non-terminal, it is not an error
    pub max_step_count: usize,

    /// Emit best-effort snapshot/step records to the state recorder
    pub record_state: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_count: DEFAULT_MAX_STEP_COUNT,
            record_state: false,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the process environment
    pub fn from_env() -> Self {
        let record_state = std::env::var(RECORD_ENV_VAR)
            .map(|v| {
                let v = v.trim().to_ascii_lowercase();
                v == "true" || v == "1"
            })
            .unwrap_or(false);
        Self {
            record_state,
            ..Self::default()
        }
    }
}

/// Process-wide instance id generator, safe for concurrent allocation
#[derive(Debug, Clone, Default)]
pub struct IdGenerator;

impl IdGenerator {
    /// Create a generator
    pub fn new() -> Self {
        Self
    }

    /// Allocate a fresh instance id
    pub fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Shared, read-mostly state threaded through every run
#[derive(Clone)]
pub struct EngineContext {
    models: Arc<ModelRegistry>,
    provider: Arc<dyn DefinitionProvider>,
    activities: ActivityFactory,
    resolver: Arc<dyn AttributeResolver>,
    recorder: Option<Arc<dyn StateRecorder>>,
    id_generator: IdGenerator,
    config: EngineConfig,
}

impl EngineContext {
    /// Assemble an engine context from its collaborators
    pub fn new(
        models: Arc<ModelRegistry>,
        provider: Arc<dyn DefinitionProvider>,
        activities: ActivityFactory,
        resolver: Arc<dyn AttributeResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            models,
            provider,
            activities,
            resolver,
            recorder: None,
            id_generator: IdGenerator::new(),
            config,
        }
    }

    /// Attach an optional state recorder
    pub fn with_recorder(mut self, recorder: Arc<dyn StateRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// The definition provider
    pub fn provider(&self) -> &Arc<dyn DefinitionProvider> {
        &self.provider
    }

    /// The attribute/expression resolver
    pub fn resolver(&self) -> &Arc<dyn AttributeResolver> {
        &self.resolver
    }

    /// The state recorder, if any
    pub fn recorder(&self) -> Option<&Arc<dyn StateRecorder>> {
        self.recorder.as_ref()
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Allocate a fresh instance id
    pub fn next_id(&self) -> String {
        self.id_generator.next_id()
    }

    /// Resolve an activity reference to its implementation
    pub fn activity(&self, activity_ref: &str) -> Result<Arc<dyn Activity>, EngineError> {
        (self.activities)(activity_ref)
    }

    /// Resolve the flow model governing a definition: its declared
    /// model name, or the registry's designated default
    pub fn model_for(&self, def: &FlowDefinition) -> Result<Arc<FlowModel>, EngineError> {
        self.models.lookup(def.model_name.as_deref())
    }
}
