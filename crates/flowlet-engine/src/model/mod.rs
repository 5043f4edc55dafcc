//! Behavior model layer - pluggable flow and task behavior strategies
//!
//! A flow model bundles one flow behavior, one default task behavior
//! and zero or more named task behaviors. Definitions select a model by
//! name; the registry is built once at startup and shared read-only.

use crate::domain::definition::{FlowDefinition, TaskDefinition};
use crate::domain::instance::Instance;
use crate::domain::task::TaskStatus;
use crate::engine::EngineContext;
use crate::{AttrValue, EngineError, ResolveScope};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Flow behavior + basic/iterator/subflow task behaviors
pub mod simple;

/// Iterator task behavior and its cursor state machine
pub mod iterator;

/// Sub-flow task behavior
pub mod subflow;

/// Outcome of one Eval/PostEval invocation; transient, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalResult {
    /// The task finished its work
    Done,

    /// The task must be evaluated again on a subsequent step
    Repeat,

    /// The task is suspended until an external signal arrives
    Wait,

    /// The task failed; the error is recorded on the task instance
    Fail,
}

/// Completion verdict of a flow behavior's `done` check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowDone {
    /// Eligible or waiting tasks remain
    NotDone,

    /// No eligible or waiting work remains and no task failed
    Completed,

    /// An unrecovered task failure escalates to flow failure
    Failed(String),
}

/// Strategy governing one task's evaluation lifecycle
#[async_trait]
pub trait TaskBehavior: Send + Sync + std::fmt::Debug {
    /// Evaluate the task once; the scheduler interprets the result
    async fn eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, EngineError>;

    /// Finalize a previously waiting task after its external signal
    async fn post_eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, EngineError>;
}

/// Strategy governing whole-instance start/advance/completion
pub trait FlowBehavior: Send + Sync {
    /// Seed flow-scope attributes and enter the initially-ready tasks
    fn start(
        &self,
        inst: &mut Instance,
        inputs: HashMap<String, AttrValue>,
    ) -> Result<(), EngineError>;

    /// Advance downstream eligibility after a task completed or was
    /// skipped
    fn task_done(
        &self,
        inst: &mut Instance,
        task_id: &str,
        engine: &EngineContext,
    ) -> Result<(), EngineError>;

    /// Determine whether the instance has reached a verdict
    fn done(&self, inst: &Instance) -> FlowDone;

    /// Administrative cancellation; terminal
    fn cancel(&self, inst: &mut Instance) -> Result<(), EngineError>;
}

/// Context handed to an activity for one invocation
///
/// The context owns resolved input snapshots and collects outputs; the
/// engine copies the outputs back onto the task instance after a
/// successful invocation.
#[derive(Debug)]
pub struct ActivityContext {
    task_id: String,
    task_name: String,
    inputs: HashMap<String, AttrValue>,
    settings: HashMap<String, serde_json::Value>,
    outputs: HashMap<String, AttrValue>,
}

impl ActivityContext {
    pub(crate) fn new(
        task_id: String,
        task_name: String,
        inputs: HashMap<String, AttrValue>,
        settings: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            task_id,
            task_name,
            inputs,
            settings,
            outputs: HashMap::new(),
        }
    }

    /// Id of the invoking task
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Display name of the invoking task
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Get a resolved input value by name
    pub fn input(&self, name: &str) -> Option<&AttrValue> {
        self.inputs.get(name)
    }

    /// All resolved inputs
    pub fn inputs(&self) -> &HashMap<String, AttrValue> {
        &self.inputs
    }

    /// Get a task setting by name
    pub fn setting(&self, name: &str) -> Option<&serde_json::Value> {
        self.settings.get(name)
    }

    /// Set an output value by name
    pub fn set_output(&mut self, name: &str, value: AttrValue) {
        self.outputs.insert(name.to_string(), value);
    }

    pub(crate) fn take_outputs(&mut self) -> HashMap<String, AttrValue> {
        std::mem::take(&mut self.outputs)
    }
}

/// Behavior-facing view over one task of a running instance
///
/// Behaviors may only mutate their own task's status, working data and
/// snapshots; flow-scope attributes change exclusively through the
/// output-mapping step after a successful activity invocation.
pub struct TaskContext<'a> {
    inst: &'a mut Instance,
    engine: &'a EngineContext,
    def: Arc<FlowDefinition>,
    task_id: String,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        inst: &'a mut Instance,
        engine: &'a EngineContext,
        task_id: String,
    ) -> Result<Self, EngineError> {
        let def = inst.definition()?.clone();
        Ok(Self {
            inst,
            engine,
            def,
            task_id,
        })
    }

    /// Id of the task under evaluation
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The task template
    pub fn task(&self) -> Result<&TaskDefinition, EngineError> {
        self.def.task(&self.task_id).ok_or_else(|| {
            EngineError::FlowExecutionError(format!("Unknown task: {}", self.task_id))
        })
    }

    /// Display name of the task
    pub fn task_name(&self) -> String {
        self.task()
            .map(|t| t.display_name().to_string())
            .unwrap_or_else(|_| self.task_id.clone())
    }

    /// The owning instance id
    pub fn instance_id(&self) -> &str {
        &self.inst.id
    }

    /// The owning instance name
    pub fn instance_name(&self) -> &str {
        &self.inst.name
    }

    /// Engine context, for behaviors that compose further execution
    pub fn engine(&self) -> &EngineContext {
        self.engine
    }

    /// Current status of the task
    pub fn status(&self) -> TaskStatus {
        self.inst
            .tasks
            .get(&self.task_id)
            .map(|t| t.status)
            .unwrap_or(TaskStatus::NotStarted)
    }

    /// Set the task's status
    pub fn set_status(&mut self, status: TaskStatus) {
        if let Ok(ti) = self.inst.task_mut(&self.task_id) {
            ti.status = status;
        }
        self.inst.touch();
    }

    /// Record a failure on the task and mark it Failed
    pub fn fail_task(&mut self, error: String) {
        if let Ok(ti) = self.inst.task_mut(&self.task_id) {
            ti.fail(error);
        }
        self.inst.touch();
    }

    /// Get a task setting by name
    pub fn setting(&self, name: &str) -> Option<serde_json::Value> {
        self.task().ok()?.settings.get(name).cloned()
    }

    /// Get a working-data entry by key
    pub fn get_working_data(&self, key: &str) -> Option<serde_json::Value> {
        self.inst
            .tasks
            .get(&self.task_id)?
            .working_data
            .get(key)
            .cloned()
    }

    /// Set a working-data entry
    pub fn set_working_data(&mut self, key: &str, value: serde_json::Value) {
        if let Ok(ti) = self.inst.task_mut(&self.task_id) {
            ti.working_data.insert(key.to_string(), value);
        }
    }

    /// Resolve the task's declared inputs against flow scope and the
    /// task's iteration tuple, snapshotting them on the task instance
    pub fn resolve_inputs(&mut self) -> Result<HashMap<String, AttrValue>, EngineError> {
        let task = self.task()?.clone();

        let mut inputs = HashMap::new();
        {
            let iteration = self
                .inst
                .tasks
                .get(&self.task_id)
                .and_then(|t| t.working_data.get("iteration"));
            let scope = ResolveScope {
                attrs: &self.inst.attrs,
                iteration,
            };
            for (name, expr) in &task.input_mapping {
                let value = self.engine.resolver().resolve(expr, &scope)?;
                inputs.insert(name.clone(), value);
            }
        }

        self.inst.task_mut(&self.task_id)?.inputs = inputs.clone();
        Ok(inputs)
    }

    /// Resolve inputs and invoke the task's activity once.
    ///
    /// Returns `Ok(true)` when the activity completed within this step
    /// (outputs are captured and the output mapping is applied), and
    /// `Ok(false)` when it cannot complete yet and the task must wait.
    pub async fn eval_activity(&mut self) -> Result<bool, EngineError> {
        let task = self.task()?.clone();
        let inputs = self.resolve_inputs()?;

        let activity = self.engine.activity(&task.activity_ref)?;
        let mut actx = ActivityContext::new(
            task.id.clone(),
            task.display_name().to_string(),
            inputs,
            task.settings.clone(),
        );

        let done = activity.eval(&mut actx).await?;

        if done {
            self.inst.task_mut(&self.task_id)?.outputs = actx.take_outputs();
            self.apply_output_mapping(&task)?;
        }

        Ok(done)
    }

    /// Finalize a previously waiting activity invocation, capturing its
    /// outputs without re-resolving inputs
    pub async fn post_eval_activity(&mut self) -> Result<(), EngineError> {
        let task = self.task()?.clone();
        let inputs = self.inst.task(&self.task_id)?.inputs.clone();

        let activity = self.engine.activity(&task.activity_ref)?;
        let mut actx = ActivityContext::new(
            task.id.clone(),
            task.display_name().to_string(),
            inputs,
            task.settings.clone(),
        );

        activity.post_eval(&mut actx).await?;

        let outputs = actx.take_outputs();
        self.inst.task_mut(&self.task_id)?.outputs.extend(outputs);
        self.apply_output_mapping(&task)?;
        Ok(())
    }

    /// Record activity outputs produced outside the normal activity
    /// invocation path (e.g. a nested sub-flow's return data) and apply
    /// the output mapping
    pub fn finalize_outputs(
        &mut self,
        outputs: HashMap<String, AttrValue>,
    ) -> Result<(), EngineError> {
        let task = self.task()?.clone();
        self.inst.task_mut(&self.task_id)?.outputs = outputs;
        self.apply_output_mapping(&task)
    }

    fn apply_output_mapping(&mut self, task: &TaskDefinition) -> Result<(), EngineError> {
        let mut mapped = Vec::new();
        {
            let ti = self.inst.task(&self.task_id)?;
            for (attr_name, output_name) in &task.output_mapping {
                if let Some(value) = ti.outputs.get(output_name) {
                    mapped.push((attr_name.clone(), value.clone()));
                }
            }
        }
        for (name, value) in mapped {
            self.inst.attrs.insert(name, value);
        }
        self.inst.touch();
        Ok(())
    }
}

/// A named bundle of behavior strategies
pub struct FlowModel {
    name: String,
    flow_behavior: Arc<dyn FlowBehavior>,
    default_task_behavior: Arc<dyn TaskBehavior>,
    task_behaviors: HashMap<String, Arc<dyn TaskBehavior>>,
}

impl FlowModel {
    /// Create a model with its flow behavior and default task behavior
    pub fn new(
        name: &str,
        flow_behavior: Arc<dyn FlowBehavior>,
        default_task_behavior: Arc<dyn TaskBehavior>,
    ) -> Self {
        Self {
            name: name.to_string(),
            flow_behavior,
            default_task_behavior,
            task_behaviors: HashMap::new(),
        }
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a task behavior under a type tag
    pub fn register_task_behavior(&mut self, type_tag: &str, behavior: Arc<dyn TaskBehavior>) {
        self.task_behaviors.insert(type_tag.to_string(), behavior);
    }

    /// The flow behavior
    pub fn flow_behavior(&self) -> Arc<dyn FlowBehavior> {
        self.flow_behavior.clone()
    }

    /// Task behavior for a type tag; an empty tag selects the default,
    /// an unknown tag is a configuration error
    pub fn task_behavior(&self, type_tag: &str) -> Result<Arc<dyn TaskBehavior>, EngineError> {
        if type_tag.is_empty() {
            return Ok(self.default_task_behavior.clone());
        }
        self.task_behaviors.get(type_tag).cloned().ok_or_else(|| {
            EngineError::ConfigurationError(format!(
                "No task behavior registered for type '{}' in model '{}'",
                type_tag, self.name
            ))
        })
    }
}

/// Registry of flow models, immutable after startup
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<FlowModel>>,
    default_model: Option<String>,
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model; re-registering the same name replaces it
    pub fn register(&mut self, model: FlowModel) {
        self.models
            .insert(model.name().to_string(), Arc::new(model));
    }

    /// Designate the process-wide default model
    pub fn set_default(&mut self, name: &str) -> Result<(), EngineError> {
        if !self.models.contains_key(name) {
            return Err(EngineError::ConfigurationError(format!(
                "Cannot default to unregistered model: {}",
                name
            )));
        }
        self.default_model = Some(name.to_string());
        Ok(())
    }

    /// Look up a model by name; `None` selects the designated default
    pub fn lookup(&self, name: Option<&str>) -> Result<Arc<FlowModel>, EngineError> {
        match name {
            Some(name) => self.models.get(name).cloned().ok_or_else(|| {
                EngineError::ConfigurationError(format!("Flow model not registered: {}", name))
            }),
            None => {
                let default = self.default_model.as_deref().ok_or_else(|| {
                    EngineError::ConfigurationError(
                        "No default flow model designated".to_string(),
                    )
                })?;
                self.lookup(Some(default))
            }
        }
    }
}
