//! The run driver: asynchronous outer loop around the step scheduler
//! with promise-style result delivery

use crate::domain::instance::{FlowStatus, Instance};
use crate::engine::scheduler::StepScheduler;
use crate::engine::EngineContext;
use crate::{AttrValue, EngineError, ResultHandler, StateRecorder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Operation kind of one run invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOp {
    /// Create and execute a fresh instance
    Start,

    /// Continue a previously suspended instance in place
    Resume,

    /// Re-execute a prior instance under a new identity, reusing its
    /// recorded attribute state
    Restart,
}

/// Structured overrides applied to the instance before stepping begins
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Flow-scope attribute overrides
    pub attr_overrides: HashMap<String, AttrValue>,
}

/// Per-invocation run parameters; never persisted
pub struct RunOptions {
    /// Operation kind
    pub op: RunOp,

    /// Target flow URI; for Resume/Restart an empty value falls back
    /// to the snapshot's own flow URI
    pub flow_uri: String,

    /// Prior instance snapshot, required for Resume and Restart
    pub initial_state: Option<Instance>,

    /// Emit an early id-only result before execution begins
    pub return_id: bool,

    /// Optional execution overrides
    pub exec_options: Option<ExecOptions>,
}

impl RunOptions {
    /// Options for starting a fresh instance
    pub fn start(flow_uri: &str) -> Self {
        Self {
            op: RunOp::Start,
            flow_uri: flow_uri.to_string(),
            initial_state: None,
            return_id: false,
            exec_options: None,
        }
    }

    /// Options for resuming a suspended instance
    pub fn resume(state: Instance) -> Self {
        Self {
            op: RunOp::Resume,
            flow_uri: String::new(),
            initial_state: Some(state),
            return_id: false,
            exec_options: None,
        }
    }

    /// Options for restarting a prior instance under a new identity
    pub fn restart(state: Instance) -> Self {
        Self {
            op: RunOp::Restart,
            flow_uri: String::new(),
            initial_state: Some(state),
            return_id: false,
            exec_options: None,
        }
    }

    /// Request the early id-only result
    pub fn with_return_id(mut self) -> Self {
        self.return_id = true;
        self
    }

    /// Attach execution overrides
    pub fn with_exec_options(mut self, exec_options: ExecOptions) -> Self {
        self.exec_options = Some(exec_options);
        self
    }
}

/// Handle to a spawned run
pub struct RunHandle {
    instance_id: String,
    handle: JoinHandle<Instance>,
}

impl RunHandle {
    /// Id of the instance being driven
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Await the drive loop and take the final instance state
    pub async fn join(self) -> Result<Instance, EngineError> {
        self.handle
            .await
            .map_err(|e| EngineError::OperationalError(format!("Run task panicked: {}", e)))
    }
}

/// Drives instances to completion on spawned tokio tasks
pub struct FlowRunner {
    engine: EngineContext,
}

impl FlowRunner {
    /// Create a runner over the shared engine context
    pub fn new(engine: EngineContext) -> Self {
        Self { engine }
    }

    /// Set up the instance per the requested operation and spawn the
    /// drive loop.
    ///
    /// Setup errors (unresolvable definition, missing prior state)
    /// surface here, before any stepping starts. Completion is signaled
    /// exclusively through the handler: result data or error once the
    /// instance reaches a terminal status, then `done` exactly once.
    pub async fn run(
        &self,
        options: RunOptions,
        inputs: HashMap<String, AttrValue>,
        handler: Arc<dyn ResultHandler>,
    ) -> Result<RunHandle, EngineError> {
        let mut inst = match options.op {
            RunOp::Start => {
                let def = self.engine.provider().resolve(&options.flow_uri).await?;
                def.validate()?;
                let mut inst =
                    Instance::new(self.engine.next_id(), &options.flow_uri, def.clone());
                let model = self.engine.model_for(&def)?;
                model.flow_behavior().start(&mut inst, inputs)?;
                info!(instance_id = %inst.id, flow = %options.flow_uri, "Instance created");
                inst
            }
            RunOp::Resume => {
                let mut inst = options.initial_state.ok_or_else(|| {
                    EngineError::OperationalError(
                        "Resume requires prior instance state".to_string(),
                    )
                })?;
                let def = self.engine.provider().resolve(&inst.flow_uri).await?;
                inst.bind_definition(def);
                inst.update_attrs(inputs);
                info!(instance_id = %inst.id, flow = %inst.flow_uri, "Instance resumed");
                inst
            }
            RunOp::Restart => {
                let mut inst = options.initial_state.ok_or_else(|| {
                    EngineError::OperationalError(
                        "Restart requires prior instance state".to_string(),
                    )
                })?;
                if !options.flow_uri.is_empty() {
                    inst.flow_uri = options.flow_uri.clone();
                }
                inst.restart(self.engine.next_id());
                let def = self.engine.provider().resolve(&inst.flow_uri).await?;
                inst.bind_definition(def.clone());
                let model = self.engine.model_for(&def)?;
                model.flow_behavior().start(&mut inst, inputs)?;
                info!(instance_id = %inst.id, flow = %inst.flow_uri, "Instance restarted");
                inst
            }
        };

        if let Some(exec) = options.exec_options {
            inst.update_attrs(exec.attr_overrides);
        }

        let engine = self.engine.clone();
        let instance_id = inst.id.clone();
        let return_id = options.return_id;

        let handle = tokio::spawn(async move {
            if return_id {
                let id_data = HashMap::from([(
                    "id".to_string(),
                    AttrValue::from_string(&inst.id),
                )]);
                handler.handle_result(Some(id_data), None);
            }

            let scheduler = StepScheduler::new(engine.clone());
            let mut steps = 0usize;
            let mut has_work = true;
            while has_work
                && inst.status < FlowStatus::Completed
                && steps < engine.config().max_step_count
            {
                match scheduler.step(&mut inst).await {
                    Ok(more) => has_work = more,
                    Err(err) => {
                        // Engine-level error: surfaced as flow failure
                        if inst.fail(err.to_string()).is_err() {
                            warn!(instance_id = %inst.id, %err, "Step error after terminal state");
                        }
                        break;
                    }
                }
                steps += 1;
                if engine.config().record_state {
                    record(engine.recorder(), &inst);
                }
            }
            debug!(instance_id = %inst.id, steps, status = ?inst.status, "Run loop finished");

            match inst.status {
                FlowStatus::Completed => {
                    handler.handle_result(Some(inst.return_data()), None);
                }
                FlowStatus::Failed => {
                    let error = inst
                        .error
                        .clone()
                        .unwrap_or_else(|| "Flow failed".to_string());
                    handler.handle_result(None, Some(EngineError::FlowExecutionError(error)));
                }
                // Cancelled, suspended or step ceiling reached:
                // nothing delivered, only the done signal
                _ => {}
            }
            handler.done();
            inst
        });

        Ok(RunHandle {
            instance_id,
            handle,
        })
    }
}

fn record(recorder: Option<&Arc<dyn StateRecorder>>, inst: &Instance) {
    let Some(recorder) = recorder else { return };
    if let Err(err) = recorder.record_snapshot(inst) {
        warn!(instance_id = %inst.id, %err, "Snapshot recording failed");
    }
    if let Err(err) = recorder.record_step(inst) {
        warn!(instance_id = %inst.id, %err, "Step recording failed");
    }
}

/// One delivery from a run to a channel-backed result handler
#[derive(Debug)]
pub enum RunEvent {
    /// A result or error delivery
    Result {
        /// Return data, present on success
        data: Option<HashMap<String, AttrValue>>,

        /// Error, present on failure
        error: Option<EngineError>,
    },

    /// The terminating signal; sent exactly once
    Done,
}

/// Channel-backed result handler
pub struct ChannelResultHandler {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ResultHandler for ChannelResultHandler {
    fn handle_result(
        &self,
        data: Option<HashMap<String, AttrValue>>,
        error: Option<EngineError>,
    ) {
        // A dropped receiver means nobody is listening; not an error
        let _ = self.tx.send(RunEvent::Result { data, error });
    }

    fn done(&self) {
        let _ = self.tx.send(RunEvent::Done);
    }
}

/// Build a result handler and the receiver of its events
pub fn result_channel() -> (Arc<ChannelResultHandler>, mpsc::UnboundedReceiver<RunEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelResultHandler { tx }), rx)
}
