//! Sub-flow task behavior: embeds a nested instance of another flow
//! definition inside a parent task
//!
//! Private working-data contract: `_subflow` holds the serialized
//! nested instance while the parent task is suspended on it.

use crate::domain::instance::{FlowStatus, Instance, MasterRef};
use crate::domain::task::TaskStatus;
use crate::engine::scheduler::StepScheduler;
use crate::engine::EngineContext;
use crate::model::{EvalResult, TaskBehavior, TaskContext};
use crate::EngineError;
use async_trait::async_trait;
use tracing::debug;

const SUBFLOW_KEY: &str = "_subflow";

/// Setting naming the nested flow definition
const FLOW_URI_SETTING: &str = "flow_uri";

/// Task behavior whose unit of work is a whole nested flow
#[derive(Debug)]
pub struct SubFlowTaskBehavior;

#[async_trait]
impl TaskBehavior for SubFlowTaskBehavior {
    async fn eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, EngineError> {
        if ctx.status() == TaskStatus::Skipped {
            return Ok(EvalResult::Done);
        }

        let flow_uri = match ctx
            .setting(FLOW_URI_SETTING)
            .and_then(|v| v.as_str().map(str::to_string))
        {
            Some(uri) => uri,
            None => {
                ctx.fail_task(format!(
                    "Task '{}': missing or non-string '{}' setting",
                    ctx.task_name(),
                    FLOW_URI_SETTING
                ));
                return Ok(EvalResult::Fail);
            }
        };

        let engine = ctx.engine().clone();
        let def = match engine.provider().resolve(&flow_uri).await {
            Ok(def) => def,
            Err(err) => {
                ctx.fail_task(format!(
                    "Task '{}': cannot resolve sub-flow '{}': {}",
                    ctx.task_name(),
                    flow_uri,
                    err
                ));
                return Ok(EvalResult::Fail);
            }
        };

        let inputs = match ctx.resolve_inputs() {
            Ok(inputs) => inputs,
            Err(err) => {
                ctx.fail_task(err.to_string());
                return Ok(EvalResult::Fail);
            }
        };
        let mut nested = Instance::new(engine.next_id(), &flow_uri, def.clone());
        nested.master = Some(MasterRef {
            id: ctx.instance_id().to_string(),
            name: ctx.instance_name().to_string(),
        });
        debug!(
            parent_id = %ctx.instance_id(),
            nested_id = %nested.id,
            flow = %flow_uri,
            "Starting sub-flow"
        );

        let model = engine.model_for(&def)?;
        if let Err(err) = model.flow_behavior().start(&mut nested, inputs) {
            ctx.fail_task(err.to_string());
            return Ok(EvalResult::Fail);
        }

        drive_nested(ctx, &engine, nested).await
    }

    async fn post_eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, EngineError> {
        let stored = ctx.get_working_data(SUBFLOW_KEY).ok_or_else(|| {
            EngineError::FlowExecutionError(format!(
                "Task '{}' has no suspended sub-flow",
                ctx.task_id()
            ))
        })?;
        let mut nested: Instance = serde_json::from_value(stored)?;

        let engine = ctx.engine().clone();
        let def = engine.provider().resolve(&nested.flow_uri).await?;
        nested.bind_definition(def);

        // The external signal that satisfied the parent's wait stands
        // in for the nested waits as well.
        let waiting: Vec<String> = nested
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Waiting)
            .map(|t| t.task_id.clone())
            .collect();
        for task_id in waiting {
            nested.mark_task_resumable(&task_id)?;
        }

        drive_nested(ctx, &engine, nested).await
    }
}

/// Step the nested instance as far as it will go within this call and
/// fold its status into the parent task's result
async fn drive_nested(
    ctx: &mut TaskContext<'_>,
    engine: &EngineContext,
    mut nested: Instance,
) -> Result<EvalResult, EngineError> {
    let scheduler = StepScheduler::new(engine.clone());
    let mut steps = 0usize;
    while scheduler.step(&mut nested).await? {
        steps += 1;
        if steps >= engine.config().max_step_count {
            break;
        }
    }

    match nested.status {
        FlowStatus::Completed => {
            let data = nested.return_data();
            ctx.finalize_outputs(data)?;
            Ok(EvalResult::Done)
        }
        FlowStatus::Failed => {
            let error = nested
                .error
                .unwrap_or_else(|| format!("Sub-flow '{}' failed", nested.flow_uri));
            ctx.fail_task(error);
            Ok(EvalResult::Fail)
        }
        FlowStatus::Cancelled => {
            ctx.fail_task(format!("Sub-flow '{}' was cancelled", nested.flow_uri));
            Ok(EvalResult::Fail)
        }
        _ => {
            ctx.set_working_data(SUBFLOW_KEY, serde_json::to_value(&nested)?);
            ctx.set_status(TaskStatus::Waiting);
            Ok(EvalResult::Wait)
        }
    }
}
