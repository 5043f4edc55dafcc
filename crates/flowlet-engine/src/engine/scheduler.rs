//! The step scheduler: one bounded unit of evaluation work per call

use crate::domain::instance::{FlowStatus, Instance};
use crate::domain::task::TaskStatus;
use crate::engine::EngineContext;
use crate::model::{EvalResult, FlowBehavior, FlowDone, TaskContext};
use crate::EngineError;
use tracing::{debug, error, info};

/// Drives one instance forward one step at a time
///
/// The scheduler performs no I/O of its own; all activity execution is
/// delegated through the task behaviors. Steps of one instance are
/// strictly sequential: the caller holds the instance mutably for the
/// duration of each call.
pub struct StepScheduler {
    engine: EngineContext,
}

impl StepScheduler {
    /// Create a scheduler over the shared engine context
    pub fn new(engine: EngineContext) -> Self {
        Self { engine }
    }

    /// Perform one step: evaluate every currently ready task once.
    ///
    /// Returns whether evaluable work may remain. `false` covers both
    /// terminal instances and suspended ones (only Waiting tasks with
    /// no pending external signal).
    pub async fn step(&self, inst: &mut Instance) -> Result<bool, EngineError> {
        if inst.status != FlowStatus::Active {
            return Ok(false);
        }

        let def = inst.definition()?.clone();
        let model = self.engine.model_for(&def)?;
        let flow_behavior = model.flow_behavior();

        // Definition order keeps dispatch deterministic
        let ready: Vec<(String, bool)> = def
            .tasks
            .iter()
            .filter_map(|t| {
                let ti = inst.tasks.get(&t.id)?;
                match ti.status {
                    TaskStatus::Entered => Some((t.id.clone(), false)),
                    TaskStatus::Waiting if ti.resume_pending => Some((t.id.clone(), true)),
                    _ => None,
                }
            })
            .collect();

        if ready.is_empty() {
            return self.finish(inst, flow_behavior.as_ref());
        }

        for (task_id, resuming) in ready {
            let type_tag = def
                .task(&task_id)
                .map(|t| t.type_tag.clone())
                .unwrap_or_default();
            let behavior = model.task_behavior(&type_tag)?;

            if resuming {
                inst.task_mut(&task_id)?.resume_pending = false;
            }

            let result = {
                let mut ctx = TaskContext::new(inst, &self.engine, task_id.clone())?;
                if resuming {
                    behavior.post_eval(&mut ctx).await?
                } else {
                    behavior.eval(&mut ctx).await?
                }
            };
            debug!(
                instance_id = %inst.id,
                task_id = %task_id,
                resuming,
                result = ?result,
                "Task evaluated"
            );

            match result {
                EvalResult::Done => {
                    let ti = inst.task_mut(&task_id)?;
                    if ti.status != TaskStatus::Skipped {
                        ti.status = TaskStatus::Completed;
                    }
                    flow_behavior.task_done(inst, &task_id, &self.engine)?;
                }
                EvalResult::Repeat => {
                    // Back to Entered so the next step dispatches Eval
                    // again without re-running link resolution; a task
                    // repeating out of PostEval is still Waiting here
                    inst.task_mut(&task_id)?.status = TaskStatus::Entered;
                }
                EvalResult::Wait => {
                    // Behavior marked the task Waiting; excluded from
                    // steps until an external signal arrives
                }
                EvalResult::Fail => {
                    let cause = inst
                        .task(&task_id)?
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("task '{}' failed", task_id));
                    error!(instance_id = %inst.id, task_id = %task_id, %cause, "Task failed");
                    inst.fail(cause)?;
                    return Ok(false);
                }
            }
        }

        let more = inst.tasks.values().any(|t| {
            t.status == TaskStatus::Entered
                || (t.status == TaskStatus::Waiting && t.resume_pending)
        });
        if !more {
            return self.finish(inst, flow_behavior.as_ref());
        }
        Ok(true)
    }

    /// Apply the flow behavior's verdict when no ready work remains
    fn finish(
        &self,
        inst: &mut Instance,
        flow_behavior: &dyn FlowBehavior,
    ) -> Result<bool, EngineError> {
        match flow_behavior.done(inst) {
            FlowDone::NotDone => Ok(false),
            FlowDone::Completed => {
                inst.complete()?;
                info!(instance_id = %inst.id, flow = %inst.flow_uri, "Flow completed");
                Ok(false)
            }
            FlowDone::Failed(err) => {
                error!(instance_id = %inst.id, flow = %inst.flow_uri, %err, "Flow failed");
                inst.fail(err)?;
                Ok(false)
            }
        }
    }
}
