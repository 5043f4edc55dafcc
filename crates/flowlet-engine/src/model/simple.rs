//! The simple flow model: sequential/branching execution with links,
//! joins and skip propagation

use crate::domain::definition::LinkCondition;
use crate::domain::instance::Instance;
use crate::domain::task::{JoinOutcome, TaskStatus};
use crate::engine::EngineContext;
use crate::model::iterator::IteratorTaskBehavior;
use crate::model::subflow::SubFlowTaskBehavior;
use crate::model::{EvalResult, FlowBehavior, FlowDone, FlowModel, TaskBehavior, TaskContext};
use crate::{AttrValue, EngineError, ResolveScope};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name of the built-in simple model
pub const MODEL_NAME: &str = "flowlet-simple";

/// Build the built-in simple model with its basic, iterator and
/// sub-flow task behaviors registered
pub fn simple_model() -> FlowModel {
    let mut model = FlowModel::new(
        MODEL_NAME,
        Arc::new(SimpleFlowBehavior),
        Arc::new(BasicTaskBehavior),
    );
    model.register_task_behavior("basic", Arc::new(BasicTaskBehavior));
    model.register_task_behavior("iterator", Arc::new(IteratorTaskBehavior));
    model.register_task_behavior("subflow", Arc::new(SubFlowTaskBehavior));
    model
}

/// Default whole-instance lifecycle strategy
pub struct SimpleFlowBehavior;

impl FlowBehavior for SimpleFlowBehavior {
    fn start(
        &self,
        inst: &mut Instance,
        inputs: HashMap<String, AttrValue>,
    ) -> Result<(), EngineError> {
        inst.update_attrs(inputs);
        inst.mark_active()?;

        let def = inst.definition()?.clone();
        let roots: Vec<String> = def.root_tasks().iter().map(|t| t.id.clone()).collect();
        if roots.is_empty() {
            return Err(EngineError::ValidationError(format!(
                "Flow '{}' has no start task",
                def.id
            )));
        }
        for id in roots {
            inst.task_mut(&id)?.status = TaskStatus::Entered;
        }

        debug!(instance_id = %inst.id, flow = %inst.flow_uri, "Flow started");
        Ok(())
    }

    fn task_done(
        &self,
        inst: &mut Instance,
        task_id: &str,
        engine: &EngineContext,
    ) -> Result<(), EngineError> {
        let def = inst.definition()?.clone();

        // Worklist so that a freshly skipped target resolves its own
        // outgoing links as not-fired without recursion.
        let mut worklist = vec![task_id.to_string()];
        while let Some(source_id) = worklist.pop() {
            let source_skipped = inst.task(&source_id)?.status == TaskStatus::Skipped;
            let outgoing = def.links_from(&source_id);

            // First pass: non-otherwise links
            let mut fired = vec![false; outgoing.len()];
            let mut sibling_fired = false;
            for (i, link) in outgoing.iter().enumerate() {
                if source_skipped || link.condition == LinkCondition::Otherwise {
                    continue;
                }
                fired[i] = match &link.condition {
                    LinkCondition::Always => true,
                    LinkCondition::Expression(expr) => {
                        let scope = ResolveScope {
                            attrs: &inst.attrs,
                            iteration: None,
                        };
                        engine.resolver().eval_condition(expr, &scope)?
                    }
                    LinkCondition::Otherwise => false,
                };
                sibling_fired = sibling_fired || fired[i];
            }

            // Second pass: otherwise links fire only when no sibling did
            for (i, link) in outgoing.iter().enumerate() {
                if !source_skipped
                    && link.condition == LinkCondition::Otherwise
                    && !sibling_fired
                {
                    fired[i] = true;
                }
            }

            let targets: Vec<(String, bool)> = outgoing
                .iter()
                .zip(fired)
                .map(|(link, fired)| (link.to.clone(), fired))
                .collect();

            for (target, fired) in targets {
                let total_incoming = def.links_into(&target).len() as u32;
                let ti = inst.task_mut(&target)?;
                if ti.status != TaskStatus::NotStarted {
                    continue;
                }
                match ti.resolve_link(fired, total_incoming) {
                    JoinOutcome::Pending => {}
                    JoinOutcome::Ready => {
                        ti.status = TaskStatus::Entered;
                        debug!(instance_id = %inst.id, task_id = %target, "Task entered");
                    }
                    JoinOutcome::Skip => {
                        ti.status = TaskStatus::Skipped;
                        debug!(instance_id = %inst.id, task_id = %target, "Task skipped");
                        worklist.push(target);
                    }
                }
            }
        }

        inst.touch();
        Ok(())
    }

    fn done(&self, inst: &Instance) -> FlowDone {
        let pending = inst.tasks.values().any(|t| {
            matches!(t.status, TaskStatus::Entered | TaskStatus::Waiting)
        });
        if pending {
            return FlowDone::NotDone;
        }
        if inst.has_failed_tasks() {
            let error = inst
                .first_task_error()
                .unwrap_or_else(|| "Flow failed".to_string());
            return FlowDone::Failed(error);
        }
        FlowDone::Completed
    }

    fn cancel(&self, inst: &mut Instance) -> Result<(), EngineError> {
        inst.cancel()
    }
}

/// Default single-activity task lifecycle strategy
#[derive(Debug)]
pub struct BasicTaskBehavior;

#[async_trait]
impl TaskBehavior for BasicTaskBehavior {
    async fn eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, EngineError> {
        if ctx.status() == TaskStatus::Skipped {
            return Ok(EvalResult::Done);
        }

        match ctx.eval_activity().await {
            Ok(true) => Ok(EvalResult::Done),
            Ok(false) => {
                ctx.set_status(TaskStatus::Waiting);
                Ok(EvalResult::Wait)
            }
            Err(err) => {
                ctx.fail_task(err.to_string());
                Ok(EvalResult::Fail)
            }
        }
    }

    async fn post_eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, EngineError> {
        match ctx.post_eval_activity().await {
            Ok(()) => Ok(EvalResult::Done),
            Err(err) => {
                ctx.fail_task(err.to_string());
                Ok(EvalResult::Fail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definition::{
        FlowDefinition, IoMetadata, LinkDefinition, TaskDefinition,
    };
    use crate::engine::test_support::test_engine;
    use serde_json::json;

    fn task(id: &str) -> TaskDefinition {
        TaskDefinition {
            id: id.to_string(),
            name: String::new(),
            type_tag: String::new(),
            activity_ref: "noop".to_string(),
            settings: HashMap::new(),
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
        }
    }

    fn link(from: &str, to: &str, condition: LinkCondition) -> LinkDefinition {
        LinkDefinition {
            from: from.to_string(),
            to: to.to_string(),
            condition,
        }
    }

    fn definition(tasks: Vec<TaskDefinition>, links: Vec<LinkDefinition>) -> Arc<FlowDefinition> {
        Arc::new(FlowDefinition {
            id: "flow:test".to_string(),
            name: "test".to_string(),
            model_name: None,
            metadata: IoMetadata::default(),
            tasks,
            links,
        })
    }

    fn started(def: Arc<FlowDefinition>) -> Instance {
        let mut inst = Instance::new("inst-1".to_string(), "flow:test", def);
        SimpleFlowBehavior
            .start(&mut inst, HashMap::new())
            .unwrap();
        inst
    }

    #[test]
    fn test_start_enters_root_tasks() {
        let def = definition(
            vec![task("a"), task("b")],
            vec![link("a", "b", LinkCondition::Always)],
        );
        let inst = started(def);

        assert_eq!(inst.task("a").unwrap().status, TaskStatus::Entered);
        assert_eq!(inst.task("b").unwrap().status, TaskStatus::NotStarted);
    }

    #[test]
    fn test_task_done_follows_always_link() {
        let engine = test_engine();
        let def = definition(
            vec![task("a"), task("b")],
            vec![link("a", "b", LinkCondition::Always)],
        );
        let mut inst = started(def);

        inst.task_mut("a").unwrap().status = TaskStatus::Completed;
        SimpleFlowBehavior.task_done(&mut inst, "a", &engine).unwrap();

        assert_eq!(inst.task("b").unwrap().status, TaskStatus::Entered);
    }

    #[test]
    fn test_otherwise_fires_exclusively() {
        let engine = test_engine();
        let def = definition(
            vec![task("a"), task("b"), task("c")],
            vec![
                link(
                    "a",
                    "b",
                    LinkCondition::Expression("flow.go == 'yes'".to_string()),
                ),
                link("a", "c", LinkCondition::Otherwise),
            ],
        );

        // Condition true: b entered, c skipped
        let mut inst = started(def.clone());
        inst.attrs
            .insert("go".to_string(), AttrValue::new(json!("yes")));
        inst.task_mut("a").unwrap().status = TaskStatus::Completed;
        SimpleFlowBehavior.task_done(&mut inst, "a", &engine).unwrap();
        assert_eq!(inst.task("b").unwrap().status, TaskStatus::Entered);
        assert_eq!(inst.task("c").unwrap().status, TaskStatus::Skipped);

        // Condition false: otherwise branch entered instead
        let mut inst = started(def);
        inst.attrs
            .insert("go".to_string(), AttrValue::new(json!("no")));
        inst.task_mut("a").unwrap().status = TaskStatus::Completed;
        SimpleFlowBehavior.task_done(&mut inst, "a", &engine).unwrap();
        assert_eq!(inst.task("b").unwrap().status, TaskStatus::Skipped);
        assert_eq!(inst.task("c").unwrap().status, TaskStatus::Entered);
    }

    #[test]
    fn test_join_waits_for_both_sources() {
        let engine = test_engine();
        let def = definition(
            vec![task("a"), task("b"), task("j")],
            vec![
                link("a", "j", LinkCondition::Always),
                link("b", "j", LinkCondition::Always),
            ],
        );
        let mut inst = started(def);

        inst.task_mut("a").unwrap().status = TaskStatus::Completed;
        SimpleFlowBehavior.task_done(&mut inst, "a", &engine).unwrap();
        assert_eq!(inst.task("j").unwrap().status, TaskStatus::NotStarted);

        inst.task_mut("b").unwrap().status = TaskStatus::Completed;
        SimpleFlowBehavior.task_done(&mut inst, "b", &engine).unwrap();
        assert_eq!(inst.task("j").unwrap().status, TaskStatus::Entered);
    }

    #[test]
    fn test_skip_propagates_downstream() {
        let engine = test_engine();
        let def = definition(
            vec![task("a"), task("b"), task("c")],
            vec![
                link(
                    "a",
                    "b",
                    LinkCondition::Expression("flow.go == 'yes'".to_string()),
                ),
                link("b", "c", LinkCondition::Always),
            ],
        );
        let mut inst = started(def);
        inst.attrs
            .insert("go".to_string(), AttrValue::new(json!("no")));

        inst.task_mut("a").unwrap().status = TaskStatus::Completed;
        SimpleFlowBehavior.task_done(&mut inst, "a", &engine).unwrap();

        assert_eq!(inst.task("b").unwrap().status, TaskStatus::Skipped);
        assert_eq!(inst.task("c").unwrap().status, TaskStatus::Skipped);
    }

    #[test]
    fn test_done_verdicts() {
        let def = definition(vec![task("a")], vec![]);
        let mut inst = started(def);

        assert_eq!(SimpleFlowBehavior.done(&inst), FlowDone::NotDone);

        inst.task_mut("a").unwrap().status = TaskStatus::Completed;
        assert_eq!(SimpleFlowBehavior.done(&inst), FlowDone::Completed);

        inst.task_mut("a").unwrap().fail("boom".to_string());
        assert_eq!(
            SimpleFlowBehavior.done(&inst),
            FlowDone::Failed("boom".to_string())
        );
    }
}
