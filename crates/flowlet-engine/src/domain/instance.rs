use crate::domain::definition::FlowDefinition;
use crate::domain::task::{TaskInstance, TaskStatus};
use crate::{AttrValue, EngineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Flow instance status
///
/// The ordering is total: any status below `Completed` means the
/// instance may still have work, which is exactly the guard the run
/// driver's loop uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FlowStatus {
    /// Instance was created but not started
    NotStarted,

    /// Instance is executing or suspended mid-execution
    Active,

    /// Instance completed successfully
    Completed,

    /// Instance was administratively cancelled
    Cancelled,

    /// Instance failed
    Failed,
}

impl FlowStatus {
    /// True once the instance can never make further progress
    pub fn is_terminal(&self) -> bool {
        *self >= FlowStatus::Completed
    }
}

/// Non-owning back-reference from a sub-flow instance to its parent,
/// kept for observability only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterRef {
    /// Parent instance id
    pub id: String,

    /// Parent flow name
    pub name: String,
}

/// Mutable runtime state for one execution of a flow definition
///
/// An instance is a fully serializable value: a suspended instance can
/// be snapshotted, shipped to another worker and resumed there. The
/// definition reference is not part of the snapshot; callers rebind it
/// through [`Instance::bind_definition`] after deserializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Unique instance id
    pub id: String,

    /// URI of the flow definition this instance executes
    pub flow_uri: String,

    /// Flow name, denormalized from the definition for logging and
    /// parent back-references
    pub name: String,

    /// Current status
    pub status: FlowStatus,

    /// Flow-scope attribute store
    pub attrs: HashMap<String, AttrValue>,

    /// Task instances keyed by task id
    pub tasks: HashMap<String, TaskInstance>,

    /// Terminal error captured when the instance failed
    pub error: Option<String>,

    /// Parent back-reference, set only for sub-flow instances
    #[serde(default)]
    pub master: Option<MasterRef>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    #[serde(skip)]
    def: Option<Arc<FlowDefinition>>,
}

impl Instance {
    /// Create a new instance of the given definition
    pub fn new(id: String, flow_uri: &str, def: Arc<FlowDefinition>) -> Self {
        let now = Utc::now();
        let tasks = def
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskInstance::new(&t.id)))
            .collect();

        Self {
            id,
            flow_uri: flow_uri.to_string(),
            name: def.name.clone(),
            status: FlowStatus::NotStarted,
            attrs: HashMap::new(),
            tasks,
            error: None,
            master: None,
            created_at: now,
            updated_at: now,
            def: Some(def),
        }
    }

    /// Reattach the definition after deserializing a snapshot
    pub fn bind_definition(&mut self, def: Arc<FlowDefinition>) {
        self.name = def.name.clone();
        // Task templates added since the snapshot get fresh records
        for task in &def.tasks {
            self.tasks
                .entry(task.id.clone())
                .or_insert_with(|| TaskInstance::new(&task.id));
        }
        self.def = Some(def);
    }

    /// The bound definition
    pub fn definition(&self) -> Result<&Arc<FlowDefinition>, EngineError> {
        self.def.as_ref().ok_or_else(|| {
            EngineError::FlowExecutionError(format!(
                "Instance {} has no bound definition",
                self.id
            ))
        })
    }

    /// Update the timestamp
    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Mark the instance active; valid only from NotStarted
    pub fn mark_active(&mut self) -> Result<(), EngineError> {
        if self.status != FlowStatus::NotStarted {
            return Err(EngineError::FlowExecutionError(format!(
                "Cannot start flow in state: {:?}",
                self.status
            )));
        }
        self.status = FlowStatus::Active;
        self.touch();
        Ok(())
    }

    /// Complete the instance successfully
    pub fn complete(&mut self) -> Result<(), EngineError> {
        if self.status != FlowStatus::Active {
            return Err(EngineError::FlowExecutionError(format!(
                "Cannot complete flow in state: {:?}",
                self.status
            )));
        }
        self.status = FlowStatus::Completed;
        self.touch();
        Ok(())
    }

    /// Fail the instance, retaining the first terminal error
    pub fn fail(&mut self, error: String) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::FlowExecutionError(format!(
                "Cannot fail flow in state: {:?}",
                self.status
            )));
        }
        self.status = FlowStatus::Failed;
        self.error = Some(error);
        self.touch();
        Ok(())
    }

    /// Administratively cancel the instance; observed at the top of the
    /// next step
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::FlowExecutionError(format!(
                "Cannot cancel flow in state: {:?}",
                self.status
            )));
        }
        self.status = FlowStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// Merge externally supplied attribute updates into flow scope
    pub fn update_attrs(&mut self, attrs: HashMap<String, AttrValue>) {
        if attrs.is_empty() {
            return;
        }
        self.attrs.extend(attrs);
        self.touch();
    }

    /// Re-execute under a new identity while preserving recorded
    /// attribute state. Task records are reset; the caller rebinds the
    /// (possibly updated) definition and starts the instance again.
    pub fn restart(&mut self, new_id: String) {
        self.id = new_id;
        self.status = FlowStatus::NotStarted;
        self.error = None;
        for ti in self.tasks.values_mut() {
            let task_id = ti.task_id.clone();
            *ti = TaskInstance::new(&task_id);
        }
        self.touch();
    }

    /// Look up a task instance
    pub fn task(&self, task_id: &str) -> Result<&TaskInstance, EngineError> {
        self.tasks.get(task_id).ok_or_else(|| {
            EngineError::FlowExecutionError(format!("Unknown task instance: {}", task_id))
        })
    }

    /// Look up a task instance mutably
    pub fn task_mut(&mut self, task_id: &str) -> Result<&mut TaskInstance, EngineError> {
        self.tasks.get_mut(task_id).ok_or_else(|| {
            EngineError::FlowExecutionError(format!("Unknown task instance: {}", task_id))
        })
    }

    /// Signal that the external wait of the given task was satisfied;
    /// the next applicable step dispatches PostEval for it
    pub fn mark_task_resumable(&mut self, task_id: &str) -> Result<(), EngineError> {
        self.task_mut(task_id)?.mark_resumable();
        self.touch();
        Ok(())
    }

    /// True if any task failed
    pub fn has_failed_tasks(&self) -> bool {
        self.tasks
            .values()
            .any(|t| t.status == TaskStatus::Failed)
    }

    /// First recorded task error, if any
    pub fn first_task_error(&self) -> Option<String> {
        // Definition order keeps error selection deterministic
        let def = self.def.as_ref()?;
        def.tasks.iter().find_map(|t| {
            self.tasks
                .get(&t.id)
                .filter(|ti| ti.status == TaskStatus::Failed)
                .map(|ti| {
                    ti.error
                        .clone()
                        .unwrap_or_else(|| format!("task '{}' failed", t.id))
                })
        })
    }

    /// Project flow-scope attributes onto the declared output metadata
    pub fn return_data(&self) -> HashMap<String, AttrValue> {
        let mut data = HashMap::new();
        if let Some(def) = &self.def {
            for slot in &def.metadata.output {
                if let Some(value) = self.attrs.get(&slot.name) {
                    data.insert(slot.name.clone(), value.clone());
                }
            }
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definition::{AttrDef, IoMetadata, TaskDefinition};
    use serde_json::json;

    fn test_definition() -> Arc<FlowDefinition> {
        Arc::new(FlowDefinition {
            id: "flow:test".to_string(),
            name: "test".to_string(),
            model_name: None,
            metadata: IoMetadata {
                input: vec![AttrDef::new("msg")],
                output: vec![AttrDef::new("msg")],
            },
            tasks: vec![TaskDefinition {
                id: "t1".to_string(),
                name: String::new(),
                type_tag: String::new(),
                activity_ref: "noop".to_string(),
                settings: HashMap::new(),
                input_mapping: HashMap::new(),
                output_mapping: HashMap::new(),
            }],
            links: vec![],
        })
    }

    fn active_instance() -> Instance {
        let mut inst = Instance::new("inst-1".to_string(), "flow:test", test_definition());
        inst.mark_active().unwrap();
        inst
    }

    #[test]
    fn test_instance_creation() {
        let inst = Instance::new("inst-1".to_string(), "flow:test", test_definition());
        assert_eq!(inst.status, FlowStatus::NotStarted);
        assert_eq!(inst.name, "test");
        assert_eq!(inst.tasks.len(), 1);
        assert!(inst.tasks.contains_key("t1"));
        assert!(inst.master.is_none());
    }

    #[test]
    fn test_status_ordering() {
        assert!(FlowStatus::NotStarted < FlowStatus::Completed);
        assert!(FlowStatus::Active < FlowStatus::Completed);
        assert!(FlowStatus::Cancelled >= FlowStatus::Completed);
        assert!(FlowStatus::Failed >= FlowStatus::Completed);
        assert!(!FlowStatus::Active.is_terminal());
        assert!(FlowStatus::Completed.is_terminal());
        assert!(FlowStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_transition_guards() {
        let mut inst = active_instance();
        assert!(inst.mark_active().is_err());

        inst.complete().unwrap();
        assert!(inst.fail("late".to_string()).is_err());
        assert!(inst.cancel().is_err());
    }

    #[test]
    fn test_fail_records_error() {
        let mut inst = active_instance();
        inst.fail("boom".to_string()).unwrap();
        assert_eq!(inst.status, FlowStatus::Failed);
        assert_eq!(inst.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_return_data_projection() {
        let mut inst = active_instance();
        inst.attrs
            .insert("msg".to_string(), AttrValue::from_string("hi"));
        inst.attrs
            .insert("internal".to_string(), AttrValue::new(json!(42)));

        let data = inst.return_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("msg").unwrap().as_str().unwrap(), "hi");
    }

    #[test]
    fn test_restart_resets_for_reexecution() {
        let mut inst = active_instance();
        inst.attrs
            .insert("msg".to_string(), AttrValue::from_string("hi"));
        inst.task_mut("t1").unwrap().status = TaskStatus::Completed;
        inst.fail("boom".to_string()).unwrap();

        inst.restart("inst-2".to_string());
        assert_eq!(inst.id, "inst-2");
        assert_eq!(inst.status, FlowStatus::NotStarted);
        assert!(inst.error.is_none());

        // Attribute state survives; task records are fresh
        assert_eq!(inst.attrs.get("msg").unwrap().as_str().unwrap(), "hi");
        assert_eq!(inst.task("t1").unwrap().status, TaskStatus::NotStarted);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut inst = active_instance();
        inst.attrs
            .insert("msg".to_string(), AttrValue::from_string("hi"));
        inst.task_mut("t1").unwrap().status = TaskStatus::Waiting;

        let snapshot = serde_json::to_string(&inst).unwrap();
        let mut restored: Instance = serde_json::from_str(&snapshot).unwrap();

        // Definition is not part of the snapshot
        assert!(restored.definition().is_err());
        restored.bind_definition(test_definition());
        assert!(restored.definition().is_ok());

        assert_eq!(restored.id, inst.id);
        assert_eq!(restored.status, FlowStatus::Active);
        assert_eq!(restored.task("t1").unwrap().status, TaskStatus::Waiting);
        assert_eq!(restored.attrs.get("msg").unwrap().as_str().unwrap(), "hi");
    }

    #[test]
    fn test_mark_task_resumable() {
        let mut inst = active_instance();
        inst.task_mut("t1").unwrap().status = TaskStatus::Waiting;
        inst.mark_task_resumable("t1").unwrap();
        assert!(inst.task("t1").unwrap().resume_pending);

        assert!(inst.mark_task_resumable("ghost").is_err());
    }
}
