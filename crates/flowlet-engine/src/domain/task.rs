use crate::AttrValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Task has not become eligible yet
    NotStarted,

    /// Task is eligible and will be evaluated on the next step
    Entered,

    /// Task is suspended until an external signal arrives
    Waiting,

    /// Task was skipped because none of its incoming links fired
    Skipped,

    /// Task completed successfully
    Completed,

    /// Task failed
    Failed,
}

impl TaskStatus {
    /// True for statuses that will never be evaluated again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Skipped | TaskStatus::Completed | TaskStatus::Failed
        )
    }
}

/// Outcome of resolving one incoming link against a task's join state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Incoming links remain unresolved; the task is not eligible yet
    Pending,

    /// All incoming links resolved and at least one fired
    Ready,

    /// All incoming links resolved and none fired
    Skip,
}

/// Runtime record for one task within an instance
///
/// The working-data map is an opaque scratch store owned exclusively by
/// the task behavior that writes it (e.g. the iterator behavior keeps
/// its cursor there); it survives a suspend/resume boundary unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    /// ID of the task template this record tracks
    pub task_id: String,

    /// Current status
    pub status: TaskStatus,

    /// Per-behavior scratch data, opaque to the scheduler
    #[serde(default)]
    pub working_data: HashMap<String, serde_json::Value>,

    /// Resolved input values snapshotted at evaluation time
    #[serde(default)]
    pub inputs: HashMap<String, AttrValue>,

    /// Output values captured from the activity
    #[serde(default)]
    pub outputs: HashMap<String, AttrValue>,

    /// Set when an external event satisfied this task's wait; the next
    /// step dispatches PostEval instead of Eval
    #[serde(default)]
    pub resume_pending: bool,

    /// Error recorded when the task failed
    #[serde(default)]
    pub error: Option<String>,

    // Join bookkeeping: count of incoming links not yet resolved,
    // initialized lazily from the definition on first resolution.
    #[serde(default)]
    unresolved_links: Option<u32>,

    #[serde(default)]
    link_fired: bool,
}

impl TaskInstance {
    /// Create a fresh record for the given task template
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::NotStarted,
            working_data: HashMap::new(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            resume_pending: false,
            error: None,
            unresolved_links: None,
            link_fired: false,
        }
    }

    /// Record one resolved incoming link and report the join outcome.
    ///
    /// `total_incoming` is the number of incoming links in the
    /// definition; the counter is initialized from it on the first
    /// resolution. The task becomes eligible only once every incoming
    /// link is resolved fired-or-not.
    pub fn resolve_link(&mut self, fired: bool, total_incoming: u32) -> JoinOutcome {
        let remaining = self.unresolved_links.get_or_insert(total_incoming);
        if fired {
            self.link_fired = true;
        }
        *remaining = remaining.saturating_sub(1);

        if *remaining > 0 {
            JoinOutcome::Pending
        } else if self.link_fired {
            JoinOutcome::Ready
        } else {
            JoinOutcome::Skip
        }
    }

    /// Mark a waiting task as externally satisfied so the next step
    /// dispatches PostEval
    pub fn mark_resumable(&mut self) {
        if self.status == TaskStatus::Waiting {
            self.resume_pending = true;
        }
    }

    /// Record a failure on this task
    pub fn fail(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_task_instance() {
        let ti = TaskInstance::new("t1");
        assert_eq!(ti.task_id, "t1");
        assert_eq!(ti.status, TaskStatus::NotStarted);
        assert!(ti.working_data.is_empty());
        assert!(!ti.resume_pending);
    }

    #[test]
    fn test_join_single_link_fired() {
        let mut ti = TaskInstance::new("t1");
        assert_eq!(ti.resolve_link(true, 1), JoinOutcome::Ready);
    }

    #[test]
    fn test_join_single_link_not_fired() {
        let mut ti = TaskInstance::new("t1");
        assert_eq!(ti.resolve_link(false, 1), JoinOutcome::Skip);
    }

    #[test]
    fn test_join_waits_for_all_links() {
        let mut ti = TaskInstance::new("t1");
        assert_eq!(ti.resolve_link(false, 2), JoinOutcome::Pending);
        assert_eq!(ti.resolve_link(true, 2), JoinOutcome::Ready);
    }

    #[test]
    fn test_join_all_unfired_skips() {
        let mut ti = TaskInstance::new("t1");
        assert_eq!(ti.resolve_link(false, 2), JoinOutcome::Pending);
        assert_eq!(ti.resolve_link(false, 2), JoinOutcome::Skip);
    }

    #[test]
    fn test_mark_resumable_requires_waiting() {
        let mut ti = TaskInstance::new("t1");
        ti.mark_resumable();
        assert!(!ti.resume_pending);

        ti.status = TaskStatus::Waiting;
        ti.mark_resumable();
        assert!(ti.resume_pending);
    }

    #[test]
    fn test_fail_records_error() {
        let mut ti = TaskInstance::new("t1");
        ti.fail("boom".to_string());
        assert_eq!(ti.status, TaskStatus::Failed);
        assert_eq!(ti.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_working_data_survives_serialization() {
        let mut ti = TaskInstance::new("t1");
        ti.status = TaskStatus::Waiting;
        ti.working_data
            .insert("_iterator".to_string(), json!({"cursor": 1}));
        ti.resolve_link(true, 2);

        let serialized = serde_json::to_string(&ti).unwrap();
        let deserialized: TaskInstance = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.status, TaskStatus::Waiting);
        assert_eq!(
            deserialized.working_data.get("_iterator").unwrap(),
            &json!({"cursor": 1})
        );

        // Join state carries over: one more resolution completes the join
        let mut deserialized = deserialized;
        assert_eq!(deserialized.resolve_link(false, 2), JoinOutcome::Ready);
    }
}
