use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Represents a parsed and validated flow definition
///
/// A definition is an immutable template: it is loaded once, shared
/// behind an `Arc` and referenced by every instance that executes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Identity of the flow, used as its URI
    pub id: String,

    /// Human-readable name of the flow
    pub name: String,

    /// Name of the flow model governing execution behavior.
    /// `None` selects the process-wide default model.
    #[serde(default)]
    pub model_name: Option<String>,

    /// Declared input/output slots
    #[serde(default)]
    pub metadata: IoMetadata,

    /// The task templates in this flow
    pub tasks: Vec<TaskDefinition>,

    /// The link templates connecting tasks
    #[serde(default)]
    pub links: Vec<LinkDefinition>,
}

/// Represents a task template in a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// ID of the task, unique within the flow
    pub id: String,

    /// Display name; empty means the id is used
    #[serde(default)]
    pub name: String,

    /// Behavior type tag (e.g. "basic", "iterator", "subflow");
    /// empty selects the model's default task behavior
    #[serde(default)]
    pub type_tag: String,

    /// Reference to the activity this task invokes
    pub activity_ref: String,

    /// Task settings (e.g. the iterator's "iterate" value)
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,

    /// Input mapping from flow-scope expressions to activity inputs
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,

    /// Output mapping from activity outputs to flow-scope attributes,
    /// keyed by the target attribute name
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
}

impl TaskDefinition {
    /// Display name of the task, falling back to its id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Represents a link template between two tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDefinition {
    /// Source task id
    pub from: String,

    /// Target task id
    pub to: String,

    /// Condition controlling whether the link fires
    #[serde(default)]
    pub condition: LinkCondition,
}

/// Condition kind of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkCondition {
    /// Fires unconditionally when the source task completes
    Always,

    /// Fires when the expression evaluates truthy against flow-scope
    /// attributes
    Expression(String),

    /// Fires only if no sibling conditional link from the same source
    /// fired
    Otherwise,
}

impl Default for LinkCondition {
    fn default() -> Self {
        LinkCondition::Always
    }
}

/// Declared input and output slots of a flow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoMetadata {
    /// Named input slots
    #[serde(default)]
    pub input: Vec<AttrDef>,

    /// Named output slots
    #[serde(default)]
    pub output: Vec<AttrDef>,
}

/// A named, optionally typed attribute slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrDef {
    /// Attribute name
    pub name: String,

    /// Optional type hint (e.g. "string", "array"); informational only
    #[serde(default)]
    pub type_hint: Option<String>,
}

impl AttrDef {
    /// Create a new attribute slot with no type hint
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_hint: None,
        }
    }
}

impl FlowDefinition {
    /// Look up a task template by id
    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// All links whose source is the given task
    pub fn links_from(&self, id: &str) -> Vec<&LinkDefinition> {
        self.links.iter().filter(|l| l.from == id).collect()
    }

    /// All links whose target is the given task
    pub fn links_into(&self, id: &str) -> Vec<&LinkDefinition> {
        self.links.iter().filter(|l| l.to == id).collect()
    }

    /// Tasks with no incoming links; these become eligible at start
    pub fn root_tasks(&self) -> Vec<&TaskDefinition> {
        self.tasks
            .iter()
            .filter(|t| self.links_into(&t.id).is_empty())
            .collect()
    }

    /// Validate the flow definition
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tasks.is_empty() {
            return Err(EngineError::ValidationError(
                "Flow must have at least one task".to_string(),
            ));
        }

        // Check for ID uniqueness
        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            if !task_ids.insert(task.id.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Duplicate task ID: {}",
                    task.id
                )));
            }
        }

        // Every link must reference existing task ids
        for link in &self.links {
            if !task_ids.contains(link.from.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Link references non-existent source task: {}",
                    link.from
                )));
            }
            if !task_ids.contains(link.to.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Link references non-existent target task: {}",
                    link.to
                )));
            }
        }

        Ok(())
    }
}
