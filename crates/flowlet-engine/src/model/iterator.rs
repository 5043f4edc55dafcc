//! Iterator task behavior: repeats its inner activity once per element
//! of a configured iterate source
//!
//! Private working-data contract: `_iterator` holds the serialized
//! [`IteratorState`], `iteration` holds the current `{key, value}`
//! tuple visible to the task's input resolution. Both survive a
//! suspend/resume boundary unchanged.

use crate::domain::task::TaskStatus;
use crate::model::{EvalResult, TaskBehavior, TaskContext};
use crate::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const ITERATOR_KEY: &str = "_iterator";
const ITERATION_KEY: &str = "iteration";

/// The kind of collection an iterator walks, resolved once at
/// construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IterSource {
    /// Integer range 0..N-1
    Range(i64),

    /// Ordered sequence of values
    Sequence(Vec<Value>),

    /// Key/value mapping, entry order as serialized
    Mapping(Vec<(String, Value)>),
}

/// Serializable cursor over an iterate source
///
/// The cursor starts before the first element; `next` advances it and
/// reports whether an element is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorState {
    source: IterSource,
    cursor: i64,
}

impl IteratorState {
    /// Build an iterator from a task's `iterate` setting.
    ///
    /// Accepted shapes: an integer or integer-valued string (range
    /// over 0..N-1), an array (sequence), an object (mapping). Any
    /// other shape is a configuration error naming the task.
    pub fn from_setting(task_name: &str, setting: &Value) -> Result<Self, EngineError> {
        let source = match setting {
            Value::Number(n) if n.as_i64().is_some() => {
                IterSource::Range(n.as_i64().unwrap_or(0).max(0))
            }
            Value::String(s) => match s.parse::<i64>() {
                Ok(n) => IterSource::Range(n.max(0)),
                Err(_) => {
                    return Err(EngineError::ConfigurationError(format!(
                        "Task '{}': invalid iterate setting: {}",
                        task_name, setting
                    )))
                }
            },
            Value::Array(items) => IterSource::Sequence(items.clone()),
            Value::Object(map) => IterSource::Mapping(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ),
            _ => {
                return Err(EngineError::ConfigurationError(format!(
                    "Task '{}': invalid iterate setting: {}",
                    task_name, setting
                )))
            }
        };
        Ok(Self { source, cursor: -1 })
    }

    fn len(&self) -> i64 {
        match &self.source {
            IterSource::Range(n) => *n,
            IterSource::Sequence(items) => items.len() as i64,
            IterSource::Mapping(entries) => entries.len() as i64,
        }
    }

    /// Advance the cursor; false once the source is exhausted
    pub fn next(&mut self) -> bool {
        if self.cursor + 1 < self.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// True when at least one element remains past the cursor
    pub fn has_next(&self) -> bool {
        self.cursor + 1 < self.len()
    }

    /// Key of the current element (index, or mapping key)
    pub fn key(&self) -> Value {
        match &self.source {
            IterSource::Range(_) | IterSource::Sequence(_) => json!(self.cursor),
            IterSource::Mapping(entries) => entries
                .get(self.cursor as usize)
                .map(|(k, _)| json!(k))
                .unwrap_or(Value::Null),
        }
    }

    /// Value of the current element
    pub fn value(&self) -> Value {
        match &self.source {
            IterSource::Range(_) => json!(self.cursor),
            IterSource::Sequence(items) => items
                .get(self.cursor as usize)
                .cloned()
                .unwrap_or(Value::Null),
            IterSource::Mapping(entries) => entries
                .get(self.cursor as usize)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null),
        }
    }
}

/// Task behavior that drives one activity invocation per element
#[derive(Debug)]
pub struct IteratorTaskBehavior;

#[async_trait]
impl TaskBehavior for IteratorTaskBehavior {
    async fn eval(&self, ctx: &mut TaskContext<'_>) -> Result<EvalResult, EngineError> {
        if ctx.status() == TaskStatus::Skipped {
            return Ok(EvalResult::Done);
        }

        let mut iter = match ctx.get_working_data(ITERATOR_KEY) {
            Some(stored) => serde_json::from_value::<IteratorState>(stored)?,
            None => match ctx.setting("iterate") {
                // Missing iterate setting is a deliberate no-op
                None => return Ok(EvalResult::Done),
                Some(setting) => {
                    match IteratorState::from_setting(&ctx.task_name(), &setting) {
                        Ok(iter) => iter,
                        Err(err) => {
                            ctx.fail_task(err.to_string());
                            return Ok(EvalResult::Fail);
                        }
                    }
                }
            },
        };

        if !iter.next() {
            return Ok(EvalResult::Done);
        }

        ctx.set_working_data(
            ITERATION_KEY,
            json!({ "key": iter.key(), "value": iter.value() }),
        );
        ctx.set_working_data(ITERATOR_KEY, serde_json::to_value(&iter)?);

        match ctx.eval_activity().await {
            Ok(true) => Ok(EvalResult::Repeat),
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
        if let Err(err) = ctx.post_eval_activity().await {
            ctx.fail_task(err.to_string());
            return Ok(EvalResult::Fail);
        }

        let iter = match ctx.get_working_data(ITERATOR_KEY) {
            Some(stored) => serde_json::from_value::<IteratorState>(stored)?,
            None => return Ok(EvalResult::Done),
        };
        if iter.has_next() {
            Ok(EvalResult::Repeat)
        } else {
            Ok(EvalResult::Done)
        }
    }
}
