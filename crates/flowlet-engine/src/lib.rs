//! Flowlet Engine - embeddable workflow execution engine
//!
//! Drives running instances of declarative flow definitions to
//! completion through discrete, resumable steps. Supports branching,
//! iteration, sub-flow composition and mid-flight suspend/resume/
//! restart: a suspended instance is a plain serializable value that a
//! different worker can pick up later.
//!
//! The engine itself performs no I/O. Definition loading, activity
//! execution, expression resolution, result delivery and state
//! recording are external collaborators behind the traits in this
//! module; `support` ships in-memory defaults for embedding and tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod domain;
pub mod engine;
pub mod error;
pub mod model;
pub mod support;
pub mod types;

pub use error::EngineError;
pub use types::AttrValue;

use crate::domain::definition::FlowDefinition;
use crate::domain::instance::Instance;
use crate::model::ActivityContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves flow URIs to definitions
///
/// The engine treats resolved definitions as immutable and caches
/// nothing itself.
#[async_trait]
pub trait DefinitionProvider: Send + Sync {
    /// Resolve a flow URI to its definition
    async fn resolve(&self, uri: &str) -> Result<Arc<FlowDefinition>, EngineError>;
}

/// A leaf unit of work invoked by a task
#[async_trait]
pub trait Activity: Send + Sync {
    /// Invoke the activity once.
    ///
    /// Returns `Ok(true)` when the activity completed within this call
    /// (outputs set on the context), `Ok(false)` when completion will
    /// be signaled externally and the task must wait.
    async fn eval(&self, ctx: &mut ActivityContext) -> Result<bool, EngineError>;

    /// Finalize output capture after an externally satisfied wait.
    ///
    /// Only called for activities that previously returned
    /// `Ok(false)` from [`eval`](Activity::eval). The default is a
    /// no-op for activities that always complete synchronously.
    async fn post_eval(&self, _ctx: &mut ActivityContext) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Data visible to one expression resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolveScope<'a> {
    /// Flow-scope attributes of the owning instance
    pub attrs: &'a HashMap<String, AttrValue>,

    /// The owning task's current `iteration` tuple, when inside an
    /// iterator
    pub iteration: Option<&'a serde_json::Value>,
}

/// Resolves declared input expressions and link conditions
///
/// Failures propagate as task failures, never panics.
pub trait AttributeResolver: Send + Sync {
    /// Resolve an input expression to a concrete value
    fn resolve(&self, expr: &str, scope: &ResolveScope<'_>) -> Result<AttrValue, EngineError>;

    /// Evaluate a link condition expression to a boolean
    fn eval_condition(&self, expr: &str, scope: &ResolveScope<'_>) -> Result<bool, EngineError>;
}

/// Receives the outcome of one flow run
///
/// `handle_result` may be called once for an early id-only result and
/// once for final completion; `done` is called exactly once, always,
/// as the terminating signal.
pub trait ResultHandler: Send + Sync {
    /// Deliver result data or an error
    fn handle_result(
        &self,
        data: Option<HashMap<String, AttrValue>>,
        error: Option<EngineError>,
    );

    /// Signal that no further results will be delivered
    fn done(&self);
}

/// Optional observer of instance state during a run
///
/// Best-effort only: recording failures must not abort the run and are
/// never consulted for control flow.
pub trait StateRecorder: Send + Sync {
    /// Record a full instance snapshot
    fn record_snapshot(&self, instance: &Instance) -> Result<(), EngineError>;

    /// Record that one step completed
    fn record_step(&self, instance: &Instance) -> Result<(), EngineError>;
}
