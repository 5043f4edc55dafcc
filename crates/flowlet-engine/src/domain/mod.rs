//! Domain layer - flow definitions and runtime instance state

/// Immutable flow definition template
pub mod definition;

/// Mutable runtime state for one flow execution
pub mod instance;

/// Runtime record for one task within an instance
pub mod task;
