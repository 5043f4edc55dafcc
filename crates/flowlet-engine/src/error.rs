//! Error types for the Flowlet engine

use thiserror::Error;

/// Core error type for the Flowlet engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Flow definition could not be resolved
    #[error("Flow definition not found: {0}")]
    DefinitionNotFound(String),

    /// Model, task behavior, activity or setting is misconfigured
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Flow definition failed validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Attribute or condition expression could not be resolved
    #[error("Expression evaluation error: {0}")]
    ExpressionError(String),

    /// Activity execution error
    #[error("Activity error: {0}")]
    ActivityError(String),

    /// Flow execution error
    #[error("Flow execution error: {0}")]
    FlowExecutionError(String),

    /// Invalid run request, reported before any stepping starts
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(err: String) -> Self {
        EngineError::Other(err)
    }
}

impl From<&str> for EngineError {
    fn from(err: &str) -> Self {
        EngineError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                EngineError::DefinitionNotFound("flow:orders".to_string()),
                "Flow definition not found: flow:orders",
            ),
            (
                EngineError::ConfigurationError("bad iterate".to_string()),
                "Configuration error: bad iterate",
            ),
            (
                EngineError::ValidationError("dangling link".to_string()),
                "Validation error: dangling link",
            ),
            (
                EngineError::ExpressionError("no such attr".to_string()),
                "Expression evaluation error: no such attr",
            ),
            (
                EngineError::ActivityError("boom".to_string()),
                "Activity error: boom",
            ),
            (
                EngineError::FlowExecutionError("bad state".to_string()),
                "Flow execution error: bad state",
            ),
            (
                EngineError::OperationalError("no snapshot".to_string()),
                "Operational error: no snapshot",
            ),
            (EngineError::Other("other".to_string()), "other"),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: EngineError = json_error.into();

        match error {
            EngineError::SerializationError(msg) => assert!(msg.contains("expected")),
            _ => panic!("Expected SerializationError variant"),
        }
    }

    #[test]
    fn test_from_string_and_str() {
        let error: EngineError = "plain".into();
        assert_eq!(error, EngineError::Other("plain".to_string()));

        let error: EngineError = String::from("owned").into();
        assert_eq!(error, EngineError::Other("owned".to_string()));
    }
}
