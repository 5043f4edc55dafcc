//! In-process defaults for the engine's external collaborators
//!
//! Everything here is optional: embedders with their own definition
//! store, activity catalog or expression language implement the traits
//! in the crate root instead.

use crate::domain::definition::FlowDefinition;
use crate::domain::instance::Instance;
use crate::engine::ActivityFactory;
use crate::{
    Activity, AttrValue, AttributeResolver, DefinitionProvider, EngineError, ResolveScope,
    StateRecorder,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;

/// Definition store backed by an in-process concurrent map
#[derive(Default)]
pub struct InMemoryDefinitionProvider {
    defs: DashMap<String, Arc<FlowDefinition>>,
}

impl InMemoryDefinitionProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a definition under its id
    pub fn register(&self, def: FlowDefinition) -> Result<(), EngineError> {
        def.validate()?;
        self.defs.insert(def.id.clone(), Arc::new(def));
        Ok(())
    }
}

#[async_trait]
impl DefinitionProvider for InMemoryDefinitionProvider {
    async fn resolve(&self, uri: &str) -> Result<Arc<FlowDefinition>, EngineError> {
        self.defs
            .get(uri)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::DefinitionNotFound(uri.to_string()))
    }
}

/// Activity catalog keyed by activity reference
///
/// Cloning shares the underlying map, so activities registered after
/// an engine context was built are still visible to it.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    inner: Arc<DashMap<String, Arc<dyn Activity>>>,
}

impl ActivityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity under a reference
    pub fn register(&self, activity_ref: &str, activity: Arc<dyn Activity>) {
        self.inner.insert(activity_ref.to_string(), activity);
    }

    /// An activity factory backed by this registry
    pub fn factory(&self) -> ActivityFactory {
        let inner = self.inner.clone();
        Arc::new(move |activity_ref: &str| {
            inner
                .get(activity_ref)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| {
                    EngineError::ConfigurationError(format!(
                        "Activity not registered: {}",
                        activity_ref
                    ))
                })
        })
    }
}

/// Default expression resolver
///
/// Input expressions starting with `$` are JMESPath paths over a
/// `{flow, iteration}` context (`$flow.msg`, `$iteration.value`);
/// anything else passes through as a literal (parsed as JSON when
/// possible, else kept as a string). Link conditions are plain
/// JMESPath expressions over the same context, evaluated for
/// truthiness.
pub struct DefaultResolver;

impl DefaultResolver {
    fn context(scope: &ResolveScope<'_>) -> Value {
        let flow: serde_json::Map<String, Value> = scope
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        json!({
            "flow": flow,
            "iteration": scope.iteration.cloned().unwrap_or(Value::Null),
        })
    }

    fn search(path: &str, scope: &ResolveScope<'_>) -> Result<Value, EngineError> {
        let compiled = jmespath::compile(path)
            .map_err(|e| EngineError::ExpressionError(format!("Invalid expression: {}", e)))?;
        let result = compiled
            .search(Self::context(scope))
            .map_err(|e| EngineError::ExpressionError(format!("Expression failed: {}", e)))?;
        serde_json::to_value(&*result)
            .map_err(|e| EngineError::ExpressionError(e.to_string()))
    }
}

impl AttributeResolver for DefaultResolver {
    fn resolve(&self, expr: &str, scope: &ResolveScope<'_>) -> Result<AttrValue, EngineError> {
        match expr.strip_prefix('$') {
            Some(path) => {
                let value = Self::search(path, scope)?;
                if value.is_null() {
                    return Err(EngineError::ExpressionError(format!(
                        "Expression '{}' resolved to nothing",
                        expr
                    )));
                }
                Ok(AttrValue::new(value))
            }
            None => match serde_json::from_str(expr) {
                Ok(value) => Ok(AttrValue::new(value)),
                Err(_) => Ok(AttrValue::new(Value::String(expr.to_string()))),
            },
        }
    }

    fn eval_condition(&self, expr: &str, scope: &ResolveScope<'_>) -> Result<bool, EngineError> {
        let value = Self::search(expr.strip_prefix('$').unwrap_or(expr), scope)?;
        Ok(match value {
            Value::Null => false,
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        })
    }
}

/// State recorder that discards everything
pub struct NoopStateRecorder;

impl StateRecorder for NoopStateRecorder {
    fn record_snapshot(&self, _instance: &Instance) -> Result<(), EngineError> {
        Ok(())
    }

    fn record_step(&self, _instance: &Instance) -> Result<(), EngineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn scope_with(attrs: &HashMap<String, AttrValue>) -> ResolveScope<'_> {
        ResolveScope {
            attrs,
            iteration: None,
        }
    }

    #[test]
    fn test_flow_attribute_resolution() {
        let attrs = HashMap::from([("msg".to_string(), AttrValue::from_string("hi"))]);
        let resolver = DefaultResolver;

        let value = resolver.resolve("$flow.msg", &scope_with(&attrs)).unwrap();
        assert_eq!(value.as_str().unwrap(), "hi");
    }

    #[test]
    fn test_missing_attribute_is_an_error() {
        let attrs = HashMap::new();
        let resolver = DefaultResolver;

        match resolver.resolve("$flow.ghost", &scope_with(&attrs)) {
            Err(EngineError::ExpressionError(msg)) => {
                assert!(msg.contains("$flow.ghost"));
            }
            other => panic!("Expected ExpressionError, got {:?}", other),
        }
    }

    #[test]
    fn test_iteration_resolution() {
        let attrs = HashMap::new();
        let iteration = json!({"key": 1, "value": 20});
        let scope = ResolveScope {
            attrs: &attrs,
            iteration: Some(&iteration),
        };
        let resolver = DefaultResolver;

        let value = resolver.resolve("$iteration.value", &scope).unwrap();
        assert_eq!(value.as_i64().unwrap(), 20);
        let key = resolver.resolve("$iteration.key", &scope).unwrap();
        assert_eq!(key.as_i64().unwrap(), 1);
    }

    #[test]
    fn test_literal_passthrough() {
        let attrs = HashMap::new();
        let resolver = DefaultResolver;
        let scope = scope_with(&attrs);

        assert_eq!(resolver.resolve("42", &scope).unwrap().as_i64(), Some(42));
        assert_eq!(
            resolver.resolve("hello", &scope).unwrap().as_str(),
            Some("hello")
        );
        assert_eq!(
            resolver.resolve("[1,2]", &scope).unwrap().as_value(),
            &json!([1, 2])
        );
    }

    #[test]
    fn test_condition_truthiness() {
        let attrs = HashMap::from([
            ("go".to_string(), AttrValue::from_string("yes")),
            ("count".to_string(), AttrValue::new(json!(0))),
        ]);
        let resolver = DefaultResolver;
        let scope = scope_with(&attrs);

        assert!(resolver.eval_condition("flow.go == 'yes'", &scope).unwrap());
        assert!(!resolver.eval_condition("flow.go == 'no'", &scope).unwrap());
        assert!(!resolver.eval_condition("flow.count", &scope).unwrap());
        assert!(!resolver.eval_condition("flow.missing", &scope).unwrap());
    }

    #[tokio::test]
    async fn test_provider_round_trip() {
        let provider = InMemoryDefinitionProvider::new();
        assert!(matches!(
            provider.resolve("flow:ghost").await,
            Err(EngineError::DefinitionNotFound(_))
        ));
    }

    #[test]
    fn test_activity_factory_missing_ref() {
        let registry = ActivityRegistry::new();
        let factory = registry.factory();
        assert!(matches!(
            factory("ghost"),
            Err(EngineError::ConfigurationError(_))
        ));
    }
}
