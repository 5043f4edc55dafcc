//! Core value types shared across the engine

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// An attribute value flowing through the engine
///
/// This is a wrapper around a JSON value with helper methods for
/// working with the value in different shapes. Flow-scope attributes,
/// task input/output snapshots and run results all use this type.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AttrValue {
    /// The inner JSON value
    pub value: serde_json::Value,
}

impl AttrValue {
    /// Create a new attribute value from a JSON value
    #[inline]
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Create a null attribute value
    #[inline]
    pub fn null() -> Self {
        Self {
            value: serde_json::Value::Null,
        }
    }

    /// Get the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    /// Check if the value is null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Try to view the value as a string
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Try to view the value as a signed integer
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_i64()
    }

    /// Try to view the value as a number
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Try to view the value as a boolean
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// Try to view the value as an array
    #[inline]
    pub fn as_array(&self) -> Option<&Vec<serde_json::Value>> {
        self.value.as_array()
    }

    /// Try to view the value as an object
    #[inline]
    pub fn as_object(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.value.as_object()
    }

    /// Try to convert the value to a specific type
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.value.clone())
    }

    /// Create an attribute value from a serializable value
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Create an attribute value from a string
    #[inline]
    pub fn from_string(s: &str) -> Self {
        Self::new(serde_json::Value::String(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attr_value_creation() {
        let value = AttrValue::new(json!({"name": "test"}));
        assert_eq!(value.as_value()["name"], "test");
    }

    #[test]
    fn test_attr_value_null() {
        let value = AttrValue::null();
        assert!(value.is_null());

        let value = AttrValue::new(json!(42));
        assert!(!value.is_null());
    }

    #[test]
    fn test_attr_value_accessors() {
        assert_eq!(AttrValue::from_string("hi").as_str().unwrap(), "hi");
        assert_eq!(AttrValue::new(json!(7)).as_i64().unwrap(), 7);
        assert_eq!(AttrValue::new(json!(2.5)).as_f64().unwrap(), 2.5);
        assert!(AttrValue::new(json!(true)).as_bool().unwrap());
        assert_eq!(AttrValue::new(json!([1, 2])).as_array().unwrap().len(), 2);
        assert_eq!(
            AttrValue::new(json!({"a": 1})).as_object().unwrap().len(),
            1
        );
    }

    #[test]
    fn test_attr_value_serialization() {
        let original = AttrValue::new(json!({"complex": {"nested": ["array", 123]}}));
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: AttrValue = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_attr_value_to_and_from() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Payload {
            id: u32,
            label: String,
        }

        let payload = Payload {
            id: 9,
            label: "nine".to_string(),
        };

        let value = AttrValue::from(&payload).unwrap();
        assert_eq!(value.as_value()["id"], 9);

        let back: Payload = value.to().unwrap();
        assert_eq!(back, payload);
    }
}
