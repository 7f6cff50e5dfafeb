//! In-memory task parameters shared by every stage of one task.

use crate::error::{TaskError, TaskResult};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Concurrent key/value store of JSON values.
#[derive(Debug, Default, Clone)]
pub struct TaskParameters {
    values: DashMap<String, Value>,
}

impl TaskParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` and store it under `key`, returning the previous value.
    pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: T) -> TaskResult<Option<Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.values.insert(key.into(), value))
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    /// Typed lookup. `Ok(None)` when absent, an error when the stored value
    /// does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> TaskResult<Option<T>> {
        match self.values.get(key) {
            Some(entry) => serde_json::from_value(entry.value().clone())
                .map(Some)
                .map_err(|e| TaskError::ParameterError(format!("parameter '{key}': {e}"))),
            None => Ok(None),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(|entry| entry.value().as_str().map(str::to_owned))
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl FromIterator<(String, Value)> for TaskParameters {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
