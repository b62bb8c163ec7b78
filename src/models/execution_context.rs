use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Persisted key/value state used to resume a step mid-way
///
/// Readers record their position here after every committed chunk and read it
/// back when a restarted step opens them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn put<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        self.entries.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.entries.insert(key.into(), Value::from(value));
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(Value::as_i64)
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), Value::String(value.into()));
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_long_round_trip() {
        let mut ctx = ExecutionContext::new();
        ctx.put_long("reader.read.count", 5);
        assert_eq!(ctx.get_long("reader.read.count"), Some(5));
        assert_eq!(ctx.get_long("missing"), None);
    }

    #[test]
    fn test_value_conversion() {
        let mut ctx = ExecutionContext::new();
        ctx.put_string("file", "/tmp/a.csv");
        ctx.put("cursor", &json!({"line": 12})).unwrap();

        let value = ctx.to_value();
        assert_eq!(value["file"], "/tmp/a.csv");
        assert_eq!(value["cursor"]["line"], 12);

        let restored = ExecutionContext::from_value(value).unwrap();
        assert_eq!(restored, ctx);
    }
}
