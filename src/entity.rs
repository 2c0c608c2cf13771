//! Entity references as returned by the tracking database.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record reference: `{id, type, ...other fields}`.
///
/// Identity is the `(type, id)` pair. The same shape is used for query
/// subjects and for the value substituted into "Current ..." filter
/// placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: i64,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Any additional fields fetched alongside the record (e.g. `code`).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: i64) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Reads a named field off the record. `id` and `type` resolve to the
    /// identity; unknown fields read as `null`.
    pub fn field(&self, name: &str) -> Value {
        match name {
            "id" => Value::from(self.id),
            "type" => Value::from(self.entity_type.clone()),
            _ => self.fields.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 2);
        map.insert("type".to_string(), Value::from(self.entity_type.clone()));
        map.insert("id".to_string(), Value::from(self.id));
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} #{}", self.entity_type, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_with_extra_fields() {
        let entity: EntityRef =
            serde_json::from_value(json!({"id": 300, "type": "Sequence", "code": "SQ010"})).unwrap();
        assert_eq!(entity.id, 300);
        assert_eq!(entity.entity_type, "Sequence");
        assert_eq!(entity.field("code"), json!("SQ010"));
        assert_eq!(entity.field("id"), json!(300));
        assert_eq!(entity.field("missing"), Value::Null);
    }

    #[test]
    fn test_to_value_keeps_identity() {
        let entity = EntityRef::new("Sequence", 300);
        assert_eq!(entity.to_value(), json!({"id": 300, "type": "Sequence"}));
        assert_eq!(entity.to_string(), "Sequence #300");
    }
}
