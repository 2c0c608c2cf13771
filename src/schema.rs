//! Field schemas and the query definition embedded in a query field.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ClientError, SchemaLookupError};
use crate::filter::FilterNode;

/// Schema description of one field of an entity type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Each property is stored as `{"value": ..., "editable": ...}`.
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// The saved aggregation behind a query field.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefinition {
    /// Entity type being aggregated.
    pub entity_type: String,
    pub filters: FilterNode,
    pub summary_field: String,
    /// Aggregation operator name, e.g. `sum`, `average`, `record_count`.
    pub summary_default: String,
}

impl FieldSchema {
    fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).and_then(|prop| prop.get("value"))
    }

    /// Extracts the query definition, failing if this is not a query field.
    ///
    /// `summary_field` and `summary_default` are read from the field's
    /// properties, or from inside the query value when absent or not a
    /// string there.
    pub fn query_definition(&self, entity_type: &str, field: &str) -> Result<QueryDefinition, SchemaLookupError> {
        let query = self
            .property("query")
            .filter(|query| query.is_object())
            .ok_or_else(|| SchemaLookupError::NotQueryField {
                entity_type: entity_type.to_string(),
                field: field.to_string(),
            })?;

        let missing = |property: &str| SchemaLookupError::MissingProperty {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
            property: property.to_string(),
        };
        let lookup = |name: &str| -> Result<String, SchemaLookupError> {
            self.property(name)
                .and_then(Value::as_str)
                .or_else(|| query.get(name).and_then(Value::as_str))
                .map(str::to_string)
                .ok_or_else(|| missing(name))
        };

        let target = query
            .get("entity_type")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("entity_type"))?;
        let filters = query.get("filters").ok_or_else(|| missing("filters"))?;
        let filters = FilterNode::from_value(filters).map_err(|source| SchemaLookupError::MalformedFilter {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
            source,
        })?;

        Ok(QueryDefinition {
            entity_type: target.to_string(),
            filters,
            summary_field: lookup("summary_field")?,
            summary_default: lookup("summary_default")?,
        })
    }
}

/// Source of field schemas.
pub trait SchemaProvider {
    /// Fails if the entity type or field is unknown.
    fn read_field_schema(&self, entity_type: &str, field_name: &str) -> Result<FieldSchema, ClientError>;
}

impl<T: SchemaProvider + ?Sized> SchemaProvider for &T {
    fn read_field_schema(&self, entity_type: &str, field_name: &str) -> Result<FieldSchema, ClientError> {
        (**self).read_field_schema(entity_type, field_name)
    }
}

/// Memoizes schema lookups by `(entity_type, field_name)`.
///
/// Schemas do not vary per subject, so a table build only needs one lookup
/// per computed column. Failed lookups are not cached.
#[derive(Debug)]
pub struct CachedSchemaProvider<P> {
    inner: P,
    cache: Mutex<HashMap<(String, String), FieldSchema>>,
}

impl<P: SchemaProvider> CachedSchemaProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

impl<P: SchemaProvider> SchemaProvider for CachedSchemaProvider<P> {
    fn read_field_schema(&self, entity_type: &str, field_name: &str) -> Result<FieldSchema, ClientError> {
        let key = (entity_type.to_string(), field_name.to_string());
        if let Some(schema) = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
        {
            return Ok(schema.clone());
        }

        debug!(entity_type, field_name, "schema cache miss");
        let schema = self.inner.read_field_schema(entity_type, field_name)?;
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, schema.clone());
        Ok(schema)
    }
}
