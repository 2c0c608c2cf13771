//! Filter trees: the schema form stored on a query field, the resolved form
//! produced for one subject, and the dispatchable form sent to `summarize`.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::FilterShapeError;

/// Nesting limit for schema filter trees.
pub const MAX_FILTER_DEPTH: usize = 32;

/// Name prefix marking a "Current ..." placeholder value.
const CURRENT_PREFIX: &str = "Current ";

/// A node of a query field's saved filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// A single condition, e.g. `project.Project.id is [Current Sequence]`
    Leaf(FilterLeaf),
    /// A boolean combination of child conditions
    Group(FilterGroup),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterLeaf {
    pub path: String,
    pub relation: String,
    pub active: bool,
    pub values: Vec<FilterValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterGroup {
    pub logical_operator: String,
    pub conditions: Vec<FilterNode>,
}

/// A value inside a leaf condition.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Passed through unchanged: strings, numbers, entity dicts.
    Literal(Value),
    /// `{id: 0, name: "Current <Type>"}`; replaced by the subject entity.
    CurrentEntity { name: String },
}

/// A filter after placeholder substitution.
///
/// Inactive leaves resolve to `None`, so group children may contain `None`
/// entries. Use [`crate::resolver::into_query_filter`] before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedFilter {
    Condition {
        path: String,
        relation: String,
        value: Value,
    },
    Group {
        filters: Vec<Option<ResolvedFilter>>,
        filter_operator: String,
    },
}

/// A filter ready to be sent to the query executor. Contains no null entries.
///
/// Serializes to the api3 filter shape: conditions as `[path, relation, value]`
/// and groups as `{"filter_operator": ..., "filters": [...]}`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    Condition {
        path: String,
        relation: String,
        value: Value,
    },
    Group {
        filters: Vec<QueryFilter>,
        filter_operator: String,
    },
}

impl QueryFilter {
    pub fn condition(path: impl Into<String>, relation: impl Into<String>, value: impl Into<Value>) -> Self {
        QueryFilter::Condition {
            path: path.into(),
            relation: relation.into(),
            value: value.into(),
        }
    }
}

impl Serialize for QueryFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueryFilter::Condition { path, relation, value } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(path)?;
                seq.serialize_element(relation)?;
                seq.serialize_element(value)?;
                seq.end()
            }
            QueryFilter::Group { filters, filter_operator } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("filter_operator", filter_operator)?;
                map.serialize_entry("filters", filters)?;
                map.end()
            }
        }
    }
}

/// True for a placeholder meaning "the entity currently being evaluated":
/// a dict with `id == 0` and a `name` starting with `"Current "`.
///
/// This is the only signal the schema exposes for self-referential
/// conditions, so every check goes through here.
pub fn is_current_placeholder(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let zero_id = obj.get("id").and_then(Value::as_i64) == Some(0);
    let current_name = obj
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| name.starts_with(CURRENT_PREFIX));
    zero_id && current_name
}

impl FilterValue {
    pub fn from_value(value: &Value) -> Self {
        if is_current_placeholder(value) {
            let name = value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            FilterValue::CurrentEntity { name }
        } else {
            FilterValue::Literal(value.clone())
        }
    }
}

impl FilterNode {
    /// Parses a schema filter tree (`properties.query.value.filters`).
    ///
    /// A node with `values` is a leaf, a node with `conditions` is a group.
    /// Anything else, including a node carrying both, is rejected.
    pub fn from_value(value: &Value) -> Result<Self, FilterShapeError> {
        parse_node(value, "filters", 0)
    }
}

fn parse_node(value: &Value, location: &str, depth: usize) -> Result<FilterNode, FilterShapeError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(FilterShapeError::new(
            location,
            format!("nesting exceeds maximum depth of {}", MAX_FILTER_DEPTH),
        ));
    }
    let obj = value
        .as_object()
        .ok_or_else(|| FilterShapeError::new(location, "expected an object"))?;

    match (obj.get("values"), obj.get("conditions")) {
        (Some(_), Some(_)) => Err(FilterShapeError::new(
            location,
            "node has both 'values' and 'conditions'",
        )),
        (None, None) => Err(FilterShapeError::new(
            location,
            "node has neither 'values' nor 'conditions'",
        )),
        (Some(values), None) => {
            let values = values
                .as_array()
                .ok_or_else(|| FilterShapeError::new(location, "'values' is not an array"))?;
            Ok(FilterNode::Leaf(FilterLeaf {
                path: required_str(obj, "path", location)?,
                relation: required_str(obj, "relation", location)?,
                active: is_active_flag(obj.get("active")),
                values: values.iter().map(FilterValue::from_value).collect(),
            }))
        }
        (None, Some(conditions)) => {
            let conditions = conditions
                .as_array()
                .ok_or_else(|| FilterShapeError::new(location, "'conditions' is not an array"))?;
            let logical_operator = required_str(obj, "logical_operator", location)?;
            let conditions = conditions
                .iter()
                .enumerate()
                .map(|(i, child)| parse_node(child, &format!("{}.conditions[{}]", location, i), depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FilterNode::Group(FilterGroup {
                logical_operator,
                conditions,
            }))
        }
    }
}

fn required_str(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    location: &str,
) -> Result<String, FilterShapeError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FilterShapeError::new(location, format!("missing string '{}'", key)))
}

// The schema stores the flag as the string "true"/"false".
fn is_active_flag(flag: Option<&Value>) -> bool {
    match flag {
        Some(Value::String(s)) => s == "true",
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}
