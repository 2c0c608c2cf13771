//! Filter-condition resolver: turns a query field's schema filter tree into
//! executable filters for one subject entity.

use serde_json::Value;

use crate::entity::EntityRef;
use crate::filter::{FilterLeaf, FilterNode, FilterValue, QueryFilter, ResolvedFilter};

/// Resolves a filter tree against `subject`.
///
/// Groups become `{filters, filter_operator}` with one entry per child
/// condition. Inactive leaves resolve to `None`, and stay in their parent's
/// list as `None`. Active leaves become `(path, relation, value)` with
/// "Current ..." placeholders replaced by `subject`.
pub fn resolve(node: &FilterNode, subject: &EntityRef) -> Option<ResolvedFilter> {
    match node {
        FilterNode::Group(group) => Some(ResolvedFilter::Group {
            filters: group
                .conditions
                .iter()
                .map(|child| resolve(child, subject))
                .collect(),
            filter_operator: group.logical_operator.clone(),
        }),
        FilterNode::Leaf(leaf) => resolve_leaf(leaf, subject),
    }
}

fn resolve_leaf(leaf: &FilterLeaf, subject: &EntityRef) -> Option<ResolvedFilter> {
    if !leaf.active {
        return None;
    }

    let mut values: Vec<Value> = leaf
        .values
        .iter()
        .map(|value| match value {
            FilterValue::CurrentEntity { .. } => subject.to_value(),
            FilterValue::Literal(literal) => literal.clone(),
        })
        .collect();

    // Single-valued "is" conditions are stored as one-element arrays
    let value = if values.len() == 1 && leaf.relation == "is" {
        values.remove(0)
    } else {
        Value::Array(values)
    };

    Some(ResolvedFilter::Condition {
        path: leaf.path.clone(),
        relation: leaf.relation.clone(),
        value,
    })
}

/// Drops every `None` entry from a resolved tree, yielding a filter that
/// is safe to send to the query executor.
pub fn into_query_filter(resolved: ResolvedFilter) -> QueryFilter {
    match resolved {
        ResolvedFilter::Condition { path, relation, value } => QueryFilter::Condition { path, relation, value },
        ResolvedFilter::Group { filters, filter_operator } => QueryFilter::Group {
            filters: filters.into_iter().flatten().map(into_query_filter).collect(),
            filter_operator,
        },
    }
}

/// Builds the top-level filter list for a `summarize` call: the resolved
/// root as a single entry, or nothing when the root itself is inactive.
pub fn summary_filters(root: &FilterNode, subject: &EntityRef) -> Vec<QueryFilter> {
    resolve(root, subject).map(into_query_filter).into_iter().collect()
}
