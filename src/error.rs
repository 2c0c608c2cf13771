//! Error types for sequence_table
//!
//! - `ClientError`: transport and API failures from the database client
//! - `FilterShapeError`: a filter-tree node that is neither a leaf nor a group
//! - `SchemaLookupError`: a field is missing or is not a usable query field
//! - `SummaryExecutionError`: the aggregation call failed
//! - `EvaluateError`: either of the two above, raised by the evaluator
//! - `TableError`: an evaluation failure tagged with its column and subject
//! - `ReportError`: anything that stops a report from being produced

use thiserror::Error;

use crate::entity::EntityRef;

/// Failures talking to the remote database.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out after {attempts} attempt(s)")]
    Timeout { url: String, attempts: u32 },

    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server answered with an error status.
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// Used by in-memory backends that have no record of the request.
    #[error("not found: {0}")]
    NotFound(String),
}

/// A filter-tree node with an unrecognizable shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed filter node at '{location}': {reason}")]
pub struct FilterShapeError {
    /// Dotted location of the node inside the tree, e.g. `filters.conditions[1]`.
    pub location: String,
    pub reason: String,
}

impl FilterShapeError {
    pub fn new(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// The requested field cannot be evaluated as a query field.
#[derive(Debug, Error)]
pub enum SchemaLookupError {
    #[error("could not read schema for {entity_type}.{field}: {source}")]
    Unavailable {
        entity_type: String,
        field: String,
        #[source]
        source: ClientError,
    },

    #[error("{entity_type}.{field} is not a query field (no 'query' property)")]
    NotQueryField { entity_type: String, field: String },

    #[error("{entity_type}.{field} query definition is missing '{property}'")]
    MissingProperty {
        entity_type: String,
        field: String,
        property: String,
    },

    #[error("{entity_type}.{field} has a malformed filter tree: {source}")]
    MalformedFilter {
        entity_type: String,
        field: String,
        #[source]
        source: FilterShapeError,
    },
}

/// The aggregation request derived from a query field was rejected or failed.
#[derive(Debug, Error)]
pub enum SummaryExecutionError {
    #[error("summarize on {entity_type} for '{field}' failed: {source}")]
    Rejected {
        entity_type: String,
        field: String,
        #[source]
        source: ClientError,
    },

    #[error("summarize on {entity_type} returned no summary for '{field}'")]
    MissingSummary { entity_type: String, field: String },
}

#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error(transparent)]
    SchemaLookup(#[from] SchemaLookupError),

    #[error(transparent)]
    SummaryExecution(#[from] SummaryExecutionError),
}

/// A table build failure, naming the offending column and subject.
#[derive(Debug, Error)]
#[error("column '{column}' (field '{field}') failed for {subject}: {source}")]
pub struct TableError {
    pub column: String,
    pub field: String,
    pub subject: EntityRef,
    #[source]
    pub source: EvaluateError,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("could not connect: {0}")]
    Connect(#[source] ClientError),

    #[error("could not fetch {entity_type} records for project {project_id}: {source}")]
    Subjects {
        entity_type: String,
        project_id: i64,
        #[source]
        source: ClientError,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("could not write report: {0}")]
    Io(#[from] std::io::Error),
}
