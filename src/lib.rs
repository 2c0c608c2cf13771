//! sequence_table - evaluate a project's sequence query fields and render
//! them as an HTML table.
//!
//! A query field stores a saved filter + aggregation instead of a value.
//! This crate re-derives that aggregation from the field's schema and runs
//! it live for each sequence:
//!
//! ```text
//! sequences ── for each row, for each computed column ──┐
//!                                                        v
//!   schema lookup -> filter-tree resolution -> summarize -> cell value
//!                                                        │
//!   rows sorted by id <──────────────────────────────────┘ -> HTML
//! ```
//!
//! - `filter/`, `resolver/` - schema filter trees and "Current ..." substitution
//! - `schema/` - field schemas and their query definitions
//! - `evaluator/` - query-field evaluation against a `QueryExecutor`
//! - `table/`, `render/` - row assembly and HTML output
//! - `shotgrid/` - the REST client backing both traits
//! - `config/`, `report/` - configuration and the end-to-end report

pub mod config;
pub mod entity;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod render;
pub mod report;
pub mod resolver;
pub mod schema;
pub mod shotgrid;
pub mod table;

pub use entity::EntityRef;
pub use error::{ClientError, EvaluateError, ReportError, SchemaLookupError, SummaryExecutionError, TableError};
pub use evaluator::{evaluate, QueryExecutor, QueryFieldEvaluator, Summary, SummaryField};
pub use filter::{is_current_placeholder, FilterNode, FilterValue, QueryFilter, ResolvedFilter};
pub use resolver::resolve;
pub use schema::{CachedSchemaProvider, FieldSchema, QueryDefinition, SchemaProvider};
pub use table::{build, Column, ColumnKind, TableRow};
