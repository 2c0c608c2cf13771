//! The sequence report: fetch a project's sequences, evaluate the table and
//! hand the rendered page to the browser.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::AppConfig;
use crate::entity::EntityRef;
use crate::error::{ClientError, ReportError};
use crate::evaluator::{QueryExecutor, QueryFieldEvaluator};
use crate::filter::QueryFilter;
use crate::render::{display, render_titled, write_html};
use crate::schema::{CachedSchemaProvider, SchemaProvider};
use crate::shotgrid::ShotgridClient;
use crate::table::{build, Column, ColumnKind};

/// Entity type the report lists.
pub const SUBJECT_TYPE: &str = "Sequence";

/// Fetches every sequence of `project_id`, with the raw fields `columns` need.
pub fn find_project_sequences<Q: QueryExecutor>(
    executor: &Q,
    project_id: i64,
    columns: &[Column],
) -> Result<Vec<EntityRef>, ClientError> {
    let filters = [QueryFilter::condition("project.Project.id", "is", project_id)];
    let mut fields: Vec<&str> = vec!["code"];
    for column in columns {
        let source = column.source.as_str();
        if column.kind == ColumnKind::Raw && !matches!(source, "id" | "type") && !fields.contains(&source) {
            fields.push(source);
        }
    }
    executor.find(SUBJECT_TYPE, &filters, &fields)
}

/// Builds the rendered HTML page for one project.
pub fn sequence_table_html<S: SchemaProvider, Q: QueryExecutor>(
    evaluator: &QueryFieldEvaluator<S, Q>,
    project_id: i64,
    columns: &[Column],
    title: &str,
) -> Result<String, ReportError> {
    let sequences =
        find_project_sequences(evaluator.executor(), project_id, columns).map_err(|source| ReportError::Subjects {
            entity_type: SUBJECT_TYPE.to_string(),
            project_id,
            source,
        })?;
    info!(project_id, sequences = sequences.len(), "fetched sequences");

    let rows = build(evaluator, &sequences, columns)?;
    let labels: Vec<&str> = columns.iter().map(|column| column.label.as_str()).collect();
    Ok(render_titled(title, &rows, &labels))
}

/// Connects with `config`, builds the table for `project_id` and writes it
/// out, opening it in the browser when `open_browser` is set.
pub fn open_sequence_table(
    config: &AppConfig,
    project_id: i64,
    output: Option<&Path>,
    open_browser: bool,
) -> Result<PathBuf, ReportError> {
    let client = ShotgridClient::connect(config).map_err(ReportError::Connect)?;
    let schemas = CachedSchemaProvider::new(&client);
    let evaluator = QueryFieldEvaluator::new(&schemas, &client);

    let html = sequence_table_html(&evaluator, project_id, &config.columns, &config.title)?;
    let path = if open_browser {
        display(&html, output)?
    } else {
        write_html(&html, output)?
    };
    Ok(path)
}
