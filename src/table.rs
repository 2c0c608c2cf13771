//! Table builder: one row per subject entity, one cell per column.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::entity::EntityRef;
use crate::error::TableError;
use crate::evaluator::{QueryExecutor, QueryFieldEvaluator};
use crate::schema::SchemaProvider;

/// How a column's cell is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Read straight off the subject record
    Raw,
    /// Evaluated as a query field
    Computed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub label: String,
    pub kind: ColumnKind,
    /// Field name on the subject entity type.
    pub source: String,
}

impl Column {
    pub fn raw(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: ColumnKind::Raw,
            source: source.into(),
        }
    }

    pub fn computed(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: ColumnKind::Computed,
            source: source.into(),
        }
    }
}

/// Columns of the sequence overview report.
pub fn default_sequence_columns() -> Vec<Column> {
    vec![
        Column::raw("Sequence Code", "code"),
        Column::raw("ID", "id"),
        Column::computed("Average Cut Duration", "sg_cut_duration"),
        Column::computed("IP Versions", "sg_ip_versions"),
    ]
}

/// One evaluated row, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    subject_id: i64,
    cells: Vec<(String, Value)>,
}

impl TableRow {
    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, value)| value)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.cells.iter().map(|(_, value)| value)
    }
}

/// Builds the table for `subjects`, sorted ascending by subject id.
///
/// Aborts on the first cell that fails to evaluate; the error names the
/// column, the field and the subject.
pub fn build<S: SchemaProvider, Q: QueryExecutor>(
    evaluator: &QueryFieldEvaluator<S, Q>,
    subjects: &[EntityRef],
    columns: &[Column],
) -> Result<Vec<TableRow>, TableError> {
    let mut rows = Vec::with_capacity(subjects.len());

    for subject in subjects {
        let mut cells = Vec::with_capacity(columns.len());
        for column in columns {
            let value = match column.kind {
                ColumnKind::Raw => subject.field(&column.source),
                ColumnKind::Computed => {
                    evaluator
                        .evaluate(&column.source, subject)
                        .map_err(|source| TableError {
                            column: column.label.clone(),
                            field: column.source.clone(),
                            subject: subject.clone(),
                            source,
                        })?
                }
            };
            cells.push((column.label.clone(), value));
        }
        debug!(subject = %subject, "row built");
        rows.push(TableRow {
            subject_id: subject.id,
            cells,
        });
    }

    rows.sort_by_key(TableRow::subject_id);
    info!(rows = rows.len(), columns = columns.len(), "table built");
    Ok(rows)
}
