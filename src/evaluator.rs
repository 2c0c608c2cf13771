//! Query-field evaluator: re-derives a query field's aggregation from its
//! schema and runs it for one subject entity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::entity::EntityRef;
use crate::error::{ClientError, EvaluateError, SchemaLookupError, SummaryExecutionError};
use crate::filter::QueryFilter;
use crate::resolver::summary_filters;
use crate::schema::SchemaProvider;

/// One requested aggregation: `{field, type}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryField {
    pub field: String,
    #[serde(rename = "type")]
    pub summary_type: String,
}

/// Result of a `summarize` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub summaries: Map<String, Value>,
}

/// Read access to the remote store.
pub trait QueryExecutor {
    fn find(&self, entity_type: &str, filters: &[QueryFilter], fields: &[&str]) -> Result<Vec<EntityRef>, ClientError>;

    fn summarize(
        &self,
        entity_type: &str,
        filters: &[QueryFilter],
        summary_fields: &[SummaryField],
    ) -> Result<Summary, ClientError>;
}

impl<T: QueryExecutor + ?Sized> QueryExecutor for &T {
    fn find(&self, entity_type: &str, filters: &[QueryFilter], fields: &[&str]) -> Result<Vec<EntityRef>, ClientError> {
        (**self).find(entity_type, filters, fields)
    }

    fn summarize(
        &self,
        entity_type: &str,
        filters: &[QueryFilter],
        summary_fields: &[SummaryField],
    ) -> Result<Summary, ClientError> {
        (**self).summarize(entity_type, filters, summary_fields)
    }
}

/// Evaluates query fields against explicit schema and executor handles.
///
/// Holds no mutable state, so one evaluator can serve any number of
/// subjects, sequentially or concurrently.
#[derive(Debug, Clone, Copy)]
pub struct QueryFieldEvaluator<S, Q> {
    schemas: S,
    executor: Q,
}

impl<S: SchemaProvider, Q: QueryExecutor> QueryFieldEvaluator<S, Q> {
    pub fn new(schemas: S, executor: Q) -> Self {
        Self { schemas, executor }
    }

    pub fn executor(&self) -> &Q {
        &self.executor
    }

    /// Computes `field_name` for `subject`, returning the aggregated value.
    pub fn evaluate(&self, field_name: &str, subject: &EntityRef) -> Result<Value, EvaluateError> {
        let schema = self
            .schemas
            .read_field_schema(&subject.entity_type, field_name)
            .map_err(|source| SchemaLookupError::Unavailable {
                entity_type: subject.entity_type.clone(),
                field: field_name.to_string(),
                source,
            })?;
        let definition = schema.query_definition(&subject.entity_type, field_name)?;

        let filters = summary_filters(&definition.filters, subject);
        let request = [SummaryField {
            field: definition.summary_field.clone(),
            summary_type: definition.summary_default.clone(),
        }];
        debug!(
            field = field_name,
            subject = %subject,
            target = %definition.entity_type,
            summary = %definition.summary_default,
            "evaluating query field"
        );

        let mut summary = self
            .executor
            .summarize(&definition.entity_type, &filters, &request)
            .map_err(|source| SummaryExecutionError::Rejected {
                entity_type: definition.entity_type.clone(),
                field: definition.summary_field.clone(),
                source,
            })?;

        summary
            .summaries
            .remove(&definition.summary_field)
            .ok_or_else(|| {
                SummaryExecutionError::MissingSummary {
                    entity_type: definition.entity_type,
                    field: definition.summary_field,
                }
                .into()
            })
    }
}

/// Convenience wrapper over [`QueryFieldEvaluator::evaluate`].
pub fn evaluate<S: SchemaProvider, Q: QueryExecutor>(
    schemas: S,
    executor: Q,
    field_name: &str,
    subject: &EntityRef,
) -> Result<Value, EvaluateError> {
    QueryFieldEvaluator::new(schemas, executor).evaluate(field_name, subject)
}
