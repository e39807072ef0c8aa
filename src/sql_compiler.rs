//! SQL compiler that turns filter trees into per-source warehouse queries.
//!
//! Compilation is two steps: [`WhereClauseCompiler`] renders the `where`
//! clause from a [`FilterGroup`], and [`DefaultQuerySynthesizer`] wraps it in
//! the fixed `select` for the source table. Downstream column renderers match
//! on the projected names, so the per-table templates are an external
//! contract and must stay byte-for-byte stable.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::filter::{FilterGroup, FilterSpec};
use crate::source::LogSourceTable;
use crate::templates::FilterTemplateRegistry;
use crate::time_range::TimeRange;

/// Row cap applied to every default query.
pub const DEFAULT_LIMIT: usize = 100;

/// Projection and unnesting joins of one log source.
struct SourceTemplate {
    projection: &'static str,
    joins: &'static str,
}

const EDGE_LOGS: SourceTemplate = SourceTemplate {
    projection: "id, timestamp, event_message, metadata, request, response, request.method, request.path, response.status_code",
    joins: "cross join unnest(metadata) as m
  cross join unnest(m.request) as request
  cross join unnest(m.response) as response",
};

const POSTGRES_LOGS: SourceTemplate = SourceTemplate {
    projection: "timestamp, id, event_message, metadata, parsed.error_severity",
    joins: "cross join unnest(metadata) as m
  cross join unnest(m.parsed) as parsed",
};

const FUNCTION_LOGS: SourceTemplate = SourceTemplate {
    projection: "id, timestamp, event_message, metadata.event_type, metadata.function_id, metadata.level",
    joins: "cross join unnest(metadata) as metadata",
};

const FUNCTION_EDGE_LOGS: SourceTemplate = SourceTemplate {
    projection: "id, timestamp, event_message, response.status_code, response, request, request.method, m.function_id, m.execution_time_ms, m.deployment_id, m.version",
    joins: "cross join unnest(metadata) as m
  cross join unnest(m.response) as response
  cross join unnest(m.request) as request",
};

fn source_template(table: LogSourceTable) -> &'static SourceTemplate {
    match table {
        LogSourceTable::EdgeLogs => &EDGE_LOGS,
        LogSourceTable::PostgresLogs => &POSTGRES_LOGS,
        LogSourceTable::FunctionLogs => &FUNCTION_LOGS,
        LogSourceTable::FunctionEdgeLogs => &FUNCTION_EDGE_LOGS,
    }
}

/// Renders the `where` clause of a filter tree.
///
/// Each root key becomes one parenthesised group; groups are joined with
/// `and`. Nested keys are flattened to dotted names and joined with `or`
/// inside their root group. Keys without a template fall back to equality and
/// compilation never fails.
#[derive(Debug, Clone, Default)]
pub struct WhereClauseCompiler {
    registry: FilterTemplateRegistry,
}

impl WhereClauseCompiler {
    pub fn new(registry: FilterTemplateRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FilterTemplateRegistry {
        &self.registry
    }

    /// Returns `""` when no filter contributes, else `"where (...) and (...)"`.
    pub fn compile(&self, table: LogSourceTable, filters: &FilterGroup) -> String {
        let groups: Vec<String> = filters
            .iter()
            .filter_map(|(root, spec)| self.compile_root(table, root, spec))
            .collect();

        if groups.is_empty() {
            String::new()
        } else {
            format!("where {}", groups.join(" and "))
        }
    }

    fn compile_root(&self, table: LogSourceTable, root: &str, spec: &FilterSpec) -> Option<String> {
        match spec {
            FilterSpec::Scalar(value) => {
                if value.is_blank() {
                    return None;
                }
                let predicate = self.registry.resolve(table, root, value)?;
                Some(format!("({})", predicate))
            }
            FilterSpec::Group(group) => {
                let predicates: Vec<String> = group
                    .leaves(root)
                    .into_iter()
                    .filter(|(_, value)| value.is_truthy())
                    .filter_map(|(key, value)| self.registry.resolve(table, &key, value))
                    .collect();
                if predicates.is_empty() {
                    None
                } else {
                    Some(format!("({})", predicates.join(" or ")))
                }
            }
        }
    }
}

/// Emits the fixed per-source `select`, with the `where` clause as the only
/// interpolated part.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQuerySynthesizer;

impl DefaultQuerySynthesizer {
    pub fn synthesize(&self, table: LogSourceTable, where_clause: &str) -> String {
        let template = source_template(table);
        format!(
            "select {}\n  from {}\n  {}\n  {}\n  limit {}",
            template.projection, table, template.joins, where_clause, DEFAULT_LIMIT
        )
    }

    /// Row count over the same joins and filters.
    pub fn synthesize_count(&self, table: LogSourceTable, where_clause: &str) -> String {
        let template = source_template(table);
        format!(
            "select count(*) as count\n  from {}\n  {}\n  {}",
            table, template.joins, where_clause
        )
    }
}

/// Request parameters sent alongside the SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryParams {
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_end: Option<DateTime<Utc>>,
}

/// A compiled `{sql, params}` payload. Never mutated; derive a new one instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: QueryParams,
}

impl CompiledQuery {
    /// Same query with a new upper time bound.
    pub fn with_timestamp_end(&self, end: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.params.timestamp_end = Some(end);
        next
    }

    /// Flat request parameters: `project`, `sql` and the optional bounds.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("project", self.params.project.clone()),
            ("sql", self.sql.clone()),
        ];
        if let Some(start) = self.params.timestamp_start {
            pairs.push(("timestamp_start", iso_timestamp(start)));
        }
        if let Some(end) = self.params.timestamp_end {
            pairs.push(("timestamp_end", iso_timestamp(end)));
        }
        pairs
    }
}

pub fn iso_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Glues the where-clause compiler, the synthesizer and a time range into a
/// [`CompiledQuery`].
#[derive(Debug, Clone, Default)]
pub struct QueryCompiler {
    where_compiler: WhereClauseCompiler,
    synthesizer: DefaultQuerySynthesizer,
}

impl QueryCompiler {
    pub fn new(registry: FilterTemplateRegistry) -> Self {
        Self {
            where_compiler: WhereClauseCompiler::new(registry),
            synthesizer: DefaultQuerySynthesizer,
        }
    }

    pub fn where_clause(&self, table: LogSourceTable, filters: &FilterGroup) -> String {
        self.where_compiler.compile(table, filters)
    }

    pub fn compile(
        &self,
        project: &str,
        table: LogSourceTable,
        filters: &FilterGroup,
        range: &TimeRange,
    ) -> CompiledQuery {
        let where_clause = self.where_clause(table, filters);
        let sql = self.synthesizer.synthesize(table, &where_clause);
        tracing::trace!(table = %table, sql = %sql, "Compiled default query");
        Self::with_params(sql, project, range)
    }

    pub fn compile_count(
        &self,
        project: &str,
        table: LogSourceTable,
        filters: &FilterGroup,
        range: &TimeRange,
    ) -> CompiledQuery {
        let where_clause = self.where_clause(table, filters);
        let sql = self.synthesizer.synthesize_count(table, &where_clause);
        Self::with_params(sql, project, range)
    }

    fn with_params(sql: String, project: &str, range: &TimeRange) -> CompiledQuery {
        CompiledQuery {
            sql,
            params: QueryParams {
                project: project.to_string(),
                timestamp_start: range.start,
                timestamp_end: range.end,
            },
        }
    }
}
