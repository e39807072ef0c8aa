//! Per-source filter templates.
//!
//! Each log source maps dotted filter keys (`status_code.error`,
//! `severity.error`, `product.database`, ...) to a SQL predicate. The key set is
//! shared with the filter UI and must not be renamed.

use std::collections::HashMap;

use sea_query::{MysqlQueryBuilder, QueryBuilder, Value};

use crate::filter::FilterValue;
use crate::source::LogSourceTable;

/// A predicate template: either a fixed fragment toggled on by a truthy value,
/// or a renderer that builds the fragment from the value.
#[derive(Debug, Clone, Copy)]
pub enum FilterTemplate {
    Literal(&'static str),
    Render(fn(&FilterValue) -> String),
}

/// Quote a string as a SQL literal. Backslash escaping keeps quotes and
/// backslashes inside the literal.
pub fn quote_literal(text: &str) -> String {
    MysqlQueryBuilder.value_to_string(&Value::from(text))
}

fn search_query(value: &FilterValue) -> String {
    format!(
        "regexp_contains(event_message, {})",
        quote_literal(&value.to_string())
    )
}

const COMMON: &[(&str, FilterTemplate)] = &[("search_query", FilterTemplate::Render(search_query))];

const EDGE_LOGS: &[(&str, FilterTemplate)] = &[
    ("status_code.error", FilterTemplate::Literal("response.status_code between 500 and 599")),
    ("status_code.success", FilterTemplate::Literal("response.status_code between 200 and 299")),
    ("status_code.warning", FilterTemplate::Literal("response.status_code between 400 and 499")),
    (
        "product.database",
        FilterTemplate::Literal("request.path like '/rest/%' or request.path like '/graphql/%'"),
    ),
    ("product.storage", FilterTemplate::Literal("request.path like '/storage/%'")),
    ("product.auth", FilterTemplate::Literal("request.path like '/auth/%'")),
    ("product.realtime", FilterTemplate::Literal("request.path like '/realtime/%'")),
    ("method.get", FilterTemplate::Literal("request.method = 'GET'")),
    ("method.post", FilterTemplate::Literal("request.method = 'POST'")),
    ("method.put", FilterTemplate::Literal("request.method = 'PUT'")),
    ("method.patch", FilterTemplate::Literal("request.method = 'PATCH'")),
    ("method.delete", FilterTemplate::Literal("request.method = 'DELETE'")),
    ("method.options", FilterTemplate::Literal("request.method = 'OPTIONS'")),
];

const FUNCTION_EDGE_LOGS: &[(&str, FilterTemplate)] = &[
    ("status_code.error", FilterTemplate::Literal("response.status_code between 500 and 599")),
    ("status_code.success", FilterTemplate::Literal("response.status_code between 200 and 299")),
    ("status_code.warning", FilterTemplate::Literal("response.status_code between 400 and 499")),
];

const POSTGRES_LOGS: &[(&str, FilterTemplate)] = &[
    ("severity.error", FilterTemplate::Literal("parsed.error_severity in ('ERROR', 'FATAL', 'PANIC')")),
    (
        "severity.noError",
        FilterTemplate::Literal("parsed.error_severity not in ('ERROR', 'FATAL', 'PANIC')"),
    ),
    ("severity.log", FilterTemplate::Literal("parsed.error_severity = 'LOG'")),
];

const FUNCTION_LOGS: &[(&str, FilterTemplate)] = &[
    ("severity.error", FilterTemplate::Literal("metadata.level = 'error'")),
    ("severity.notError", FilterTemplate::Literal("metadata.level != 'error'")),
    ("severity.log", FilterTemplate::Literal("metadata.level = 'log'")),
    ("severity.info", FilterTemplate::Literal("metadata.level = 'info'")),
    ("severity.debug", FilterTemplate::Literal("metadata.level = 'debug'")),
    ("severity.warn", FilterTemplate::Literal("metadata.level = 'warn'")),
];

fn builtin(table: LogSourceTable) -> &'static [(&'static str, FilterTemplate)] {
    match table {
        LogSourceTable::EdgeLogs => EDGE_LOGS,
        LogSourceTable::PostgresLogs => POSTGRES_LOGS,
        LogSourceTable::FunctionLogs => FUNCTION_LOGS,
        LogSourceTable::FunctionEdgeLogs => FUNCTION_EDGE_LOGS,
    }
}

/// Lookup table from `(source, dotted key)` to template.
#[derive(Debug, Clone)]
pub struct FilterTemplateRegistry {
    templates: HashMap<LogSourceTable, HashMap<String, FilterTemplate>>,
}

impl Default for FilterTemplateRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for table in LogSourceTable::ALL {
            for (key, template) in COMMON.iter().chain(builtin(table)) {
                registry.register(table, *key, *template);
            }
        }
        registry
    }
}

impl FilterTemplateRegistry {
    /// Registry with the built-in templates of every source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no templates; every key uses the equality fallback.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn register(&mut self, table: LogSourceTable, key: impl Into<String>, template: FilterTemplate) {
        self.templates
            .entry(table)
            .or_default()
            .insert(key.into(), template);
    }

    pub fn get(&self, table: LogSourceTable, key: &str) -> Option<FilterTemplate> {
        self.templates.get(&table)?.get(key).copied()
    }

    /// Render the predicate for `key = value`, or `None` when the filter
    /// contributes nothing.
    pub fn resolve(&self, table: LogSourceTable, key: &str, value: &FilterValue) -> Option<String> {
        match self.get(table, key) {
            Some(FilterTemplate::Render(render)) => match value {
                FilterValue::Null => None,
                _ => Some(render(value)),
            },
            Some(FilterTemplate::Literal(predicate)) => {
                value.is_truthy().then(|| predicate.to_string())
            }
            None => equality_predicate(key, value),
        }
    }
}

/// Generic `key = value` predicate for keys without a template.
fn equality_predicate(key: &str, value: &FilterValue) -> Option<String> {
    match value {
        FilterValue::Null => None,
        FilterValue::Text(text) => Some(format!("{} = {}", key, quote_literal(text))),
        FilterValue::Bool(_) | FilterValue::Number(_) => Some(format!("{} = {}", key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_template_requires_truthy_value() {
        let registry = FilterTemplateRegistry::new();
        assert_eq!(
            registry.resolve(LogSourceTable::EdgeLogs, "status_code.error", &FilterValue::Bool(true)),
            Some("response.status_code between 500 and 599".to_string())
        );
        assert_eq!(
            registry.resolve(LogSourceTable::EdgeLogs, "status_code.error", &FilterValue::Bool(false)),
            None
        );
    }

    #[test]
    fn test_render_template_skips_null() {
        let registry = FilterTemplateRegistry::new();
        assert_eq!(
            registry.resolve(LogSourceTable::PostgresLogs, "search_query", &FilterValue::Null),
            None
        );
        assert_eq!(
            registry.resolve(
                LogSourceTable::PostgresLogs,
                "search_query",
                &FilterValue::Text("timeout".into())
            ),
            Some("regexp_contains(event_message, 'timeout')".to_string())
        );
    }

    #[test]
    fn test_fallback_equality_by_type() {
        let registry = FilterTemplateRegistry::new();
        let table = LogSourceTable::FunctionLogs;
        assert_eq!(
            registry.resolve(table, "metadata.function_id", &FilterValue::Text("abc".into())),
            Some("metadata.function_id = 'abc'".to_string())
        );
        assert_eq!(
            registry.resolve(table, "response.status_code", &FilterValue::from(404)),
            Some("response.status_code = 404".to_string())
        );
        assert_eq!(
            registry.resolve(table, "metadata.cold_start", &FilterValue::Bool(true)),
            Some("metadata.cold_start = true".to_string())
        );
    }

    #[test]
    fn test_fallback_escapes_quotes() {
        let registry = FilterTemplateRegistry::new();
        let predicate = registry
            .resolve(LogSourceTable::EdgeLogs, "request.path", &FilterValue::Text("/a'b".into()))
            .unwrap();
        assert_eq!(predicate, r"request.path = '/a\'b'");
    }

    #[test]
    fn test_templates_are_per_source() {
        let registry = FilterTemplateRegistry::new();
        assert!(registry.get(LogSourceTable::EdgeLogs, "method.get").is_some());
        assert!(registry.get(LogSourceTable::FunctionEdgeLogs, "method.get").is_none());
        assert_eq!(
            registry.resolve(LogSourceTable::FunctionLogs, "severity.error", &FilterValue::Bool(true)),
            Some("metadata.level = 'error'".to_string())
        );
        assert_eq!(
            registry.resolve(LogSourceTable::PostgresLogs, "severity.error", &FilterValue::Bool(true)),
            Some("parsed.error_severity in ('ERROR', 'FATAL', 'PANIC')".to_string())
        );
    }

    #[test]
    fn test_register_custom_template() {
        fn min_duration(value: &FilterValue) -> String {
            format!("m.execution_time_ms >= {}", value)
        }

        let mut registry = FilterTemplateRegistry::empty();
        registry.register(
            LogSourceTable::FunctionEdgeLogs,
            "slow",
            FilterTemplate::Render(min_duration),
        );
        assert_eq!(
            registry.resolve(LogSourceTable::FunctionEdgeLogs, "slow", &FilterValue::from(250)),
            Some("m.execution_time_ms >= 250".to_string())
        );
        assert!(registry.get(LogSourceTable::EdgeLogs, "search_query").is_none());
    }
}
