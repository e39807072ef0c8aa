//! Explorer session: the operator's current source, filters and time window,
//! and the result manager they feed.

use chrono::{DateTime, Utc};

use crate::config::ExplorerConfig;
use crate::error::QueryError;
use crate::filter::{FilterGroup, FilterValue};
use crate::results::{Completion, FetchTicket, IncrementalResultManager, ResultRow};
use crate::source::LogSourceTable;
use crate::sql_compiler::{CompiledQuery, QueryCompiler};
use crate::time_range::{HelperRange, TimeRange, TimeRangeSelection};

pub struct ExplorerSession {
    project: String,
    source: LogSourceTable,
    filters: FilterGroup,
    filter_override: FilterGroup,
    range: TimeRangeSelection,
    compiler: QueryCompiler,
    results: IncrementalResultManager,
}

impl ExplorerSession {
    pub fn new(project: impl Into<String>, source: LogSourceTable) -> Self {
        Self {
            project: project.into(),
            source,
            filters: FilterGroup::new(),
            filter_override: FilterGroup::new(),
            range: TimeRangeSelection::default(),
            compiler: QueryCompiler::default(),
            results: IncrementalResultManager::new(),
        }
    }

    pub fn from_config(config: &ExplorerConfig) -> Self {
        let mut session = Self::new(config.project.clone(), config.source);
        session.filter_override = config.filter_override.clone();
        session.range = TimeRangeSelection::helper(config.helper);
        session
    }

    pub fn source(&self) -> LogSourceTable {
        self.source
    }

    pub fn filters(&self) -> &FilterGroup {
        &self.filters
    }

    pub fn time_selection(&self) -> &TimeRangeSelection {
        &self.range
    }

    pub fn results(&self) -> &IncrementalResultManager {
        &self.results
    }

    pub fn rows(&self) -> Vec<&ResultRow> {
        self.results.rows()
    }

    /// Switching source drops filters, since template keys are per source.
    pub fn set_source(&mut self, source: LogSourceTable) {
        if self.source != source {
            self.source = source;
            self.filters.clear();
        }
    }

    pub fn set_filter(&mut self, path: &str, value: FilterValue) {
        self.filters.set_path(path, value);
    }

    pub fn unset_filter(&mut self, path: &str) -> bool {
        self.filters.remove_path(path)
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    pub fn set_search(&mut self, text: &str) {
        if text.is_empty() {
            self.filters.remove("search_query");
        } else {
            self.filters.insert("search_query", text);
        }
    }

    pub fn select_helper(&mut self, helper: HelperRange) {
        self.range.select_helper(helper);
    }

    pub fn set_custom_range(&mut self, range: TimeRange) {
        self.range.set_custom(range);
    }

    pub fn drill_down(&mut self, requested: &TimeRange, now: DateTime<Utc>) -> TimeRange {
        self.range.drill_down(requested, now)
    }

    /// User filters with the fixed overrides on top.
    pub fn effective_filters(&self) -> FilterGroup {
        self.filters.merged(&self.filter_override)
    }

    pub fn compile(&self, now: DateTime<Utc>) -> CompiledQuery {
        self.compiler.compile(
            &self.project,
            self.source,
            &self.effective_filters(),
            &self.range.resolve(now),
        )
    }

    pub fn compile_count(&self, now: DateTime<Utc>) -> CompiledQuery {
        self.compiler.compile_count(
            &self.project,
            self.source,
            &self.effective_filters(),
            &self.range.resolve(now),
        )
    }

    /// Compile the current selection and start a replacing fetch.
    pub fn reload(&mut self, now: DateTime<Utc>) -> (FetchTicket, CompiledQuery) {
        let query = self.compile(now);
        self.results.begin_replace(query)
    }

    pub fn refresh(&mut self) -> Option<(FetchTicket, CompiledQuery)> {
        self.results.begin_refresh()
    }

    pub fn load_older(&mut self) -> Option<(FetchTicket, CompiledQuery)> {
        self.results.begin_older()
    }

    pub fn poll(&self) -> Option<(FetchTicket, CompiledQuery)> {
        self.results.begin_poll()
    }

    pub fn complete(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<ResultRow>, QueryError>,
    ) -> Completion {
        self.results.complete(ticket, result)
    }
}
