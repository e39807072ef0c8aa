//! Incremental result loading.
//!
//! [`IncrementalResultManager`] owns the visible, deduplicated row set and
//! decides which responses may touch it. Every fetch is issued as a
//! [`FetchTicket`]; a filter, source or time-range change starts a new
//! generation, and any response carrying an older generation is dropped.

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::LogQueryClient;
use crate::error::QueryError;
use crate::sql_compiler::CompiledQuery;

/// A log row as returned by the warehouse. Columns beyond the common ones
/// depend on the source projection and are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Unix microseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    #[serde(flatten)]
    pub columns: Map<String, Value>,
}

impl ResultRow {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.timestamp)
    }
}

/// Identity of a row: its `id` when present, else its full serialized value
/// with object keys sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum RowKey {
    Id(String),
    Content(String),
}

impl RowKey {
    fn of(row: &ResultRow) -> Self {
        match &row.id {
            Some(id) => RowKey::Id(id.clone()),
            None => RowKey::Content(
                serde_json::to_value(row)
                    .map(|value| canonical(value).to_string())
                    .unwrap_or_else(|_| format!("{:?}", row)),
            ),
        }
    }
}

fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, canonical(v))).collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}

/// Deduplicated rows. Later writes of the same identity replace earlier ones.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    rows: HashMap<RowKey, ResultRow>,
}

impl RowSet {
    pub fn from_rows(rows: Vec<ResultRow>) -> Self {
        let mut set = Self::default();
        set.merge(rows);
        set
    }

    /// Merge `rows`, returning how many identities were not present before.
    pub fn merge(&mut self, rows: Vec<ResultRow>) -> usize {
        let mut added = 0;
        for row in rows {
            if self.rows.insert(RowKey::of(&row), row).is_none() {
                added += 1;
            }
        }
        added
    }

    /// Number of distinct identities in `rows` that this set lacks.
    pub fn count_new(&self, rows: &[ResultRow]) -> usize {
        let mut seen = std::collections::HashSet::new();
        rows.iter()
            .map(RowKey::of)
            .filter(|key| !self.rows.contains_key(key) && seen.insert(key.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.rows.values().map(|row| row.timestamp).min()
    }

    /// Rows newest first; equal timestamps are ordered by identity.
    pub fn sorted(&self) -> Vec<&ResultRow> {
        let mut entries: Vec<(&RowKey, &ResultRow)> = self.rows.iter().collect();
        entries.sort_by(|(ka, a), (kb, b)| {
            Reverse(a.timestamp).cmp(&Reverse(b.timestamp)).then_with(|| ka.cmp(kb))
        });
        entries.into_iter().map(|(_, row)| row).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FetchState {
    #[default]
    Idle,
    Fetching,
    FetchingOlder,
    Error(QueryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// New filters, source or time range: replaces the row set.
    Replace,
    /// Manual re-run of the current query: merges.
    Refresh,
    /// Next page backwards in time: merges.
    Older,
    /// Background check for newer rows: counts only.
    Poll,
}

/// Handle for one issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    kind: FetchKind,
}

impl FetchTicket {
    pub fn kind(&self) -> FetchKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Effect of applying a fetch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Replaced { rows: usize },
    Merged { added: usize },
    Polled { new_count: usize },
    Failed(QueryError),
    /// Superseded by a newer generation and ignored.
    Stale,
}

#[derive(Debug, Default)]
pub struct IncrementalResultManager {
    generation: u64,
    query: Option<CompiledQuery>,
    rows: RowSet,
    state: FetchState,
    new_count: usize,
    exhausted: bool,
}

impl IncrementalResultManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn rows(&self) -> Vec<&ResultRow> {
        self.rows.sorted()
    }

    pub fn row_set(&self) -> &RowSet {
        &self.rows
    }

    pub fn query(&self) -> Option<&CompiledQuery> {
        self.query.as_ref()
    }

    /// Rows seen by the last poll that are not yet visible.
    pub fn new_count(&self) -> usize {
        self.new_count
    }

    /// Whether the last older page added nothing.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn ticket(&self, kind: FetchKind) -> FetchTicket {
        FetchTicket {
            generation: self.generation,
            kind,
        }
    }

    /// Start a replacing fetch for a new query. Every outstanding ticket
    /// becomes stale.
    pub fn begin_replace(&mut self, query: CompiledQuery) -> (FetchTicket, CompiledQuery) {
        self.generation += 1;
        self.query = Some(query.clone());
        self.state = FetchState::Fetching;
        self.new_count = 0;
        self.exhausted = false;
        tracing::debug!(generation = self.generation, "Issuing replace fetch");
        (self.ticket(FetchKind::Replace), query)
    }

    /// Re-run the current query and merge the result.
    pub fn begin_refresh(&mut self) -> Option<(FetchTicket, CompiledQuery)> {
        if matches!(self.state, FetchState::Fetching | FetchState::FetchingOlder) {
            return None;
        }
        let query = self.query.clone()?;
        self.state = FetchState::Fetching;
        Some((self.ticket(FetchKind::Refresh), query))
    }

    /// Fetch the page before the oldest visible row.
    pub fn begin_older(&mut self) -> Option<(FetchTicket, CompiledQuery)> {
        if self.state != FetchState::Idle || self.exhausted {
            return None;
        }
        let oldest = DateTime::from_timestamp_micros(self.rows.oldest_timestamp()?)?;
        let query = self.query.as_ref()?.with_timestamp_end(oldest);
        self.state = FetchState::FetchingOlder;
        tracing::debug!(generation = self.generation, end = %oldest, "Issuing older fetch");
        Some((self.ticket(FetchKind::Older), query))
    }

    /// Re-issue the current query to count unseen rows. Leaves state alone.
    pub fn begin_poll(&self) -> Option<(FetchTicket, CompiledQuery)> {
        if self.state == FetchState::Fetching {
            return None;
        }
        let query = self.query.clone()?;
        Some((self.ticket(FetchKind::Poll), query))
    }

    /// Apply the outcome of a fetch issued through one of the `begin_*` calls.
    pub fn complete(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<ResultRow>, QueryError>,
    ) -> Completion {
        if ticket.generation != self.generation {
            tracing::debug!(
                ticket = ticket.generation,
                current = self.generation,
                kind = ?ticket.kind,
                "Discarding stale fetch result"
            );
            return Completion::Stale;
        }

        match (ticket.kind, result) {
            (FetchKind::Replace, Ok(rows)) => {
                self.rows = RowSet::from_rows(rows);
                self.state = FetchState::Idle;
                Completion::Replaced {
                    rows: self.rows.len(),
                }
            }
            (FetchKind::Refresh, Ok(rows)) => {
                let added = self.rows.merge(rows);
                self.new_count = 0;
                self.state = FetchState::Idle;
                Completion::Merged { added }
            }
            (FetchKind::Older, Ok(rows)) => {
                let added = self.rows.merge(rows);
                self.exhausted = added == 0;
                self.state = FetchState::Idle;
                Completion::Merged { added }
            }
            (FetchKind::Poll, Ok(rows)) => {
                self.new_count = self.rows.count_new(&rows);
                Completion::Polled {
                    new_count: self.new_count,
                }
            }
            (FetchKind::Poll, Err(e)) => {
                tracing::warn!(error = %e, "Poll for new rows failed");
                Completion::Failed(e)
            }
            (kind, Err(e)) => {
                tracing::warn!(kind = ?kind, error = %e, "Fetch failed");
                self.state = FetchState::Error(e.clone());
                Completion::Failed(e)
            }
        }
    }

    /// Execute a ticket's query with `client` and apply the result.
    pub async fn run<C: LogQueryClient + ?Sized>(
        &mut self,
        client: &C,
        ticket: FetchTicket,
        query: CompiledQuery,
    ) -> Completion {
        let result = client.execute(&query).await;
        self.complete(ticket, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Record;
    use crate::error::ErrorPayload;
    use crate::sql_compiler::QueryParams;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn row(id: Option<&str>, timestamp: i64, message: &str) -> ResultRow {
        ResultRow {
            id: id.map(str::to_string),
            timestamp,
            event_message: Some(message.to_string()),
            metadata: Value::Null,
            columns: Map::new(),
        }
    }

    fn query(sql: &str) -> CompiledQuery {
        CompiledQuery {
            sql: sql.to_string(),
            params: QueryParams {
                project: "proj".to_string(),
                timestamp_start: None,
                timestamp_end: None,
            },
        }
    }

    fn messages(manager: &IncrementalResultManager) -> Vec<String> {
        manager
            .rows()
            .into_iter()
            .filter_map(|r| r.event_message.clone())
            .collect()
    }

    #[test]
    fn test_rows_dedup_by_id_last_write_wins() {
        let mut set = RowSet::from_rows(vec![row(Some("a"), 1, "old")]);
        let added = set.merge(vec![row(Some("a"), 1, "new"), row(Some("b"), 2, "b")]);
        assert_eq!(added, 1);
        let sorted: Vec<_> = set.sorted().into_iter().map(|r| r.event_message.clone().unwrap()).collect();
        assert_eq!(sorted, vec!["b", "new"]);
    }

    #[test]
    fn test_rows_without_id_dedup_by_value() {
        let set = RowSet::from_rows(vec![
            row(None, 5, "same"),
            row(None, 5, "same"),
            row(None, 5, "other"),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.count_new(&[row(None, 5, "same"), row(None, 6, "fresh"), row(None, 6, "fresh")]), 1);
    }

    #[test]
    fn test_content_identity_ignores_key_order() {
        let a: ResultRow = serde_json::from_value(json!({
            "timestamp": 5,
            "event_message": "boot",
            "method": "GET",
            "metadata": {"level": "info", "region": "eu"}
        }))
        .unwrap();
        let b: ResultRow = serde_json::from_value(json!({
            "metadata": {"region": "eu", "level": "info"},
            "method": "GET",
            "event_message": "boot",
            "timestamp": 5
        }))
        .unwrap();

        assert_eq!(RowSet::from_rows(vec![a.clone()]).count_new(&[b.clone()]), 0);
        assert_eq!(RowSet::from_rows(vec![a, b]).len(), 1);
    }

    #[test]
    fn test_deserialized_rows_keep_extra_columns() {
        let row: ResultRow = serde_json::from_value(json!({
            "id": "x",
            "timestamp": 1_700_000_000_000_000i64,
            "event_message": "GET /",
            "method": "GET",
        }))
        .unwrap();
        assert_eq!(row.columns.get("method"), Some(&json!("GET")));
        assert_eq!(
            row.time().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }

    #[test]
    fn test_stale_replace_is_discarded() {
        let mut manager = IncrementalResultManager::new();
        let (ticket_a, _) = manager.begin_replace(query("A"));
        let (ticket_b, _) = manager.begin_replace(query("B"));

        assert_eq!(
            manager.complete(ticket_b, Ok(vec![row(Some("b"), 2, "from B")])),
            Completion::Replaced { rows: 1 }
        );
        assert_eq!(
            manager.complete(ticket_a, Ok(vec![row(Some("a"), 1, "from A")])),
            Completion::Stale
        );
        assert_eq!(messages(&manager), vec!["from B"]);
        assert_eq!(manager.query().map(|q| q.sql.as_str()), Some("B"));
        assert_eq!(manager.state(), &FetchState::Idle);
    }

    #[test]
    fn test_replace_drops_previous_rows() {
        let mut manager = IncrementalResultManager::new();
        let (t, _) = manager.begin_replace(query("A"));
        manager.complete(t, Ok(vec![row(Some("a"), 1, "a")]));
        let (t, _) = manager.begin_replace(query("B"));
        assert_eq!(manager.state(), &FetchState::Fetching);
        manager.complete(t, Ok(vec![row(Some("b"), 2, "b")]));
        assert_eq!(messages(&manager), vec!["b"]);
    }

    #[test]
    fn test_older_uses_oldest_timestamp_and_merges() {
        let mut manager = IncrementalResultManager::new();
        let (t, _) = manager.begin_replace(query("Q"));
        manager.complete(t, Ok(vec![row(Some("b"), 2_000_000, "b"), row(Some("c"), 3_000_000, "c")]));

        let (t, older) = manager.begin_older().unwrap();
        assert_eq!(manager.state(), &FetchState::FetchingOlder);
        assert_eq!(older.params.timestamp_end, DateTime::from_timestamp_micros(2_000_000));
        assert!(manager.begin_older().is_none());

        let done = manager.complete(t, Ok(vec![row(Some("b"), 2_000_000, "b"), row(Some("a"), 1_000_000, "a")]));
        assert_eq!(done, Completion::Merged { added: 1 });
        assert_eq!(messages(&manager), vec!["c", "b", "a"]);
        assert!(!manager.is_exhausted());

        let (t, _) = manager.begin_older().unwrap();
        manager.complete(t, Ok(vec![row(Some("a"), 1_000_000, "a")]));
        assert!(manager.is_exhausted());
        assert!(manager.begin_older().is_none());
    }

    #[test]
    fn test_filter_change_invalidates_older_and_poll() {
        let mut manager = IncrementalResultManager::new();
        let (t, _) = manager.begin_replace(query("Q"));
        manager.complete(t, Ok(vec![row(Some("a"), 10, "a")]));

        let (older, _) = manager.begin_older().unwrap();
        let (poll, _) = manager.begin_poll().unwrap();
        let (replace, _) = manager.begin_replace(query("R"));

        assert_eq!(manager.complete(older, Ok(vec![row(Some("z"), 1, "z")])), Completion::Stale);
        assert_eq!(manager.complete(poll, Ok(vec![row(Some("y"), 20, "y")])), Completion::Stale);
        manager.complete(replace, Ok(vec![row(Some("r"), 30, "r")]));
        assert_eq!(messages(&manager), vec!["r"]);
        assert_eq!(manager.new_count(), 0);
    }

    #[test]
    fn test_poll_counts_without_merging() {
        let mut manager = IncrementalResultManager::new();
        let (t, _) = manager.begin_replace(query("Q"));
        manager.complete(t, Ok(vec![row(Some("a"), 1, "a")]));

        let (poll, _) = manager.begin_poll().unwrap();
        let done = manager.complete(poll, Ok(vec![row(Some("b"), 2, "b"), row(Some("a"), 1, "a")]));
        assert_eq!(done, Completion::Polled { new_count: 1 });
        assert_eq!(manager.new_count(), 1);
        assert_eq!(messages(&manager), vec!["a"]);

        let (refresh, _) = manager.begin_refresh().unwrap();
        manager.complete(refresh, Ok(vec![row(Some("b"), 2, "b"), row(Some("a"), 1, "a")]));
        assert_eq!(manager.new_count(), 0);
        assert_eq!(messages(&manager), vec!["b", "a"]);
    }

    #[test]
    fn test_error_keeps_last_good_rows() {
        let mut manager = IncrementalResultManager::new();
        let (t, _) = manager.begin_replace(query("Q"));
        manager.complete(t, Ok(vec![row(Some("a"), 1, "a")]));

        let (t, _) = manager.begin_replace(query("bad"));
        let err = QueryError::Execution(ErrorPayload::new("syntax error"));
        assert_eq!(manager.complete(t, Err(err.clone())), Completion::Failed(err.clone()));
        assert_eq!(manager.state(), &FetchState::Error(err));
        assert_eq!(messages(&manager), vec!["a"]);
        assert!(manager.begin_older().is_none());
    }

    #[test]
    fn test_poll_failure_leaves_state() {
        let mut manager = IncrementalResultManager::new();
        let (t, _) = manager.begin_replace(query("Q"));
        manager.complete(t, Ok(vec![]));
        let (poll, _) = manager.begin_poll().unwrap();
        manager.complete(poll, Err(QueryError::Transport("timeout".into())));
        assert_eq!(manager.state(), &FetchState::Idle);
    }

    #[test]
    fn test_nothing_to_do_without_query() {
        let mut manager = IncrementalResultManager::new();
        assert!(manager.begin_refresh().is_none());
        assert!(manager.begin_older().is_none());
        assert!(manager.begin_poll().is_none());
    }

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<Vec<ResultRow>, QueryError>>>,
        seen: Mutex<Vec<CompiledQuery>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<Vec<ResultRow>, QueryError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LogQueryClient for ScriptedClient {
        async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Record>, QueryError> {
            self.seen.lock().unwrap().push(query.clone());
            let rows = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(QueryError::Transport("no scripted response".into())))?;
            Ok(rows
                .into_iter()
                .map(|row| match serde_json::to_value(row).unwrap() {
                    Value::Object(record) => record,
                    other => panic!("row serialized to {}", other),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_run_executes_and_applies() {
        let client = ScriptedClient::new(vec![
            Ok(vec![row(Some("b"), 2_000_000, "b")]),
            Ok(vec![row(Some("a"), 1_000_000, "a")]),
        ]);
        let mut manager = IncrementalResultManager::new();

        let (t, q) = manager.begin_replace(query("Q"));
        assert_eq!(manager.run(&client, t, q).await, Completion::Replaced { rows: 1 });

        let (t, q) = manager.begin_older().unwrap();
        assert_eq!(manager.run(&client, t, q).await, Completion::Merged { added: 1 });

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].params.timestamp_end, None);
        assert_eq!(seen[1].params.timestamp_end, DateTime::from_timestamp_micros(2_000_000));
        assert_eq!(messages(&manager), vec!["b", "a"]);
    }
}
