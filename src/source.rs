//! Log source tables known to the warehouse.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the fixed log schemas. Each table has a nested field layout that
/// only the default query synthesizer knows how to unnest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSourceTable {
    #[default]
    EdgeLogs,
    PostgresLogs,
    FunctionLogs,
    FunctionEdgeLogs,
}

impl LogSourceTable {
    pub const ALL: [LogSourceTable; 4] = [
        LogSourceTable::EdgeLogs,
        LogSourceTable::PostgresLogs,
        LogSourceTable::FunctionLogs,
        LogSourceTable::FunctionEdgeLogs,
    ];

    /// Table name as it appears in SQL.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSourceTable::EdgeLogs => "edge_logs",
            LogSourceTable::PostgresLogs => "postgres_logs",
            LogSourceTable::FunctionLogs => "function_logs",
            LogSourceTable::FunctionEdgeLogs => "function_edge_logs",
        }
    }
}

impl fmt::Display for LogSourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log source '{0}' (expected one of edge_logs, postgres_logs, function_logs, function_edge_logs)")]
pub struct UnknownSource(pub String);

impl FromStr for LogSourceTable {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogSourceTable::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_table_names() {
        for table in LogSourceTable::ALL {
            assert_eq!(table.as_str().parse::<LogSourceTable>().unwrap(), table);
        }
    }

    #[test]
    fn test_unknown_source_is_error() {
        let err = "auth_logs".parse::<LogSourceTable>().unwrap_err();
        assert_eq!(err, UnknownSource("auth_logs".to_string()));
    }

    #[test]
    fn test_serde_uses_table_names() {
        let json = serde_json::to_string(&LogSourceTable::FunctionEdgeLogs).unwrap();
        assert_eq!(json, r#""function_edge_logs""#);
        let table: LogSourceTable = serde_json::from_str(r#""postgres_logs""#).unwrap();
        assert_eq!(table, LogSourceTable::PostgresLogs);
    }
}
