//! Explorer shell commands.
//!
//! ```text
//! source <table>               switch log source (clears filters)
//! filter <dotted.key> <value>  set a filter leaf, e.g. `filter status_code.error true`
//! unset <dotted.key>           remove a filter leaf
//! clear                        remove all filters
//! search <text>                regex search on event_message (empty clears)
//! range <helper>               preset window, e.g. `range Last 24 hours`
//! range <start> <end>          custom window, `-` leaves a bound open
//! drill <end>                  drill down to an end time
//! drill <start> <end>          drill down to a window, `-` leaves a bound open
//! sql | count                  print the compiled query / count query
//! run | refresh | older        reload, merge newer rows, load the previous page
//! rows | status | help | quit
//! ```

use thiserror::Error;

use crate::filter::FilterValue;
use crate::source::{LogSourceTable, UnknownSource};
use crate::time_range::{parse_timestamp, HelperRange, InvalidTimestamp, TimeRange};

pub const HELP: &str = "\
commands:
  source <table>               edge_logs | postgres_logs | function_logs | function_edge_logs
  filter <dotted.key> <value>  set a filter, e.g. filter status_code.error true
  unset <dotted.key>           remove a filter
  clear                        remove all filters
  search <text>                regex search on event_message (no text clears it)
  range <helper>               Last hour | Last 3 hours | Last 24 hours | Last 3 days | Last 7 days
  range <start> <end>          custom range (RFC 3339 or YYYY-MM-DD, '-' for open)
  drill <end> | drill <start> <end>
  sql | count                  show the compiled query
  run | refresh | older        reload | merge newer rows | load older rows
  rows | status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Source(LogSourceTable),
    Filter { path: String, value: FilterValue },
    Unset(String),
    Clear,
    Search(String),
    Helper(HelperRange),
    Range(TimeRange),
    Drill(TimeRange),
    Sql,
    Count,
    Run,
    Refresh,
    Older,
    Rows,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}' (type `help`)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Source(#[from] UnknownSource),

    #[error(transparent)]
    Timestamp(#[from] InvalidTimestamp),
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "source" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("source <table>"));
            }
            Command::Source(rest.parse()?)
        }
        "filter" => {
            let (path, value) = rest
                .split_once(char::is_whitespace)
                .ok_or(CommandError::Usage("filter <dotted.key> <value>"))?;
            Command::Filter {
                path: path.to_string(),
                value: FilterValue::from_input(value),
            }
        }
        "unset" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("unset <dotted.key>"));
            }
            Command::Unset(rest.to_string())
        }
        "clear" => Command::Clear,
        "search" => Command::Search(rest.to_string()),
        "range" => parse_range(rest)?,
        "drill" => Command::Drill(parse_bounds(rest, "drill <end> | drill <start> <end>")?),
        "sql" => Command::Sql,
        "count" => Command::Count,
        "run" => Command::Run,
        "refresh" => Command::Refresh,
        "older" => Command::Older,
        "rows" => Command::Rows,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn parse_range(rest: &str) -> Result<Command, CommandError> {
    if let Ok(helper) = rest.parse::<HelperRange>() {
        return Ok(Command::Helper(helper));
    }
    const USAGE: &str = "range <helper> | range <start> <end>";
    if rest.split_whitespace().count() != 2 {
        return Err(CommandError::Usage(USAGE));
    }
    Ok(Command::Range(parse_bounds(rest, USAGE)?))
}

/// `<end>` or `<start> <end>`, with `-` for an open bound.
fn parse_bounds(rest: &str, usage: &'static str) -> Result<TimeRange, CommandError> {
    let bound = |raw: &str| -> Result<_, CommandError> {
        match raw {
            "-" => Ok(None),
            raw => Ok(Some(parse_timestamp(raw)?)),
        }
    };
    let parts: Vec<&str> = rest.split_whitespace().collect();
    match parts.as_slice() {
        [end] => Ok(TimeRange::new(None, bound(end)?)),
        [start, end] => Ok(TimeRange::new(bound(start)?, bound(end)?)),
        _ => Err(CommandError::Usage(usage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        parse_command(line).unwrap().unwrap()
    }

    #[test]
    fn test_blank_line() {
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn test_filter_command() {
        assert_eq!(
            parse("filter status_code.error true"),
            Command::Filter {
                path: "status_code.error".to_string(),
                value: FilterValue::Bool(true),
            }
        );
        assert_eq!(
            parse(r#"filter metadata.function_id "fn one""#),
            Command::Filter {
                path: "metadata.function_id".to_string(),
                value: FilterValue::Text("fn one".to_string()),
            }
        );
        assert_eq!(
            parse_command("filter status_code.error"),
            Err(CommandError::Usage("filter <dotted.key> <value>"))
        );
    }

    #[test]
    fn test_source_command() {
        assert_eq!(parse("source postgres_logs"), Command::Source(LogSourceTable::PostgresLogs));
        assert!(matches!(
            parse_command("source nope"),
            Err(CommandError::Source(_))
        ));
    }

    #[test]
    fn test_search_keeps_whole_text() {
        assert_eq!(parse("search connection reset"), Command::Search("connection reset".to_string()));
        assert_eq!(parse("search"), Command::Search(String::new()));
    }

    #[test]
    fn test_range_helper_and_custom() {
        assert_eq!(parse("range last 3 days"), Command::Helper(HelperRange::Last3Days));
        assert_eq!(
            parse("range 2024-01-01 2024-01-31"),
            Command::Range(TimeRange::between(
                parse_timestamp("2024-01-01").unwrap(),
                parse_timestamp("2024-01-31").unwrap(),
            ))
        );
        assert_eq!(
            parse("range - 2024-01-31"),
            Command::Range(TimeRange::new(None, parse_timestamp("2024-01-31").ok()))
        );
        assert!(parse_command("range 2024-01-01").is_err());
        assert!(matches!(
            parse_command("range soon later"),
            Err(CommandError::Timestamp(_))
        ));
    }

    #[test]
    fn test_drill_command() {
        assert_eq!(
            parse("drill 2024-01-05"),
            Command::Drill(TimeRange::new(None, parse_timestamp("2024-01-05").ok()))
        );
        assert_eq!(
            parse("drill 2024-01-02 -"),
            Command::Drill(TimeRange::new(parse_timestamp("2024-01-02").ok(), None))
        );
    }

    #[test]
    fn test_simple_commands_and_unknown() {
        assert_eq!(parse("RUN"), Command::Run);
        assert_eq!(parse("older"), Command::Older);
        assert_eq!(parse("exit"), Command::Quit);
        assert_eq!(
            parse_command("explode"),
            Err(CommandError::Unknown("explode".to_string()))
        );
    }
}
