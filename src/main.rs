use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use logs_explorer::client::{HttpLogClient, LogQueryClient};
use logs_explorer::command::{parse_command, Command, HELP};
use logs_explorer::config::{ExplorerConfig, DEFAULT_CONFIG_FILE};
use logs_explorer::results::{Completion, FetchKind, FetchState, FetchTicket, ResultRow};
use logs_explorer::session::ExplorerSession;
use logs_explorer::sql_compiler::iso_timestamp;
use logs_explorer::time_range::TimeRange;
use logs_explorer::{CompiledQuery, LogSourceTable, QueryError};

const ENV_LOG: &str = "LOGS_EXPLORER_LOG";
const PROMPT: &str = "logs> ";
const MAX_PRINTED_ROWS: usize = 50;

/// Explore structured event logs with declarative filters.
#[derive(Parser, Debug)]
#[command(name = "logs-explorer", version, about, long_about = None)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log query endpoint.
    #[arg(long, env = "LOGS_EXPLORER_ENDPOINT")]
    endpoint: Option<String>,

    /// Project whose logs are queried.
    #[arg(long, env = "LOGS_EXPLORER_PROJECT")]
    project: Option<String>,

    /// Bearer token for the endpoint.
    #[arg(long, env = "LOGS_EXPLORER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log source selected at startup.
    #[arg(long)]
    source: Option<LogSourceTable>,

    /// Seconds between polls for new rows (0 disables polling).
    #[arg(long)]
    poll_interval: Option<u64>,
}

impl Cli {
    fn apply(self, config: &mut ExplorerConfig) {
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(project) = self.project {
            config.project = project;
        }
        if self.api_key.is_some() {
            config.api_key = self.api_key;
        }
        if let Some(source) = self.source {
            config.source = source;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
    }
}

type FetchResult = (FetchTicket, Result<Vec<ResultRow>, QueryError>);

fn init_logging() {
    let filter = std::env::var(ENV_LOG)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn,logs_explorer=info".to_string());

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .with_env_filter(filter)
        .init();
}

/// Read lines on a dedicated thread. The next prompt is shown only after the
/// shell acknowledges the previous line, so output never lands after it.
fn spawn_reader(
    lines: mpsc::UnboundedSender<Result<String, ReadlineError>>,
    ack: std::sync::mpsc::Receiver<()>,
) {
    std::thread::spawn(move || {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = lines.send(Err(e));
                return;
            }
        };
        loop {
            let line = editor.readline(PROMPT);
            if let Ok(text) = &line {
                let _ = editor.add_history_entry(text.as_str());
            }
            let finished = line.is_err();
            if lines.send(line).is_err() || finished || ack.recv().is_err() {
                return;
            }
        }
    });
}

fn poll_ticker(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

struct Shell {
    session: ExplorerSession,
    client: Arc<dyn LogQueryClient>,
    results: mpsc::UnboundedSender<FetchResult>,
    counts: mpsc::UnboundedSender<Result<u64, QueryError>>,
}

impl Shell {
    /// Run a fetch in the background; its result comes back through the
    /// results channel and is applied by the shell loop.
    fn dispatch(&self, fetch: (FetchTicket, CompiledQuery)) {
        let (ticket, query) = fetch;
        let client = Arc::clone(&self.client);
        let results = self.results.clone();
        tokio::spawn(async move {
            let result = client.execute(&query).await;
            let _ = results.send((ticket, result));
        });
    }

    fn reload(&mut self) {
        let fetch = self.session.reload(Utc::now());
        self.dispatch(fetch);
    }

    fn on_result(&mut self, (ticket, result): FetchResult) {
        match self.session.complete(ticket, result) {
            Completion::Replaced { rows } => {
                println!("{} rows", rows);
                self.print_rows();
            }
            Completion::Merged { added } => {
                println!("{} new rows ({} total)", added, self.session.results().row_set().len());
                if ticket.kind() == FetchKind::Older && self.session.results().is_exhausted() {
                    println!("no older rows");
                }
            }
            Completion::Polled { new_count } if new_count > 0 => {
                println!("{} new results, `refresh` to load them", new_count);
            }
            Completion::Polled { .. } | Completion::Stale => {}
            Completion::Failed(e) => println!("error: {}", e.user_message()),
        }
    }

    fn on_tick(&self) {
        if let Some(fetch) = self.session.poll() {
            self.dispatch(fetch);
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Source(source) => {
                self.session.set_source(source);
                self.reload();
            }
            Command::Filter { path, value } => {
                self.session.set_filter(&path, value);
                self.reload();
            }
            Command::Unset(path) => {
                if self.session.unset_filter(&path) {
                    self.reload();
                } else {
                    println!("no filter at {}", path);
                }
            }
            Command::Clear => {
                self.session.clear_filters();
                self.reload();
            }
            Command::Search(text) => {
                self.session.set_search(&text);
                self.reload();
            }
            Command::Helper(helper) => {
                self.session.select_helper(helper);
                self.reload();
            }
            Command::Range(range) => {
                self.session.set_custom_range(range);
                self.reload();
            }
            Command::Drill(requested) => {
                let range = self.session.drill_down(&requested, Utc::now());
                println!("range {}", describe_range(&range));
                self.reload();
            }
            Command::Sql => print_query(&self.session.compile(Utc::now())),
            Command::Count => self.count(),
            Command::Run => self.reload(),
            Command::Refresh => match self.session.refresh() {
                Some(fetch) => self.dispatch(fetch),
                None => println!("nothing to refresh yet"),
            },
            Command::Older => match self.session.load_older() {
                Some(fetch) => self.dispatch(fetch),
                None => println!("cannot load older rows now"),
            },
            Command::Rows => self.print_rows(),
            Command::Status => self.print_status(),
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
    }

    /// Counts are not tied to the row set, so they bypass the result manager.
    fn count(&self) {
        let query = self.session.compile_count(Utc::now());
        let client = Arc::clone(&self.client);
        let counts = self.counts.clone();
        tokio::spawn(async move {
            let _ = counts.send(client.count(&query).await);
        });
    }

    fn on_count(&self, result: Result<u64, QueryError>) {
        match result {
            Ok(count) => println!("count: {}", count),
            Err(e) => println!("error: {}", e.user_message()),
        }
    }

    fn print_rows(&self) {
        let rows = self.session.rows();
        for row in rows.iter().take(MAX_PRINTED_ROWS) {
            let time = row
                .time()
                .map(iso_timestamp)
                .unwrap_or_else(|| row.timestamp.to_string());
            println!("{}  {}", time, row.event_message.as_deref().unwrap_or(""));
        }
        if rows.len() > MAX_PRINTED_ROWS {
            println!("... {} more", rows.len() - MAX_PRINTED_ROWS);
        }
    }

    fn print_status(&self) {
        let results = self.session.results();
        let selection = self.session.time_selection();
        let window = match selection.active_helper() {
            Some(helper) => helper.to_string(),
            None => describe_range(&selection.custom_range()),
        };
        let state = match results.state() {
            FetchState::Idle => "idle".to_string(),
            FetchState::Fetching => "fetching".to_string(),
            FetchState::FetchingOlder => "fetching older".to_string(),
            FetchState::Error(e) => format!("error: {}", e.user_message()),
        };
        let filters = serde_json::to_string(self.session.filters()).unwrap_or_default();

        println!("source:  {}", self.session.source());
        println!("filters: {}", filters);
        println!("range:   {}", window);
        println!("state:   {}", state);
        println!("rows:    {} ({} new)", results.row_set().len(), results.new_count());
    }
}

fn describe_range(range: &TimeRange) -> String {
    let bound = |ts: Option<DateTime<Utc>>| ts.map(iso_timestamp).unwrap_or_else(|| "-".to_string());
    format!("{} .. {}", bound(range.start), bound(range.end))
}

fn print_query(query: &CompiledQuery) {
    println!("{}", query.sql);
    match serde_json::to_string_pretty(&query.params) {
        Ok(params) => println!("{}", params),
        Err(e) => tracing::warn!(error = %e, "Failed to render query params"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = ExplorerConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;
    cli.apply(&mut config);

    let client = HttpLogClient::new(config.endpoint.clone(), config.api_key.clone())
        .context("Failed to build log query client")?;
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    let (counts_tx, mut counts_rx) = mpsc::unbounded_channel();
    let mut shell = Shell {
        session: ExplorerSession::from_config(&config),
        client: Arc::new(client),
        results: results_tx,
        counts: counts_tx,
    };

    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel();
    let (ack_tx, ack_rx) = std::sync::mpsc::channel();
    spawn_reader(lines_tx, ack_rx);
    let mut ticker = poll_ticker(config.poll_interval_secs);

    println!(
        "{} on {} ({}), type `help` for commands",
        config.project, config.endpoint, config.source
    );
    shell.reload();

    loop {
        tokio::select! {
            line = lines_rx.recv() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(ReadlineError::Interrupted | ReadlineError::Eof)) | None => break,
                    Some(Err(e)) => return Err(e).context("Failed to read input"),
                };
                match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => shell.execute(command),
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
                if ack_tx.send(()).is_err() {
                    break;
                }
            }
            Some(done) = results_rx.recv() => shell.on_result(done),
            Some(count) = counts_rx.recv() => shell.on_count(count),
            _ = next_tick(&mut ticker) => shell.on_tick(),
        }
    }

    Ok(())
}
