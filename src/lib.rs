#![allow(clippy::doc_markdown)]
//! A library for finding the slowest queries in PostgreSQL server logs.
//!
//! PostgreSQL logs every statement that runs longer than
//! `log_min_duration_statement` as a `duration: ... ms  statement: ...` entry.
//! This library reassembles those multi-line entries, normalises each
//! statement by replacing literal values with placeholders, and totals the
//! durations per query shape so the most expensive shapes can be ranked.
//!
//! # Features
//!
//! - Stream PostgreSQL log text line by line
//! - Group statements that differ only in their literal values
//! - Rank query shapes by total time and render a plain-text report
//! - Download log files from Amazon RDS (`download` feature)
//! - Post the report to Slack (`slack` feature)
//!
//! # Examples
//!
//! ## Ranking the queries in a log
//!
//! ```
//! use pglogs::{aggregate_reader, build_rows, QueryAggregator};
//! use std::io::BufReader;
//!
//! let log = b"2024-01-01 10:00:00 UTC:app@db:[1]:LOG:  duration: 14.230 ms  statement: SELECT * FROM a WHERE x = 1
//! 2024-01-01 10:00:01 UTC:app@db:[1]:LOG:  duration: 30.770 ms  statement: SELECT * FROM a WHERE x = 2
//! ";
//!
//! let mut aggregator = QueryAggregator::new();
//! aggregate_reader(BufReader::new(&log[..]), &mut aggregator).unwrap();
//!
//! let rows = build_rows(&aggregator, 20);
//! assert_eq!(rows[0].query, "SELECT * FROM a WHERE x = ?");
//! assert_eq!(rows[0].count, 2);
//! assert_eq!(rows[0].average_ms, 22);
//! ```
//!
//! ## Processing each slow statement
//!
//! ```no_run
//! use pglogs::process_log_file;
//!
//! process_log_file("postgresql.log", |query| {
//!     println!("{:.3} ms  {}", query.duration_ms, query.key);
//! }).unwrap();
//! ```
//!
//! # Query Normalisation
//!
//! | Original | Normalised |
//! |----------|------------|
//! | `SELECT * FROM users WHERE id = 123` | `SELECT * FROM users WHERE id = ?` |
//! | `select * from users where id in (1, 2, 3)` | `SELECT * FROM users WHERE id IN (?)` |
//! | `UPDATE users SET name = 'John' /* web */` | `UPDATE users SET name = ?` |

mod aggregate;
mod helpers;
pub mod fetch;
pub mod notify;
mod report;
mod sql;

pub use aggregate::{Bucket, QueryAggregator};
pub use notify::Notifier;
pub use report::{build_rows, render, ReportRow, DEFAULT_LIMIT, QUERY_WIDTH};
pub use sql::{Normalizer, PostgresNormalizer};

use sqlparser::parser::ParserError;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::{debug, trace, warn};

/// A slow statement pulled out of a log entry, before normalisation.
///
/// # Fields
///
/// * `duration_ms` - Execution time reported by the server, in milliseconds
/// * `statement` - Statement text as logged, possibly spanning several lines
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub duration_ms: f64,
    pub statement: String,
}

/// A slow statement that was successfully normalised.
///
/// # Fields
///
/// * `key` - Canonical query with literal values replaced by `?`
/// * `sample` - Statement with its trailing comment removed and whitespace squished
/// * `fingerprint` - SHA1 hash of `key`
/// * `duration_ms` - Execution time in milliseconds
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub key: String,
    pub sample: String,
    pub fingerprint: String,
    pub duration_ms: f64,
}

/// Error type for query normalisation.
///
/// A statement that fails here is skipped; it never stops a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Failed to parse the SQL query.
    ///
    /// Contains the error message from the SQL parser.
    ParseError(String),

    /// The input contained no valid SQL statements.
    InvalidQuery,
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseError(msg) => write!(f, "Failed to parse query: {msg}"),
            Self::InvalidQuery => write!(f, "No valid SQL statement found"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<ParserError> for QueryError {
    fn from(err: ParserError) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// Errors that end a run.
#[derive(Debug)]
pub enum Error {
    /// Reading logs or writing downloaded files failed.
    Io(io::Error),

    /// The command argument was not recognised.
    UnknownCommand(String),

    /// A setting required by the chosen command was not provided.
    MissingConfig(&'static str),

    /// The remote log store returned an error.
    Fetch(Box<dyn std::error::Error + Send + Sync>),

    /// The report could not be delivered.
    Notify(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::UnknownCommand(cmd) => write!(f, "Unknown command: {cmd}"),
            Self::MissingConfig(name) => write!(f, "Missing configuration: {name}"),
            Self::Fetch(err) => write!(f, "Failed to fetch logs: {err}"),
            Self::Notify(err) => write!(f, "Failed to send notification: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Fetch(err) | Self::Notify(err) => Some(err.as_ref()),
            Self::UnknownCommand(_) | Self::MissingConfig(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// What a run should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Parse log text and report the slowest queries.
    Report,
    /// Fetch remote log files.
    Download,
}

impl Command {
    /// Maps the optional command argument to a [`Command`].
    ///
    /// No argument means [`Command::Report`].
    pub fn from_arg(arg: Option<&str>) -> Result<Self, Error> {
        match arg {
            None => Ok(Self::Report),
            Some("download") => Ok(Self::Download),
            Some(other) => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

/// Splits a stream of lines into log entries.
///
/// A line containing `":  "` starts a new entry. Continuation lines (the rest
/// of a multi-line statement) are appended to the current one with their line
/// breaks. The last entry is yielded when the lines run out, so input without
/// any marker still produces exactly one entry.
pub struct Entries<I> {
    lines: I,
    active: String,
    done: bool,
}

impl<I> Entries<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    #[must_use]
    pub fn new(lines: I) -> Self {
        Self {
            lines,
            active: String::new(),
            done: false,
        }
    }
}

impl<I> Iterator for Entries<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    let finished = (helpers::is_entry_start(&line) && !self.active.is_empty())
                        .then(|| std::mem::take(&mut self.active));
                    self.active.push_str(&line);
                    self.active.push('\n');
                    if finished.is_some() {
                        return finished.map(Ok);
                    }
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    return Some(Ok(std::mem::take(&mut self.active)));
                }
            }
        }
    }
}

/// Extracts the duration and statement from one log entry.
///
/// Returns `None` for entries that are not slow-statement entries
/// (connections, checkpoints, autovacuum and the like).
#[must_use]
pub fn match_record(entry: &str) -> Option<ParsedRecord> {
    helpers::match_entry(entry).map(|(duration_ms, statement)| ParsedRecord {
        duration_ms,
        statement: statement.to_string(),
    })
}

/// Parses and normalises one log entry.
///
/// Returns `None` when the entry has no slow statement or when the statement
/// cannot be normalised.
#[must_use]
pub fn parse_entry<N: Normalizer + ?Sized>(entry: &str, normalizer: &N) -> Option<ParsedQuery> {
    let Some(record) = match_record(entry) else {
        trace!(len = entry.len(), "entry has no duration/statement");
        return None;
    };
    match sql::canonicalize(&record.statement, normalizer) {
        Ok((key, sample)) => {
            let fingerprint = sql::fingerprint_query(&key);
            debug!(%fingerprint, duration_ms = record.duration_ms, "parsed slow statement");
            Some(ParsedQuery {
                key,
                sample,
                fingerprint,
                duration_ms: record.duration_ms,
            })
        }
        Err(e) => {
            debug!(error = %e, "skipping statement that could not be normalised");
            None
        }
    }
}

/// Processes a PostgreSQL log file.
///
/// Calls `query_callback` for every slow statement that normalises
/// successfully.
///
/// # Examples
///
/// ```no_run
/// use pglogs::process_log_file;
/// use std::collections::HashMap;
///
/// let mut totals: HashMap<String, f64> = HashMap::new();
/// process_log_file("logs/postgresql.log.2024-01-01-10", |query| {
///     *totals.entry(query.key).or_default() += query.duration_ms;
/// }).unwrap();
/// ```
pub fn process_log_file<P, Q>(path: P, query_callback: Q) -> io::Result<()>
where
    P: AsRef<Path>,
    Q: FnMut(ParsedQuery),
{
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    process_log_reader(reader, query_callback)
}

/// Processes log text from any `BufRead` source with the PostgreSQL
/// normaliser.
///
/// ## Reading from stdin
///
/// ```no_run
/// use pglogs::process_log_reader;
/// use std::io;
///
/// process_log_reader(io::stdin().lock(), |query| {
///     println!("{}", query.fingerprint);
/// }).unwrap();
/// ```
///
/// ## Reading from a byte slice
///
/// ```
/// use pglogs::process_log_reader;
/// use std::io::BufReader;
///
/// let data = b"2024-01-01 00:00:00 UTC::@:[7]:LOG:  duration: 1500.000 ms  statement: SELECT * FROM users
///     WHERE id = 1";
///
/// process_log_reader(BufReader::new(&data[..]), |query| {
///     assert_eq!(query.key, "SELECT * FROM users WHERE id = ?");
///     assert_eq!(query.duration_ms, 1500.0);
/// }).unwrap();
/// ```
pub fn process_log_reader<R: BufRead, Q: FnMut(ParsedQuery)>(
    reader: R,
    query_callback: Q,
) -> io::Result<()> {
    process_log_reader_with(reader, &PostgresNormalizer, query_callback)
}

/// Like [`process_log_reader`], with a caller-supplied [`Normalizer`].
pub fn process_log_reader_with<R, N, Q>(
    reader: R,
    normalizer: &N,
    mut query_callback: Q,
) -> io::Result<()>
where
    R: BufRead,
    N: Normalizer + ?Sized,
    Q: FnMut(ParsedQuery),
{
    for entry in Entries::new(helpers::LossyLines::new(reader)) {
        if let Some(query) = parse_entry(&entry?, normalizer) {
            query_callback(query);
        }
    }
    Ok(())
}

/// Feeds every slow statement in `reader` into `aggregator`.
///
/// Returns the number of statements recorded.
pub fn aggregate_reader<R: BufRead>(
    reader: R,
    aggregator: &mut QueryAggregator,
) -> io::Result<usize> {
    let mut recorded = 0;
    process_log_reader(reader, |query| {
        aggregator.record_query(&query);
        recorded += 1;
    })?;
    Ok(recorded)
}

/// Sends `text` to `channel`, logging instead of failing when delivery does
/// not work.
///
/// Returns whether the message was delivered.
pub fn deliver<N: Notifier + ?Sized>(notifier: &N, channel: &str, text: &str) -> bool {
    match notifier.send_message(channel, text) {
        Ok(()) => true,
        Err(e) => {
            warn!(channel, error = %e, "report was not delivered");
            false
        }
    }
}
