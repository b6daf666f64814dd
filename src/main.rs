//! pglogs - ranks the slowest queries in PostgreSQL logs.
//!
//! With no command, reads log text from stdin (or `--log` files), prints the
//! report and posts it to Slack when a token is configured. `download` copies
//! finished log files from Amazon RDS into the working directory.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use pglogs::fetch::{download_logs, Download, RdsLogStore};
use pglogs::notify::SlackNotifier;
use pglogs::{aggregate_reader, build_rows, deliver, render, Command, Error, QueryAggregator};

/// Slowest-query report for PostgreSQL logs.
#[derive(Parser)]
#[command(name = "pglogs", about = "Slowest-query report for PostgreSQL logs", version)]
struct Args {
    /// Command to run: omit to parse logs, or `download` to fetch them from RDS.
    command: Option<String>,

    /// Log files to parse instead of stdin. May be repeated.
    #[arg(short, long = "log", value_name = "PATH")]
    logs: Vec<PathBuf>,

    /// Number of queries in the report.
    #[arg(long, default_value_t = pglogs::DEFAULT_LIMIT)]
    limit: usize,

    /// Slack bot token. The report is only posted when this is set.
    #[arg(long, env = "SLACK_TOKEN", hide_env_values = true)]
    slack_token: Option<String>,

    /// Slack channel to post the report to.
    #[arg(long, env = "SLACK_CHANNEL")]
    slack_channel: Option<String>,

    /// RDS instance whose logs `download` fetches.
    #[arg(long, env = "AWS_DB_INSTANCE_IDENTIFIER")]
    db_instance: Option<String>,

    /// Directory downloaded logs are written under.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber on stderr so stdout carries only the report.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("pglogs={level}").parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn report(args: &Args) -> Result<(), Error> {
    let mut aggregator = QueryAggregator::new();
    let recorded = if args.logs.is_empty() {
        aggregate_reader(io::stdin().lock(), &mut aggregator)?
    } else {
        let mut recorded = 0;
        for path in &args.logs {
            let file = File::open(path)?;
            recorded += aggregate_reader(BufReader::new(file), &mut aggregator)?;
        }
        recorded
    };
    info!(
        statements = recorded,
        shapes = aggregator.len(),
        "aggregated slow statements"
    );

    let message = render(&build_rows(&aggregator, args.limit));
    println!("{message}");

    if let Some(token) = &args.slack_token {
        match &args.slack_channel {
            Some(channel) => {
                if deliver(&SlackNotifier::new(token.as_str()), channel, &message) {
                    info!(channel = %channel, "report posted to Slack");
                }
            }
            None => warn!("SLACK_TOKEN is set but SLACK_CHANNEL is not; report not posted"),
        }
    }
    Ok(())
}

fn download(args: &Args) -> Result<(), Error> {
    let db_instance = args
        .db_instance
        .as_deref()
        .ok_or(Error::MissingConfig("AWS_DB_INSTANCE_IDENTIFIER"))?;
    let store = RdsLogStore::from_env(db_instance)?;

    for outcome in download_logs(&store, &args.output_dir, Utc::now())? {
        match outcome {
            Download::Downloaded(path) => println!("DOWNLOADED {}", path.display()),
            Download::Exists(path) => println!("EXISTS {}", path.display()),
            Download::Active(_) => {}
        }
    }
    Ok(())
}

fn run(args: &Args) -> Result<(), Error> {
    match Command::from_arg(args.command.as_deref())? {
        Command::Report => report(args),
        Command::Download => download(args),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
