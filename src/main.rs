//! CLI entry point for `mbox2couch`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use mbox2couch::config::{self, Config};
use mbox2couch::error::MigrateError;
use mbox2couch::ingest::{self, IngestEvent, IngestOptions, Outcome};
use mbox2couch::store::couchdb::CouchDb;
use mbox2couch::store::memory::MemoryStore;
use mbox2couch::store::DocumentStore;

/// Migrate an MBOX archive into a CouchDB database.
///
/// Every message becomes one document keyed by its Message-ID (or a content
/// hash), with the raw message attached. Re-running is safe: messages already
/// in the database are reported as conflicts and left untouched.
#[derive(Parser)]
#[command(name = "mbox2couch", version, about)]
struct Cli {
    /// MBOX file to migrate
    #[arg(value_name = "MBOX_FILE")]
    mbox: PathBuf,

    /// TOML configuration file with the [couchdb] connection
    #[arg(value_name = "CONFIG_FILE", env = "MBOX2COUCH_CONFIG")]
    config: PathBuf,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Parse and map every message into memory; write nothing
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Help and version go to stdout and are not failures
            return if e.use_stderr() {
                ExitCode::from(Outcome::Critical.code())
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Configuration comes first: a bad config must not touch the mailbox
    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            println!("Error: {e}");
            return ExitCode::from(Outcome::Critical.code());
        }
    };

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match run(&cli, &config) {
        Ok(outcome) => ExitCode::from(outcome.code()),
        Err(e) => {
            println!("Error: {e}");
            ExitCode::from(Outcome::Critical.code())
        }
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = config::log_file_path(&config.general);
    let log_parts = log_path.parent().zip(log_path.file_name());
    if let Some((log_dir, file_name)) = log_parts.filter(|(dir, _)| std::fs::create_dir_all(dir).is_ok()) {
        let file_appender = tracing_appender::rolling::never(log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Connect, ingest, and print the run summary.
///
/// Setup failures come back as `Err`; a failure inside the loop is printed
/// here and turned into [`Outcome::Critical`].
fn run(cli: &Cli, config: &Config) -> anyhow::Result<Outcome> {
    if !cli.mbox.is_file() {
        return Err(MigrateError::FileNotFound(cli.mbox.clone()).into());
    }

    let mut store: Box<dyn DocumentStore> = if cli.dry_run {
        tracing::info!(db = %config.couchdb.db_name, "Dry run, documents are kept in memory");
        Box::new(MemoryStore::new(config.couchdb.db_name.clone()))
    } else {
        Box::new(CouchDb::connect(&config.couchdb)?)
    };

    let options = IngestOptions::from(&config.ingest);
    let pb = progress_bar(&cli.mbox);
    let start = Instant::now();

    let report = ingest::ingest(
        &cli.mbox,
        store.as_mut(),
        &options,
        Some(&|current, total| {
            pb.set_length(total);
            pb.set_position(current);
        }),
        &mut |event| match event {
            IngestEvent::Conflict { id } => {
                pb.suspend(|| println!("Message-ID already in database: {id}"));
            }
            IngestEvent::Failed { offset, error } => {
                pb.suspend(|| println!("Skipped message at offset {offset}: {error}"));
            }
            IngestEvent::Added { .. } => {}
        },
    )?;
    pb.finish_and_clear();

    tracing::info!(elapsed = ?start.elapsed(), "Run complete");

    if let Some(error) = &report.error {
        println!("{} error in main processing loop", error.kind());
        println!("{error}");
    }
    println!("Added {} messages to {}", report.added, store.name());
    if report.failed > 0 {
        println!("Skipped {} messages after errors", report.failed);
    }

    Ok(report.outcome)
}

/// Byte-based progress bar over the mailbox file.
fn progress_bar(path: &Path) -> ProgressBar {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let pb = ProgressBar::new(size);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} Migrating [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}
