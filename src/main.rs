//! # Case Fetcher Command-Line Driver
//!
//! ## Purpose
//! Entry point for batch case downloads. Parses command-line arguments, loads
//! configuration, checks the API credential, and runs the download pipeline,
//! relaying its progress events to the log.
//!
//! ## Input/Output Specification
//! - **Input**: Keywords, output directory, optional court and date filters
//! - **Output**: Case artifacts under the output directory, a summary line
//! - **Credential**: `COURTLISTENER_TOKEN` must be set in the environment

use chrono::NaiveDate;
use clap::{Arg, ArgAction, Command};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use caselaw_fetch::{
    ApiTransport, CaseOutcome, Config, DownloadPipeline, FetchError, PersistenceGate,
    ProgressEvent, Result, SearchFilters,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("caselaw-fetch")
        .version("0.1.0")
        .author("Legal Search Team")
        .about("Download court cases by keyword from the CourtListener REST API")
        .arg(
            Arg::new("keywords")
                .help("Keywords to search for, processed in order")
                .required(true)
                .num_args(1..),
        )
        .arg(
            Arg::new("out-dir")
                .short('o')
                .long("out-dir")
                .value_name("DIR")
                .help("Directory case artifacts are written to")
                .default_value("cases"),
        )
        .arg(
            Arg::new("court")
                .long("court")
                .value_name("COURT")
                .help("Court identifier filter, repeatable (e.g. colo, coloctapp)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("filed-after")
                .long("filed-after")
                .value_name("YYYY-MM-DD")
                .help("Only cases filed on or after this date"),
        )
        .arg(
            Arg::new("filed-before")
                .long("filed-before")
                .value_name("YYYY-MM-DD")
                .help("Only cases filed on or before this date"),
        )
        .arg(
            Arg::new("require-keyword-match")
                .long("require-keyword-match")
                .help("Drop results whose case name does not contain the keyword")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("caselaw-fetch.toml"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = Config::from_file(config_path)?;
    init_logging(&config);

    if config.api.token.is_empty() {
        error!("COURTLISTENER_TOKEN is not set");
        std::process::exit(1);
    }

    let keywords: Vec<String> = matches
        .get_many::<String>("keywords")
        .unwrap()
        .cloned()
        .collect();
    let filters = SearchFilters {
        courts: matches
            .get_many::<String>("court")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        filed_after: parse_date(matches.get_one::<String>("filed-after"))?,
        filed_before: parse_date(matches.get_one::<String>("filed-before"))?,
    };
    let out_dir = matches.get_one::<String>("out-dir").unwrap();

    let transport = ApiTransport::new(&config)?;
    let gate = PersistenceGate::new(out_dir).await?;

    let (events, mut progress) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            report(event);
        }
    });

    let pipeline = DownloadPipeline::new(&transport, gate, &config)
        .with_events(events)
        .with_keyword_match(matches.get_flag("require-keyword-match"));
    let result = pipeline.run(&keywords, &filters).await;
    drop(pipeline);
    let _ = printer.await;

    result.map(|_| ())
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Parse an optional YYYY-MM-DD argument
fn parse_date(value: Option<&String>) -> Result<Option<NaiveDate>> {
    value
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| FetchError::Config {
                message: format!("invalid date '{}': {}", raw, e),
            })
        })
        .transpose()
}

/// Render one pipeline progress event to the log
fn report(event: ProgressEvent) {
    match event {
        ProgressEvent::KeywordStarted { keyword } => {
            info!("searching cases for '{}'", keyword);
        }
        ProgressEvent::CaseFinished {
            name,
            identifier,
            outcome,
        } => match outcome {
            CaseOutcome::Downloaded => info!("downloaded '{}' (ID: {})", name, identifier),
            CaseOutcome::Skipped => info!("'{}' (ID: {}) already exists, skipping", name, identifier),
            CaseOutcome::Failed { reason } => {
                warn!("failed '{}' (ID: {}): {}", name, identifier, reason);
            }
        },
        ProgressEvent::RunFinished { summary } => {
            info!(
                "completed: {} cases ({} downloaded, {} skipped, {} failed) | API calls: {} | bytes: {} | request time: {:.2}s",
                summary.cases_seen,
                summary.downloaded,
                summary.skipped,
                summary.failed,
                summary.api_calls,
                summary.total_bytes,
                summary.request_time.as_secs_f64(),
            );
        }
    }
}
