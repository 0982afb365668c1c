//! Cohort MPC - federated cohort statistics over secure aggregation
//!
//! Each party extracts its own records from a FHIR extraction service,
//! bins them into fixed buckets, and sums the buckets with every other
//! party through additive secret sharing. Small sums are suppressed.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Any error (input, extraction, aggregation)
//!   3 - The analysis is not implemented yet (extracted table printed)

mod aggregate;
mod bucket;
mod cli;
mod config;
mod dispatch;
mod error;
mod extract;
mod models;
mod observer;
mod report;
mod topology;

use aggregate::TcpAggregator;
use anyhow::{Context, Result};
use chrono::Datelike;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use dispatch::{Dispatcher, Outcome, RunSettings};
use extract::FhirClient;
use observer::{ConsoleObserver, ProgressObserver, SilentObserver};
use std::path::Path;
use topology::Topology;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Exit code for analyses that stop after extraction.
const EXIT_NOT_IMPLEMENTED: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&args, &config)?;

    info!("cohort-mpc v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    debug!("Configuration: {:?}", config);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .cohort-mpc.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set the FHIR server, k threshold, and timeouts.");
    Ok(())
}

/// Initialize logging on stderr; stdout carries only the report.
/// `RUST_LOG` overrides the level chosen by flags and config.
fn init_logging(args: &Args, config: &Config) -> Result<()> {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

/// Load configuration from file or use defaults, then apply CLI overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match args.config {
        Some(ref config_path) => Config::load(config_path)?,
        None => Config::load_default()?.unwrap_or_default(),
    };
    config.merge_with_args(args);
    Ok(config)
}

/// Run the requested analysis. Returns the exit code (0 or 3).
async fn run(args: Args, config: Config) -> Result<i32> {
    let roster = args.parties.as_deref().context("--parties is required")?;
    let local_id = args.id.context("--id is required")?;
    let topology = Topology::parse(roster, local_id).context("Invalid party roster")?;
    let request = args
        .analysis_request()
        .context("Invalid analysis arguments")?;

    info!(
        "Party {} ({}) of {} parties, k = {}",
        topology.local_id(),
        topology.local(),
        topology.len(),
        config.aggregation.k_threshold
    );

    for (position, party) in topology.parties().iter().enumerate() {
        debug!("Roster position {}: party {}", position, party);
    }

    let settings = RunSettings {
        k_threshold: config.aggregation.k_threshold,
        reference_year: chrono::Local::now().year(),
        parties: topology.len(),
    };
    let source = FhirClient::new(config.fhir_settings()).context("Failed to create FHIR client")?;
    let aggregator = TcpAggregator::new(topology, config.aggregation_settings())
        .context("Refusing to start aggregation")?;
    let observer: Box<dyn ProgressObserver> = if args.quiet {
        Box::new(SilentObserver)
    } else {
        Box::new(ConsoleObserver::new())
    };

    let mut dispatcher = Dispatcher::new(source, aggregator, observer, settings);
    let outcome = dispatcher
        .route(&request)
        .await
        .with_context(|| format!("{} analysis failed", request.kind()))?;
    drop(dispatcher);

    if let Outcome::Unimplemented { kind, ref table } = outcome {
        print!("{}", report::generator::generate_unimplemented_notice(kind, table));
        eprintln!(
            "\n⛔ {} analysis is not implemented yet (exit code {}).",
            kind, EXIT_NOT_IMPLEMENTED
        );
        return Ok(EXIT_NOT_IMPLEMENTED);
    }

    let report = outcome.into_report()?;
    let output = match config.general.format {
        OutputFormat::Text => report::generate_text_report(&report),
        OutputFormat::Markdown => report::generate_markdown_report(&report),
        OutputFormat::Json => report::generate_json_report(&report)?,
    };
    print!("{}", output);
    Ok(0)
}
