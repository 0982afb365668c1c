//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and the conversion into a typed request.

use crate::error::{Error, Result};
use crate::models::{AnalysisRequest, TimeSeriesVariant, YearMonth};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cohort MPC - federated clinical statistics without sharing records
///
/// Every party runs this tool against its own FHIR extraction service.
/// The parties jointly compute bucketed counts over their combined
/// population through secure aggregation; small counts are suppressed.
///
/// Examples:
///   cohort-mpc --fhir-server http://localhost --fhir-port 8080 -a agePyramide -d I11.00 -i 1 -p "1@10.0.0.1:5000;2@10.0.0.2:5000" --allow-clear-sums
///   cohort-mpc -a timeSeries --variant covid-19 --time-start 2021-01 --time-end 2021-03 -i 2 -p "1@10.0.0.1:5000;2@10.0.0.2:5000" --allow-clear-sums
///   cohort-mpc --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Base URL of the FHIR extraction service
    ///
    /// Overrides `[fhir] server` from the config file.
    #[arg(long, value_name = "URL", env = "COHORT_FHIR_SERVER")]
    pub fhir_server: Option<String>,

    /// Port of the FHIR extraction service
    #[arg(long, value_name = "PORT", env = "COHORT_FHIR_PORT")]
    pub fhir_port: Option<u16>,

    /// Which analysis to perform
    #[arg(short, long, value_enum, required_unless_present = "init_config")]
    pub analysis: Option<AnalysisArg>,

    /// Diagnosis (ICD-10 code) for the age pyramid analysis
    #[arg(short, long, default_value = "I11.00")]
    pub diagnosis: String,

    /// Condition family for the time series analysis
    #[arg(long, value_enum)]
    pub variant: Option<VariantArg>,

    /// Id of the local party in the roster
    #[arg(short, long, value_name = "ID", required_unless_present = "init_config")]
    pub id: Option<u32>,

    /// All parties, as "ID@HOST:PORT;ID@HOST:PORT;..."
    ///
    /// Every party must pass the same roster in the same order.
    #[arg(short, long, value_name = "ROSTER", required_unless_present = "init_config")]
    pub parties: Option<String>,

    /// Suppress aggregated counts at or below K (0 disables suppression)
    ///
    /// Defaults to the config file value, or 5.
    #[arg(short, long, value_name = "K")]
    pub k_threshold: Option<u32>,

    /// First month of the time series (YYYY-MM)
    #[arg(long, value_name = "YYYY-MM")]
    pub time_start: Option<String>,

    /// Last month of the time series (YYYY-MM), inclusive
    #[arg(long, value_name = "YYYY-MM")]
    pub time_end: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .cohort-mpc.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(long)]
    pub verbose: bool,

    /// Run in quiet mode (report only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Report format on standard output (text, markdown, json)
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Seconds to wait for all parties to come online
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Seconds an aggregation round may take before the run is aborted
    #[arg(long, value_name = "SECS")]
    pub round_timeout: Option<u64>,

    /// Exchange a digest of the bucket labels and refuse mismatched layouts
    ///
    /// Every party must enable it, or none.
    #[arg(long)]
    pub verify_labels: bool,

    /// Run the TCP aggregation backend, which reconstructs every sum at each
    /// party before suppression and so reveals which cells were suppressed
    #[arg(long)]
    pub allow_clear_sums: bool,

    /// Generate a default .cohort-mpc.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Analysis names as the parties spell them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AnalysisArg {
    #[value(name = "agePyramide")]
    AgePyramid,
    #[value(name = "timeSeries")]
    TimeSeries,
    #[value(name = "diagCoincidence")]
    DiagCoincidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum VariantArg {
    #[value(name = "covid-19")]
    Covid19,
    #[value(name = "cf-pku")]
    CfPku,
}

impl From<VariantArg> for TimeSeriesVariant {
    fn from(variant: VariantArg) -> Self {
        match variant {
            VariantArg::Covid19 => TimeSeriesVariant::Covid19,
            VariantArg::CfPku => TimeSeriesVariant::CfPku,
        }
    }
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Aligned plain text (default)
    #[default]
    Text,
    /// Markdown table
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> std::result::Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref server) = self.fhir_server {
            if !server.starts_with("http://") && !server.starts_with("https://") {
                return Err("FHIR server URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.connect_timeout == Some(0) {
            return Err("Connect timeout must be at least 1 second".to_string());
        }
        if self.round_timeout == Some(0) {
            return Err("Round timeout must be at least 1 second".to_string());
        }

        if self.analysis != Some(AnalysisArg::TimeSeries)
            && (self.variant.is_some() || self.time_start.is_some() || self.time_end.is_some())
        {
            return Err("--variant, --time-start and --time-end only apply to timeSeries".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Builds the typed request from the analysis flags.
    pub fn analysis_request(&self) -> Result<AnalysisRequest> {
        match self.analysis {
            Some(AnalysisArg::AgePyramid) => Ok(AnalysisRequest::AgePyramid {
                diagnosis: self.diagnosis.clone(),
            }),
            Some(AnalysisArg::TimeSeries) => {
                let variant = self
                    .variant
                    .ok_or_else(|| Error::format("timeSeries needs --variant"))?;
                let start = month_arg("--time-start", self.time_start.as_deref())?;
                let end = month_arg("--time-end", self.time_end.as_deref())?;
                AnalysisRequest::time_series(variant.into(), start, end)
            }
            Some(AnalysisArg::DiagCoincidence) => Ok(AnalysisRequest::DiagnosisCoincidence),
            None => Err(Error::format("no analysis selected")),
        }
    }
}

fn month_arg(flag: &str, value: Option<&str>) -> Result<YearMonth> {
    value
        .ok_or_else(|| Error::format(format!("timeSeries needs {}", flag)))?
        .parse()
}
