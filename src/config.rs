//! Configuration file handling.
//!
//! Settings are read from `.cohort-mpc.toml` (or `--config FILE`) and then
//! overridden by whatever the command line gives explicitly.

use crate::aggregate::AggregationSettings;
use crate::cli::{Args, OutputFormat};
use crate::extract::FhirSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".cohort-mpc.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Extraction service settings.
    #[serde(default)]
    pub fhir: FhirConfig,

    /// Secure aggregation settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Report format on standard output.
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FhirConfig {
    /// Base URL of the extraction service, without the port.
    #[serde(default = "default_server")]
    pub server: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds.
    #[serde(default = "default_fhir_timeout")]
    pub timeout_seconds: u64,
}

impl Default for FhirConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            timeout_seconds: default_fhir_timeout(),
        }
    }
}

fn default_server() -> String {
    "http://localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_fhir_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Aggregated counts at or below this value are reported as zero.
    /// Zero disables suppression.
    #[serde(default = "default_k_threshold")]
    pub k_threshold: u32,

    /// Address the local party listens on.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// How long to wait for every peer to come online.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Upper bound per aggregation round. Unset waits indefinitely.
    #[serde(default)]
    pub round_timeout_seconds: Option<u64>,

    /// Check that every party bins into the same bucket labels.
    #[serde(default)]
    pub verify_labels: bool,

    /// Run the TCP backend even though every party sees the unsuppressed
    /// sums in memory before they are zeroed.
    #[serde(default)]
    pub allow_clear_sums: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            k_threshold: default_k_threshold(),
            bind_host: default_bind_host(),
            connect_timeout_seconds: default_connect_timeout(),
            round_timeout_seconds: None,
            verify_labels: false,
            allow_clear_sums: false,
        }
    }
}

fn default_k_threshold() -> u32 {
    5
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_connect_timeout() -> u64 {
    120
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given on the command line (or through the environment)
    /// override the file.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref server) = args.fhir_server {
            self.fhir.server = server.clone();
        }
        if let Some(port) = args.fhir_port {
            self.fhir.port = port;
        }

        if let Some(k) = args.k_threshold {
            self.aggregation.k_threshold = k;
        }
        if let Some(secs) = args.connect_timeout {
            self.aggregation.connect_timeout_seconds = secs;
        }
        if let Some(secs) = args.round_timeout {
            self.aggregation.round_timeout_seconds = Some(secs);
        }
        if args.verify_labels {
            self.aggregation.verify_labels = true;
        }
        if args.allow_clear_sums {
            self.aggregation.allow_clear_sums = true;
        }

        if let Some(format) = args.format {
            self.general.format = format;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    pub fn fhir_settings(&self) -> FhirSettings {
        FhirSettings {
            server: self.fhir.server.clone(),
            port: self.fhir.port,
            timeout_seconds: self.fhir.timeout_seconds,
        }
    }

    pub fn aggregation_settings(&self) -> AggregationSettings {
        AggregationSettings {
            bind_host: self.aggregation.bind_host.clone(),
            connect_timeout: Duration::from_secs(self.aggregation.connect_timeout_seconds),
            round_timeout: self.aggregation.round_timeout_seconds.map(Duration::from_secs),
            verify_labels: self.aggregation.verify_labels,
            allow_clear_sums: self.aggregation.allow_clear_sums,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
