// ============================================================================
// SECTION 5: CONFIGURATION SYSTEM
// ============================================================================
// Configuration management with:
// - TOML file parsing
// - Environment variable overrides (LOGSTATS_ prefix, `__` nesting)
// - Validation
// - Sensible defaults
// ============================================================================

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::aggregate::MissingAveragePolicy;
use crate::cluster::KMeans;
use crate::error::ConfigError;
use crate::{
    DEFAULT_CLUSTER_COUNT, DEFAULT_ELASTICSEARCH_URL, DEFAULT_HTTP_TIMEOUT_SECS,
    DEFAULT_INDEX_NAME, DEFAULT_MAX_ITERATIONS, DEFAULT_SEED, DEFAULT_SUMMARY_ROWS,
    DEFAULT_TOLERANCE, PARSE_BATCH_SIZE,
};

/// Prefix for environment overrides, e.g. `LOGSTATS_CLUSTERING__K=4`
pub const ENV_PREFIX: &str = "LOGSTATS_";

// ----------------------------------------------------------------------------
// 5.1 Main Configuration Structure
// ----------------------------------------------------------------------------

/// Root configuration for a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Where records come from
    #[serde(default)]
    pub input: InputConfig,

    /// Grouping behaviour
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// K-means settings
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Where tiered statistics go
    #[serde(default)]
    pub sink: SinkConfig,

    /// Internal rayon parallelism
    #[serde(default)]
    pub parallelism: ParallelismConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    /// Load from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    /// Validate the configuration. Called after CLI overrides are applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.path.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "input.path",
                "An input file, directory or glob pattern is required",
            ));
        }

        if self.clustering.k == 0 {
            return Err(ConfigError::invalid_value(
                "clustering.k",
                "Cluster count must be at least 1",
            ));
        }

        if self.clustering.max_iterations == 0 {
            return Err(ConfigError::invalid_value(
                "clustering.max_iterations",
                "Iteration cap must be at least 1",
            ));
        }

        if !self.clustering.tolerance.is_finite() || self.clustering.tolerance < 0.0 {
            return Err(ConfigError::invalid_value(
                "clustering.tolerance",
                format!(
                    "Tolerance must be a non-negative number, got {}",
                    self.clustering.tolerance
                ),
            ));
        }

        if self.parallelism.batch_size == 0 {
            return Err(ConfigError::invalid_value(
                "parallelism.batch_size",
                "Batch size must be at least 1",
            ));
        }

        match self.sink.kind {
            SinkKind::Elasticsearch if self.sink.index.trim().is_empty() => {
                return Err(ConfigError::invalid_value(
                    "sink.index",
                    "Index name cannot be empty",
                ));
            }
            SinkKind::JsonLines if self.sink.output_path.is_none() => {
                return Err(ConfigError::invalid_value(
                    "sink.output_path",
                    "The jsonl sink needs an output path",
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Render the default configuration as TOML
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// K-means engine for these settings
    pub fn kmeans(&self) -> KMeans {
        KMeans::new(self.clustering.k, self.clustering.seed)
            .with_max_iterations(self.clustering.max_iterations)
            .with_tolerance(self.clustering.tolerance)
            .with_parallel(self.parallelism.enabled)
    }
}

// ----------------------------------------------------------------------------
// 5.2 Input Configuration
// ----------------------------------------------------------------------------

/// Input locator settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// File, directory or glob pattern of JSON-lines logs
    #[serde(default)]
    pub path: String,
}

// ----------------------------------------------------------------------------
// 5.3 Aggregation Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// How to report groups without any response time sample
    #[serde(default)]
    pub missing_average_policy: MissingAveragePolicy,
}

// ----------------------------------------------------------------------------
// 5.4 Clustering Configuration
// ----------------------------------------------------------------------------

/// K-means settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Number of performance tiers
    #[serde(default = "default_k")]
    pub k: usize,

    /// Seed for centroid initialization
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Lloyd iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Centroid movement considered stable
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            seed: default_seed(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

fn default_k() -> usize {
    DEFAULT_CLUSTER_COUNT
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

// ----------------------------------------------------------------------------
// 5.5 Sink Configuration
// ----------------------------------------------------------------------------

/// Available result sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Print a summary table only
    #[default]
    Stdout,
    /// Overwrite a JSON-lines file
    #[serde(rename = "jsonl")]
    #[value(name = "jsonl")]
    JsonLines,
    /// Replace an Elasticsearch index
    Elasticsearch,
}

/// Sink settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Which sink receives the results
    #[serde(default)]
    pub kind: SinkKind,

    /// Output file for the jsonl sink
    #[serde(default)]
    pub output_path: Option<String>,

    /// Elasticsearch node URL
    #[serde(default = "default_elasticsearch_url")]
    pub elasticsearch_url: String,

    /// Elasticsearch index name
    #[serde(default = "default_index")]
    pub index: String,

    /// HTTP timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Rows shown by the summary printout (0 disables it)
    #[serde(default = "default_summary_rows")]
    pub summary_rows: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            output_path: None,
            elasticsearch_url: default_elasticsearch_url(),
            index: default_index(),
            timeout_secs: default_timeout_secs(),
            summary_rows: default_summary_rows(),
        }
    }
}

fn default_elasticsearch_url() -> String {
    DEFAULT_ELASTICSEARCH_URL.into()
}

fn default_index() -> String {
    DEFAULT_INDEX_NAME.into()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_summary_rows() -> usize {
    DEFAULT_SUMMARY_ROWS
}

// ----------------------------------------------------------------------------
// 5.6 Parallelism Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelismConfig {
    /// Use rayon for parsing, aggregation and cluster assignment
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Worker threads (0 = rayon default)
    #[serde(default)]
    pub threads: usize,

    /// Lines per parallel parse batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threads: 0,
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    PARSE_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

// ----------------------------------------------------------------------------
// 5.7 Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "compact".into()
}
