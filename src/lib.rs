//! # Logstats Engine - Hourly Log Analytics & Performance Tiers
//!
//! A batch analytics engine that reads line-delimited JSON application logs,
//! computes per-application, per-hour request statistics and groups the
//! resulting (application, hour) buckets into performance tiers with a
//! seeded k-means.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           LOGSTATS BATCH PIPELINE                           │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  READER → DERIVER → AGGREGATOR → FEATURE BUILDER → K-MEANS → EMITTER/SINK   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Order-Independent**: Grouping is a fold/reduce, identical for any input order
//! - **Deterministic Tiers**: Seeded k-means++ with labels ordered by centroid latency
//! - **Parallel**: Optional rayon parsing, aggregation and cluster assignment
//! - **Multi-Output**: JSON lines, stdout summary, Elasticsearch index
//!
//! ## Author
//!
//! AIOps Team

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod aggregate;
pub mod cluster;
pub mod config;
pub mod derive;
pub mod error;
pub mod features;
pub mod generator;
pub mod logging;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod sink;

pub use aggregate::{AggregationOutput, Aggregator, GroupKey, GroupStats, Hour};
pub use cluster::{ClusteringOutcome, KMeans};
pub use config::PipelineConfig;
pub use derive::DerivedRecord;
pub use error::{LogstatsError, LogstatsResult};
pub use features::FeatureVector;
pub use pipeline::{Pipeline, PipelineReport};
pub use record::{LogLevel, LogRecord};
pub use sink::{StatsSink, TieredGroup};

// ============================================================================
// SECTION 2: CONSTANTS & VERSION INFORMATION
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "logstats-engine";
pub const ENGINE_FULL_NAME: &str = "Logstats Analytics Engine";

// ----------------------------------------------------------------------------
// Clustering
// ----------------------------------------------------------------------------

/// Default number of performance tiers
pub const DEFAULT_CLUSTER_COUNT: usize = 3;

/// Default k-means seed
pub const DEFAULT_SEED: u64 = 42;

/// Iteration cap for Lloyd refinement
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Centroid movement below which the refinement is considered stable
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// Below this many vectors the assignment step stays sequential
pub const PARALLEL_ASSIGN_THRESHOLD: usize = 4096;

// ----------------------------------------------------------------------------
// Ingest
// ----------------------------------------------------------------------------

/// Lines parsed per rayon batch in parallel ingest mode
pub const PARSE_BATCH_SIZE: usize = 16 * 1024;

// ----------------------------------------------------------------------------
// Outputs
// ----------------------------------------------------------------------------

/// Default Elasticsearch index for tiered statistics
pub const DEFAULT_INDEX_NAME: &str = "logstats";

/// Default Elasticsearch node
pub const DEFAULT_ELASTICSEARCH_URL: &str = "http://elasticsearch:9200";

/// Rows printed by the summary after a run
pub const DEFAULT_SUMMARY_ROWS: usize = 10;

/// Timeout for sink HTTP requests (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
