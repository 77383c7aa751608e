// ============================================================================
// SECTION 4: ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every stage of the pipeline. Malformed input records are
// not errors at this level: they are counted and dropped by the reader.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

// ----------------------------------------------------------------------------
// 4.1 Core Engine Errors
// ----------------------------------------------------------------------------

/// The main error type for the engine.
/// All stage errors can be converted to this type.
#[derive(Error, Debug)]
pub enum LogstatsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Clustering error: {0}")]
    Clustering(#[from] ClusteringError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LogstatsError {
    /// Check if re-running the same batch could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            LogstatsError::Config(_) => false,
            LogstatsError::Ingest(e) => e.is_recoverable(),
            LogstatsError::Clustering(_) => false,
            LogstatsError::Sink(e) => e.is_recoverable(),
            LogstatsError::Io(_) => true,
            LogstatsError::Internal(_) => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            LogstatsError::Config(_) => "config",
            LogstatsError::Ingest(_) => "ingest",
            LogstatsError::Clustering(_) => "clustering",
            LogstatsError::Sink(_) => "sink",
            LogstatsError::Io(_) => "io",
            LogstatsError::Internal(_) => "internal",
        }
    }
}

// ----------------------------------------------------------------------------
// 4.2 Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// 4.3 Ingest Errors
// ----------------------------------------------------------------------------

/// Errors acquiring the input source. Individual bad lines never end up here.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("No input files matched '{locator}'")]
    NoInputFiles { locator: String },

    #[error("Invalid input pattern '{locator}': {message}")]
    InvalidPattern { locator: String, message: String },

    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IngestError::ReadFailed { .. })
    }

    pub fn read_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::ReadFailed {
            path: path.into(),
            source,
        }
    }
}

// ----------------------------------------------------------------------------
// 4.4 Clustering Errors
// ----------------------------------------------------------------------------

/// Errors raised by the clustering engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusteringError {
    #[error("Cluster count must be at least 1")]
    ZeroClusters,

    #[error("Feature vector {index} is not finite: ({x}, {y})")]
    NonFiniteFeature { index: usize, x: f64, y: f64 },
}

// ----------------------------------------------------------------------------
// 4.5 Sink Errors
// ----------------------------------------------------------------------------

/// Errors from result sinks, surfaced verbatim to the caller
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write to sink '{name}': {source}")]
    WriteFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed for sink '{name}': {message}")]
    SerializationFailed { name: String, message: String },

    #[error("Failed to connect to sink '{name}': {message}")]
    ConnectionFailed { name: String, message: String },

    #[error("Sink '{name}' rejected the request with HTTP {status_code}: {message}")]
    Rejected {
        name: String,
        status_code: u16,
        message: String,
    },
}

impl SinkError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            SinkError::WriteFailed { .. } => true,
            SinkError::ConnectionFailed { .. } => true,
            SinkError::Rejected { status_code, .. } => *status_code >= 500,
            SinkError::SerializationFailed { .. } => false,
        }
    }

    pub fn write_failed(name: impl Into<String>, source: std::io::Error) -> Self {
        SinkError::WriteFailed {
            name: name.into(),
            source,
        }
    }

    pub fn serialization_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        SinkError::SerializationFailed {
            name: name.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// 4.6 Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for engine operations
pub type LogstatsResult<T> = Result<T, LogstatsError>;

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type for clustering operations
pub type ClusteringResult<T> = Result<T, ClusteringError>;
