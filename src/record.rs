// ============================================================================
// SECTION 3: CORE TYPE SYSTEM
// ============================================================================
// Typed log records and the coercion rules from raw JSON lines.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ----------------------------------------------------------------------------
// 3.1 Log Levels
// ----------------------------------------------------------------------------

/// Severity of an application log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// 3.2 Status Codes
// ----------------------------------------------------------------------------

/// Coarse class of an HTTP-like status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Unknown,
}

impl StatusClass {
    pub fn from_code(code: i32) -> Self {
        match code {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Unknown,
        }
    }
}

// ----------------------------------------------------------------------------
// 3.3 Raw Wire Shape
// ----------------------------------------------------------------------------

/// A timestamp as it may appear on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    EpochSeconds(f64),
}

/// One JSON line before coercion. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLogRecord {
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    pub level: LogLevel,
    pub application: CompactString,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub response_time: Option<f64>,
    #[serde(default)]
    pub error_code: Option<i32>,
}

// ----------------------------------------------------------------------------
// 3.4 Typed Log Record
// ----------------------------------------------------------------------------

/// A log record that passed schema coercion.
///
/// `timestamp` is the wall-clock time written by the producer. Offsets are
/// parsed but not applied, so hour extraction sees the time as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: NaiveDateTime,
    pub level: LogLevel,
    pub application: CompactString,
    pub message: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub response_time: Option<f64>,
    pub error_code: Option<i32>,
}

impl LogRecord {
    /// Parse and coerce a single JSON line.
    pub fn parse_line(line: &str) -> Result<Self, RecordRejection> {
        let raw: RawLogRecord =
            serde_json::from_str(line).map_err(|e| RecordRejection::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    pub fn status_class(&self) -> Option<StatusClass> {
        self.error_code.map(StatusClass::from_code)
    }
}

impl TryFrom<RawLogRecord> for LogRecord {
    type Error = RecordRejection;

    fn try_from(raw: RawLogRecord) -> Result<Self, Self::Error> {
        let timestamp = match raw.timestamp {
            None => return Err(RecordRejection::MissingTimestamp),
            Some(ts) => parse_timestamp(&ts)?,
        };

        if let Some(rt) = raw.response_time {
            if !rt.is_finite() || rt < 0.0 {
                return Err(RecordRejection::InvalidResponseTime(rt));
            }
        }

        Ok(LogRecord {
            timestamp,
            level: raw.level,
            application: raw.application,
            message: raw.message,
            user_id: raw.user_id,
            session_id: raw.session_id,
            response_time: raw.response_time,
            error_code: raw.error_code,
        })
    }
}

// ----------------------------------------------------------------------------
// 3.5 Timestamp Coercion
// ----------------------------------------------------------------------------

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Coerce a wire timestamp into a naive wall-clock time.
pub fn parse_timestamp(raw: &RawTimestamp) -> Result<NaiveDateTime, RecordRejection> {
    match raw {
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(RecordRejection::MissingTimestamp);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(dt.naive_local());
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                // A bare date means midnight
                .or_else(|| {
                    NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                })
                .ok_or_else(|| RecordRejection::InvalidTimestamp(text.to_string()))
        }
        RawTimestamp::EpochSeconds(secs) => {
            if !secs.is_finite() {
                return Err(RecordRejection::InvalidTimestamp(secs.to_string()));
            }
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
            DateTime::from_timestamp(whole as i64, nanos)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| RecordRejection::InvalidTimestamp(secs.to_string()))
        }
    }
}

// ----------------------------------------------------------------------------
// 3.6 Rejection Reasons
// ----------------------------------------------------------------------------

/// Why a line was dropped by the reader.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordRejection {
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("missing timestamp")]
    MissingTimestamp,

    #[error("unparseable timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("invalid response time {0}")]
    InvalidResponseTime(f64),
}

impl RecordRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            RecordRejection::Malformed(_) => "malformed",
            RecordRejection::MissingTimestamp => "missing_timestamp",
            RecordRejection::InvalidTimestamp(_) => "invalid_timestamp",
            RecordRejection::InvalidResponseTime(_) => "invalid_response_time",
        }
    }
}
