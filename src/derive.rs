// ============================================================================
// SECTION 8: TEMPORAL FEATURE DERIVATION
// ============================================================================
// Per-record features used for grouping: hour of day, day of week and the
// error indicator. Pure functions of a single record.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use chrono::{Datelike, Timelike};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::record::{LogLevel, LogRecord};

// ----------------------------------------------------------------------------
// 8.1 Hour of Day
// ----------------------------------------------------------------------------

/// An hour of the day, always in `0..=23`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Hour(u8);

impl Hour {
    pub const MIDNIGHT: Hour = Hour(0);

    pub fn new(hour: u8) -> Option<Self> {
        (hour < 24).then_some(Hour(hour))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Hour {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Hour::new(value).ok_or_else(|| format!("hour out of range: {}", value))
    }
}

impl From<Hour> for u8 {
    fn from(hour: Hour) -> u8 {
        hour.0
    }
}

impl Display for Hour {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

// ----------------------------------------------------------------------------
// 8.2 Error Indicator
// ----------------------------------------------------------------------------

/// Whether a level counts toward the error rate. Only ERROR does.
pub fn is_error_level(level: LogLevel) -> bool {
    match level {
        LogLevel::Error => true,
        LogLevel::Debug | LogLevel::Info | LogLevel::Warn | LogLevel::Fatal => false,
    }
}

// ----------------------------------------------------------------------------
// 8.3 Derived Record
// ----------------------------------------------------------------------------

/// The slice of a record the aggregator needs, plus derived features.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRecord {
    pub application: CompactString,
    pub hour: Hour,
    /// 1 = Sunday .. 7 = Saturday
    pub day_of_week: u8,
    pub is_error: bool,
    pub response_time: Option<f64>,
}

impl DerivedRecord {
    pub fn from_record(record: &LogRecord) -> Self {
        Self::derive(record, record.application.clone())
    }

    fn derive(record: &LogRecord, application: CompactString) -> Self {
        let timestamp = record.timestamp;
        Self {
            application,
            hour: Hour(timestamp.hour() as u8),
            day_of_week: timestamp.weekday().number_from_sunday() as u8,
            is_error: is_error_level(record.level),
            response_time: record.response_time,
        }
    }

    /// The 0/1 error indicator summed by the aggregator.
    pub fn error_indicator(&self) -> u64 {
        u64::from(self.is_error)
    }
}

impl From<LogRecord> for DerivedRecord {
    fn from(mut record: LogRecord) -> Self {
        let application = std::mem::take(&mut record.application);
        Self::derive(&record, application)
    }
}
