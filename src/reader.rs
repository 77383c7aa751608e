// ============================================================================
// SECTION 7: RECORD READER
// ============================================================================
// Turns newline-delimited JSON into typed records:
// - Input locator expansion (file, directory, glob)
// - Lazy, single-pass sequential reading
// - Batched parallel parsing with rayon
// - Per-reason drop counters
// ============================================================================

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::error::IngestError;
use crate::record::{LogRecord, RecordRejection};

// ----------------------------------------------------------------------------
// 7.1 Reader Statistics
// ----------------------------------------------------------------------------

/// Counters describing what the reader saw.
#[derive(Debug, Clone, Default)]
pub struct ReaderStats {
    /// Non-blank lines inspected
    pub lines_read: u64,
    /// Lines that became records
    pub accepted: u64,
    /// Blank lines, skipped silently
    pub blank: u64,
    /// Dropped lines by rejection reason
    pub rejected: AHashMap<&'static str, u64>,
}

impl ReaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected.values().sum()
    }

    pub fn rejected_for(&self, reason: &str) -> u64 {
        self.rejected.get(reason).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: ReaderStats) {
        self.lines_read += other.lines_read;
        self.accepted += other.accepted;
        self.blank += other.blank;
        for (reason, count) in other.rejected {
            *self.rejected.entry(reason).or_insert(0) += count;
        }
    }

    /// Count `count` non-UTF-8 lines as malformed.
    pub fn add_undecodable(&mut self, count: u64) {
        if count > 0 {
            self.lines_read += count;
            *self.rejected.entry("malformed").or_insert(0) += count;
        }
    }

    fn record_rejection(&mut self, rejection: &RecordRejection) {
        *self.rejected.entry(rejection.reason()).or_insert(0) += 1;
    }
}

/// Parse one line, updating `stats`. Returns `None` for dropped or blank lines.
pub fn classify_line(line: &str, stats: &mut ReaderStats) -> Option<LogRecord> {
    if line.trim().is_empty() {
        stats.blank += 1;
        return None;
    }
    stats.lines_read += 1;

    match LogRecord::parse_line(line) {
        Ok(record) => {
            stats.accepted += 1;
            Some(record)
        }
        Err(rejection) => {
            debug!(
                target: "logstats::reader",
                reason = rejection.reason(),
                error = %rejection,
                "Dropping record"
            );
            stats.record_rejection(&rejection);
            None
        }
    }
}

// ----------------------------------------------------------------------------
// 7.2 Input Locator Expansion
// ----------------------------------------------------------------------------

/// Expand an input locator into the concrete files to read.
///
/// Directories contribute every regular file whose name does not start with
/// `.` or `_`, sorted by path.
pub fn resolve_inputs(locator: &str) -> Result<Vec<PathBuf>, IngestError> {
    let no_files = || IngestError::NoInputFiles {
        locator: locator.to_string(),
    };

    if locator.contains('*') || locator.contains('?') || locator.contains('[') {
        let paths = glob::glob(locator).map_err(|e| IngestError::InvalidPattern {
            locator: locator.to_string(),
            message: e.to_string(),
        })?;
        let mut files: Vec<PathBuf> = paths.flatten().filter(|p| p.is_file()).collect();
        files.sort();
        return if files.is_empty() { Err(no_files()) } else { Ok(files) };
    }

    let path = Path::new(locator);
    if path.is_dir() {
        let entries = fs::read_dir(path).map_err(|e| IngestError::read_failed(path, e))?;
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && !is_hidden(p))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(no_files());
        }
        Ok(files)
    } else if path.is_file() {
        Ok(vec![path.to_path_buf()])
    } else {
        Err(no_files())
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.') || name.starts_with('_'))
        .unwrap_or(false)
}

/// Open an input file for buffered reading.
pub fn open_input(path: &Path) -> Result<BufReader<File>, IngestError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| IngestError::read_failed(path, e))
}

// ----------------------------------------------------------------------------
// 7.3 Sequential Reader
// ----------------------------------------------------------------------------

/// Lazy iterator of records over a line source. Single pass.
///
/// Lines that are not valid UTF-8 count as malformed. Any other I/O failure
/// ends the iteration and is returned from [`RecordReader::finish`].
#[derive(Debug)]
pub struct RecordReader<R> {
    lines: Lines<R>,
    stats: ReaderStats,
    failure: Option<io::Error>,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            stats: ReaderStats::new(),
            failure: None,
        }
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Consume the reader, returning its counters or the I/O failure that
    /// stopped it.
    pub fn finish(self) -> io::Result<ReaderStats> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.stats),
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = LogRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failure.is_some() {
            return None;
        }
        loop {
            match self.lines.next()? {
                Ok(line) => {
                    if let Some(record) = classify_line(&line, &mut self.stats) {
                        return Some(record);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    debug!(target: "logstats::reader", error = %e, "Dropping undecodable line");
                    self.stats.add_undecodable(1);
                }
                Err(e) => {
                    self.failure = Some(e);
                    return None;
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// 7.4 Batched Parallel Parsing
// ----------------------------------------------------------------------------

/// Iterator over fixed-size batches of raw lines.
#[derive(Debug)]
pub struct LineBatches<R> {
    lines: Lines<R>,
    batch_size: usize,
    invalid_utf8: u64,
    done: bool,
}

impl<R: BufRead> LineBatches<R> {
    pub fn new(reader: R, batch_size: usize) -> Self {
        Self {
            lines: reader.lines(),
            batch_size: batch_size.max(1),
            invalid_utf8: 0,
            done: false,
        }
    }

    /// Lines skipped because they were not valid UTF-8.
    pub fn invalid_utf8(&self) -> u64 {
        self.invalid_utf8
    }
}

impl<R: BufRead> Iterator for LineBatches<R> {
    type Item = io::Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.lines.next() {
                Some(Ok(line)) => batch.push(line),
                Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => self.invalid_utf8 += 1,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

/// Parse a batch of lines in parallel.
///
/// Produces exactly the records and counters sequential parsing would, with
/// records kept in line order.
pub fn parse_batch(lines: &[String]) -> (Vec<LogRecord>, ReaderStats) {
    let (records, stats) = lines
        .par_iter()
        .fold(
            || (Vec::new(), ReaderStats::new()),
            |(mut records, mut stats), line| {
                if let Some(record) = classify_line(line, &mut stats) {
                    records.push(record);
                }
                (records, stats)
            },
        )
        .reduce(
            || (Vec::new(), ReaderStats::new()),
            |(mut records, mut stats), (other_records, other_stats)| {
                records.extend(other_records);
                stats.merge(other_stats);
                (records, stats)
            },
        );

    trace!(
        target: "logstats::reader",
        lines = lines.len(),
        accepted = records.len(),
        "Parsed batch"
    );

    (records, stats)
}
