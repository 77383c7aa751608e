// ============================================================================
// SECTION 14: SYNTHETIC LOG GENERATOR
// ============================================================================
// Produces JSON-lines application logs for load testing the pipeline:
// ten simulated services, uniformly drawn levels, exponential response
// times and exponential inter-arrival gaps over a trailing time window.
// ============================================================================

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LogstatsResult;
use crate::record::LogLevel;

// ----------------------------------------------------------------------------
// 14.1 Catalogue
// ----------------------------------------------------------------------------

pub const APPLICATIONS: [&str; 10] = [
    "web-app",
    "mobile-app",
    "api-gateway",
    "auth-service",
    "payment-service",
    "user-service",
    "product-catalog",
    "search-service",
    "notification-service",
    "analytics-service",
];

const DEBUG_MESSAGES: &[&str] = &[
    "Processing request started",
    "Database query executed",
    "Cache hit for key: {key}",
    "Entering function {function_name}",
    "Request parameters: {params}",
];

const INFO_MESSAGES: &[&str] = &[
    "User {user_id} logged in successfully",
    "Request completed in {time} ms",
    "New user registered: {user_email}",
    "Payment processed for order {order_id}",
    "Product {product_id} viewed by user {user_id}",
];

const WARN_MESSAGES: &[&str] = &[
    "Slow database query detected: {query_time} ms",
    "High memory usage: {memory_usage}%",
    "Retrying connection to {service}",
    "Deprecated API called: {endpoint}",
    "Unusual activity detected from IP: {ip_address}",
];

const ERROR_MESSAGES: &[&str] = &[
    "Database connection failed: {error}",
    "External API timeout: {api_endpoint}",
    "Authentication failed for user {user_id}",
    "Payment declined for order {order_id}",
    "File not found: {filename}",
];

const FATAL_MESSAGES: &[&str] = &[
    "System out of memory: shutting down",
    "Database cluster unreachable",
    "Critical service {service} failed to start",
    "Disk space exhausted on {device}",
    "Application crash detected: {error}",
];

const WORDS: &[&str] = &[
    "alpha", "ledger", "render", "socket", "bucket", "cursor", "harbor", "quartz", "signal",
    "vector", "window", "zephyr",
];

const SERVICES: &[&str] = &["database", "redis", "external-api"];
const FAILURES: &[&str] = &["Timeout", "Connection refused", "Authentication failed"];

fn templates_for(level: LogLevel) -> &'static [&'static str] {
    match level {
        LogLevel::Debug => DEBUG_MESSAGES,
        LogLevel::Info => INFO_MESSAGES,
        LogLevel::Warn => WARN_MESSAGES,
        LogLevel::Error => ERROR_MESSAGES,
        LogLevel::Fatal => FATAL_MESSAGES,
    }
}

/// Status codes a level may carry.
pub fn error_codes_for(level: LogLevel) -> &'static [i32] {
    match level {
        LogLevel::Debug | LogLevel::Info => &[200, 201],
        LogLevel::Warn => &[200, 201, 400, 401],
        LogLevel::Error | LogLevel::Fatal => &[400, 401, 403, 404, 500, 502, 503],
    }
}

// ----------------------------------------------------------------------------
// 14.2 Dataset Sizes
// ----------------------------------------------------------------------------

/// Preset dataset sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSize {
    Small,
    #[default]
    Medium,
    Large,
    Xlarge,
}

impl DatasetSize {
    pub fn entries(self) -> usize {
        match self {
            DatasetSize::Small => 10_000,
            DatasetSize::Medium => 100_000,
            DatasetSize::Large => 5_000_000,
            DatasetSize::Xlarge => 10_000_000,
        }
    }

    /// Window ending now that the timestamps cover
    pub fn span(self) -> Duration {
        match self {
            DatasetSize::Small => Duration::days(1),
            DatasetSize::Medium => Duration::days(7),
            DatasetSize::Large => Duration::days(30),
            DatasetSize::Xlarge => Duration::days(90),
        }
    }
}

// ----------------------------------------------------------------------------
// 14.3 Generated Entry
// ----------------------------------------------------------------------------

/// One synthetic log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub application: String,
    pub message: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub response_time: f64,
    pub error_code: i32,
}

/// Generation options.
#[derive(Debug, Clone, Default)]
pub struct GeneratorOptions {
    pub size: DatasetSize,
    /// Override the preset entry count
    pub entries: Option<usize>,
    /// Fixed seed for reproducible output
    pub seed: Option<u64>,
    /// End of the time window (defaults to now)
    pub end: Option<NaiveDateTime>,
}

impl GeneratorOptions {
    pub fn entry_count(&self) -> usize {
        self.entries.unwrap_or_else(|| self.size.entries())
    }
}

/// Outcome of a generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    pub path: PathBuf,
    pub entries: usize,
    pub bytes: u64,
    pub first_timestamp: NaiveDateTime,
    pub last_timestamp: NaiveDateTime,
}

// ----------------------------------------------------------------------------
// 14.4 Generator
// ----------------------------------------------------------------------------

/// Seedable source of synthetic log entries.
#[derive(Debug)]
pub struct LogGenerator {
    rng: StdRng,
}

impl LogGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Exponential variate with the given mean.
    fn exponential(&mut self, mean: f64) -> f64 {
        let u: f64 = self.rng.gen();
        -mean * (1.0 - u).ln()
    }

    fn short_id(&mut self, len: usize) -> String {
        let uuid = uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid();
        uuid.simple().to_string()[..len].to_string()
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items.choose(&mut self.rng).copied().unwrap_or_default()
    }

    fn render_message(&mut self, template: &str) -> String {
        let mut message = String::with_capacity(template.len() + 32);
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|i| open + i) else {
                break;
            };
            message.push_str(&rest[..open]);
            let value = self.placeholder(&rest[open + 1..close]);
            message.push_str(&value);
            rest = &rest[close + 1..];
        }
        message.push_str(rest);
        message
    }

    fn placeholder(&mut self, name: &str) -> String {
        match name {
            "key" | "user_id" => self.short_id(8),
            "product_id" => self.short_id(6),
            "order_id" => uuid::Builder::from_random_bytes(self.rng.gen())
                .into_uuid()
                .to_string(),
            "function_name" => self.pick(WORDS).to_string(),
            "params" => {
                let word = self.pick(WORDS);
                let value = self.rng.gen_range(1..=100);
                format!("{{'param1': '{}', 'param2': {}}}", word, value)
            }
            "time" => self.rng.gen_range(10..=2000).to_string(),
            "user_email" => format!("{}.{}@example.com", self.pick(WORDS), self.pick(WORDS)),
            "query_time" => self.rng.gen_range(1000..=5000).to_string(),
            "memory_usage" => self.rng.gen_range(80..=95).to_string(),
            "service" => self.pick(SERVICES).to_string(),
            "endpoint" => format!("/{}/{}", self.pick(WORDS), self.pick(WORDS)),
            "ip_address" => {
                let octets: [u8; 4] = self.rng.gen();
                format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
            }
            "error" => self.pick(FAILURES).to_string(),
            "api_endpoint" => format!("https://{}.example.com/{}", self.pick(WORDS), self.pick(WORDS)),
            "filename" => format!("{}.{}", self.pick(WORDS), self.pick(&["json", "csv", "txt"])),
            "device" => format!("{}-{:02}.local", self.pick(WORDS), self.rng.gen_range(1..=40)),
            other => format!("{{{}}}", other),
        }
    }

    /// Build one entry at `timestamp` for `application`.
    pub fn entry(&mut self, timestamp: NaiveDateTime, application: &str) -> GeneratedEntry {
        let level = *LogLevel::ALL.choose(&mut self.rng).unwrap_or(&LogLevel::Info);
        let template = self.pick(templates_for(level));
        let message = self.render_message(template);
        let error_code = error_codes_for(level)
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(200);

        let user_id = (self.rng.gen::<f64>() > 0.3).then(|| self.short_id(8));
        let session_id = (self.rng.gen::<f64>() > 0.5).then(|| self.short_id(12));

        GeneratedEntry {
            timestamp: timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            level,
            application: application.to_string(),
            message,
            user_id,
            session_id,
            response_time: self.exponential(100.0) * 1000.0,
            error_code,
        }
    }

    /// Write `entries` lines starting at `start`, spread over `span`.
    pub fn write_entries<W: Write>(
        &mut self,
        out: &mut W,
        entries: usize,
        start: NaiveDateTime,
        span: Duration,
    ) -> io::Result<NaiveDateTime> {
        let avg_interval = span.num_milliseconds() as f64 / 1000.0 / entries.max(1) as f64;
        let progress_interval = (entries / 100).max(1);
        let mut current = start;

        for i in 0..entries {
            let application = self.pick(&APPLICATIONS);
            let entry = self.entry(current, application);
            serde_json::to_writer(&mut *out, &entry)?;
            out.write_all(b"\n")?;

            let gap = self.exponential(avg_interval);
            current += Duration::microseconds((gap * 1e6) as i64);

            if i % progress_interval == 0 {
                info!(
                    target: "logstats::generator",
                    progress_pct = i as f64 / entries as f64 * 100.0,
                    written = i,
                    total = entries,
                    "Generating entries"
                );
            }
        }

        Ok(current)
    }
}

/// Generate a dataset file, creating parent directories as needed.
pub fn generate_file(path: &Path, options: &GeneratorOptions) -> LogstatsResult<GenerationSummary> {
    let entries = options.entry_count();
    let span = options.size.span();
    let end = options
        .end
        .unwrap_or_else(|| chrono::Local::now().naive_local());
    let start = end - span;

    info!(
        target: "logstats::generator",
        entries,
        from = %start.date(),
        path = %path.display(),
        "Generating synthetic logs"
    );

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    let mut generator = LogGenerator::new(options.seed);
    let last = generator.write_entries(&mut writer, entries, start, span)?;
    writer.flush()?;

    let bytes = fs::metadata(path)?.len();
    info!(
        target: "logstats::generator",
        path = %path.display(),
        size_mb = bytes as f64 / (1024.0 * 1024.0),
        "Generation complete"
    );

    Ok(GenerationSummary {
        path: path.to_path_buf(),
        entries,
        bytes,
        first_timestamp: start,
        last_timestamp: last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::RecordReader;
    use chrono::NaiveDate;
    use std::io::BufReader;

    fn fixed_end() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn options(entries: usize, seed: u64) -> GeneratorOptions {
        GeneratorOptions {
            size: DatasetSize::Small,
            entries: Some(entries),
            seed: Some(seed),
            end: Some(fixed_end()),
        }
    }

    #[test]
    fn test_generated_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("logs.json");
        let summary = generate_file(&path, &options(500, 7)).unwrap();
        assert_eq!(summary.entries, 500);
        assert!(summary.bytes > 0);

        let mut reader = RecordReader::new(BufReader::new(File::open(&path).unwrap()));
        let records: Vec<_> = reader.by_ref().collect();
        let stats = reader.finish().unwrap();

        assert_eq!(records.len(), 500);
        assert_eq!(stats.total_rejected(), 0);
        assert!(records
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
        assert!(records
            .iter()
            .all(|r| APPLICATIONS.contains(&r.application.as_str())));
        assert!(records.iter().all(|r| {
            let code = r.error_code.unwrap();
            error_codes_for(r.level).contains(&code)
        }));
        assert!(records
            .iter()
            .all(|r| r.response_time.map_or(false, |t| t >= 0.0)));
    }

    #[test]
    fn test_seeded_output_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        let c = dir.path().join("c.json");
        generate_file(&a, &options(200, 42)).unwrap();
        generate_file(&b, &options(200, 42)).unwrap();
        generate_file(&c, &options(200, 43)).unwrap();

        let a = fs::read(a).unwrap();
        assert_eq!(a, fs::read(b).unwrap());
        assert_ne!(a, fs::read(c).unwrap());
    }

    #[test]
    fn test_messages_have_no_placeholders() {
        let mut generator = LogGenerator::new(Some(1));
        for _ in 0..300 {
            let entry = generator.entry(fixed_end(), "web-app");
            assert!(!entry.message.contains("{user_id}"));
            assert!(!entry.message.contains("{key}"));
            if let Some(user) = &entry.user_id {
                assert_eq!(user.len(), 8);
            }
            if let Some(session) = &entry.session_id {
                assert_eq!(session.len(), 12);
            }
        }
    }

    #[test]
    fn test_size_presets() {
        assert_eq!(DatasetSize::Small.entries(), 10_000);
        assert_eq!(DatasetSize::Xlarge.span(), Duration::days(90));
        assert_eq!(GeneratorOptions::default().entry_count(), 100_000);
    }
}
