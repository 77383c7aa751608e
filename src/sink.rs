// ============================================================================
// SECTION 12: RESULT EMITTER & SINKS
// ============================================================================
// Joins group statistics with their tier labels and hands the result set to
// a sink. Every sink has overwrite semantics: a run replaces whatever the
// previous run wrote. Failures are surfaced, never retried.
// ============================================================================

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::GroupStats;
use crate::cluster::ClusteringOutcome;
use crate::config::{SinkConfig, SinkKind};
use crate::error::{ConfigError, LogstatsError, LogstatsResult, SinkError, SinkResult};

// ----------------------------------------------------------------------------
// 12.1 Tiered Group Record
// ----------------------------------------------------------------------------

/// One output row: a group's statistics plus its performance tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredGroup {
    pub application: CompactString,
    pub hour: u8,
    pub total_requests: u64,
    pub avg_response_time: f64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub cluster_label: usize,
}

impl TieredGroup {
    pub fn new(stats: &GroupStats, cluster_label: usize) -> Self {
        Self {
            application: stats.key.application.clone(),
            hour: stats.key.hour.get(),
            total_requests: stats.total_requests,
            avg_response_time: stats.avg_response_time,
            total_errors: stats.total_errors,
            error_rate: stats.error_rate,
            cluster_label,
        }
    }
}

/// Attach the label of each group. Labels are positional over `groups`.
pub fn emit(groups: &[GroupStats], outcome: &ClusteringOutcome) -> LogstatsResult<Vec<TieredGroup>> {
    if groups.len() != outcome.labels.len() {
        return Err(LogstatsError::Internal(format!(
            "{} groups but {} cluster labels",
            groups.len(),
            outcome.labels.len()
        )));
    }

    Ok(groups
        .iter()
        .zip(&outcome.labels)
        .map(|(stats, &label)| TieredGroup::new(stats, label))
        .collect())
}

// ----------------------------------------------------------------------------
// 12.2 Sink Trait
// ----------------------------------------------------------------------------

/// Destination for a complete result set.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatsSink: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Replace any previously written result set with `records`.
    async fn replace_all(&self, records: &[TieredGroup]) -> SinkResult<()>;
}

/// Build the sink named by the configuration.
pub fn open_sink(config: &SinkConfig) -> LogstatsResult<Box<dyn StatsSink>> {
    match config.kind {
        SinkKind::Stdout => Ok(Box::new(StdoutSink::new(config.summary_rows))),
        SinkKind::JsonLines => {
            let path = config.output_path.as_deref().ok_or_else(|| {
                ConfigError::invalid_value("sink.output_path", "The jsonl sink needs an output path")
            })?;
            Ok(Box::new(JsonLinesSink::new(path)))
        }
        #[cfg(feature = "elasticsearch")]
        SinkKind::Elasticsearch => Ok(Box::new(ElasticsearchSink::new(
            &config.elasticsearch_url,
            &config.index,
            config.timeout_secs,
        ))),
        #[cfg(not(feature = "elasticsearch"))]
        SinkKind::Elasticsearch => Err(ConfigError::invalid_value(
            "sink.kind",
            "Built without the `elasticsearch` feature",
        )
        .into()),
    }
}

// ----------------------------------------------------------------------------
// 12.3 JSON Lines Sink
// ----------------------------------------------------------------------------

/// Writes one JSON object per line. The file is written beside the target
/// and renamed over it, so a failed run leaves the previous result intact.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Hidden sibling of the target, in the same directory so the rename
    /// stays on one filesystem.
    fn staging_path(&self) -> PathBuf {
        let mut name = std::ffi::OsString::from(".");
        let file_name = self
            .path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("logstats.jsonl"));
        name.push(file_name);
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StatsSink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn replace_all(&self, records: &[TieredGroup]) -> SinkResult<()> {
        let mut buffer = Vec::with_capacity(records.len() * 160);
        for record in records {
            serde_json::to_writer(&mut buffer, record)
                .map_err(|e| SinkError::serialization_failed(self.name(), e.to_string()))?;
            buffer.push(b'\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::write_failed(self.name(), e))?;
        }

        let staging = self.staging_path();
        tokio::fs::write(&staging, &buffer)
            .await
            .map_err(|e| SinkError::write_failed(self.name(), e))?;

        if let Err(e) = tokio::fs::rename(&staging, &self.path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(SinkError::write_failed(self.name(), e));
        }

        info!(
            target: "logstats::sink",
            sink = self.name(),
            path = %self.path.display(),
            records = records.len(),
            "Result set written"
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// 12.4 Stdout Summary Sink
// ----------------------------------------------------------------------------

/// Prints a table of the first `rows` records.
#[derive(Debug, Clone)]
pub struct StdoutSink {
    rows: usize,
}

impl StdoutSink {
    pub fn new(rows: usize) -> Self {
        Self { rows }
    }
}

/// Render the first `rows` records as a fixed-width table.
pub fn render_summary(records: &[TieredGroup], rows: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:>4} {:>10} {:>14} {:>8} {:>10} {:>7}",
        "application", "hour", "requests", "avg_resp_ms", "errors", "error_rate", "tier"
    );
    let _ = writeln!(out, "{}", "-".repeat(83));
    for record in records.iter().take(rows) {
        let _ = writeln!(
            out,
            "{:<24} {:>4} {:>10} {:>14.2} {:>8} {:>10.4} {:>7}",
            record.application,
            record.hour,
            record.total_requests,
            record.avg_response_time,
            record.total_errors,
            record.error_rate,
            record.cluster_label
        );
    }
    if records.len() > rows {
        let _ = writeln!(out, "only showing top {} of {} rows", rows, records.len());
    }
    out
}

#[async_trait]
impl StatsSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn replace_all(&self, records: &[TieredGroup]) -> SinkResult<()> {
        if self.rows == 0 {
            debug!(target: "logstats::sink", "Summary printout disabled");
            return Ok(());
        }

        let table = render_summary(records, self.rows);
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(table.as_bytes())
            .and_then(|_| handle.flush())
            .map_err(|e| SinkError::write_failed(self.name(), e))
    }
}

// ----------------------------------------------------------------------------
// 12.5 Elasticsearch Sink
// ----------------------------------------------------------------------------

/// Newline-delimited `_bulk` body indexing every record into `index`.
pub fn bulk_body(index: &str, records: &[TieredGroup]) -> Result<String, serde_json::Error> {
    let action = serde_json::to_string(&serde_json::json!({ "index": { "_index": index } }))?;
    let mut body = String::with_capacity(records.len() * 220);
    for record in records {
        body.push_str(&action);
        body.push('\n');
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}

/// Replaces an index: delete it, then bulk-index the new result set.
#[cfg(feature = "elasticsearch")]
#[derive(Debug, Clone)]
pub struct ElasticsearchSink {
    base_url: String,
    index: String,
    client: reqwest::Client,
}

#[cfg(feature = "elasticsearch")]
impl ElasticsearchSink {
    pub fn new(base_url: &str, index: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self::with_client(base_url, index, client)
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(base_url: &str, index: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            client,
        }
    }

    fn connection_failed(&self, e: reqwest::Error) -> SinkError {
        SinkError::ConnectionFailed {
            name: self.name().into(),
            message: e.to_string(),
        }
    }

    async fn rejected(&self, response: reqwest::Response) -> SinkError {
        let status_code = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        SinkError::Rejected {
            name: self.name().into(),
            status_code,
            message,
        }
    }

    async fn delete_index(&self) -> SinkResult<()> {
        let url = format!("{}/{}", self.base_url, self.index);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| self.connection_failed(e))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => Ok(()),
            _ => Err(self.rejected(response).await),
        }
    }
}

#[cfg(feature = "elasticsearch")]
#[async_trait]
impl StatsSink for ElasticsearchSink {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn replace_all(&self, records: &[TieredGroup]) -> SinkResult<()> {
        self.delete_index().await?;

        if records.is_empty() {
            info!(target: "logstats::sink", index = %self.index, "Index cleared, nothing to write");
            return Ok(());
        }

        let body = bulk_body(&self.index, records)
            .map_err(|e| SinkError::serialization_failed(self.name(), e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| self.connection_failed(e))?;

        if !response.status().is_success() {
            return Err(self.rejected(response).await);
        }

        let status_code = response.status().as_u16();
        let reply: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.connection_failed(e))?;

        if reply.get("errors").and_then(|v| v.as_bool()).unwrap_or(false) {
            let reason = reply
                .pointer("/items/0/index/error/reason")
                .and_then(|v| v.as_str())
                .unwrap_or("bulk request reported item errors");
            return Err(SinkError::Rejected {
                name: self.name().into(),
                status_code,
                message: reason.to_string(),
            });
        }

        info!(
            target: "logstats::sink",
            sink = self.name(),
            index = %self.index,
            records = records.len(),
            "Index replaced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{GroupKey, Hour};
    use crate::features::FeatureVector;
    use pretty_assertions::assert_eq;

    fn stats(app: &str, hour: u8, avg: f64) -> GroupStats {
        GroupStats {
            key: GroupKey::new(app, Hour::new(hour).unwrap()),
            total_requests: 4,
            avg_response_time: avg,
            total_errors: 1,
            error_rate: 0.25,
            response_time_samples: 4,
        }
    }

    fn outcome(labels: Vec<usize>) -> ClusteringOutcome {
        ClusteringOutcome {
            effective_k: labels.iter().max().map_or(0, |m| m + 1),
            labels,
            centroids: vec![FeatureVector::default()],
            iterations: 1,
            converged: true,
            inertia: 0.0,
        }
    }

    fn sample() -> Vec<TieredGroup> {
        emit(
            &[stats("web-app", 9, 120.0), stats("auth-service", 23, 4800.5)],
            &outcome(vec![0, 1]),
        )
        .unwrap()
    }

    #[test]
    fn test_emit_joins_labels() {
        let records = sample();
        assert_eq!(records[0].application, "web-app");
        assert_eq!(records[0].hour, 9);
        assert_eq!(records[0].cluster_label, 0);
        assert_eq!(records[1].cluster_label, 1);
        assert_eq!(records[1].avg_response_time, 4800.5);

        assert!(emit(&[stats("web-app", 9, 1.0)], &outcome(vec![])).is_err());
    }

    #[test]
    fn test_record_field_names() {
        let value = serde_json::to_value(&sample()[0]).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "application",
                "avg_response_time",
                "cluster_label",
                "error_rate",
                "hour",
                "total_errors",
                "total_requests"
            ]
        );
    }

    #[test]
    fn test_bulk_body_layout() {
        let body = bulk_body("logstats", &sample()).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"index":{"_index":"logstats"}}"#);
        let doc: TieredGroup = serde_json::from_str(lines[3]).unwrap();
        assert_eq!(doc.application, "auth-service");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_render_summary_truncates() {
        let table = render_summary(&sample(), 1);
        assert!(table.contains("web-app"));
        assert!(!table.contains("auth-service"));
        assert!(table.contains("only showing top 1 of 2 rows"));

        let full = render_summary(&sample(), 10);
        assert!(full.contains("auth-service"));
        assert!(!full.contains("only showing"));
    }

    #[tokio::test]
    async fn test_jsonl_sink_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("tiers.jsonl");
        let sink = JsonLinesSink::new(&path);

        sink.replace_all(&sample()).await.unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first.lines().count(), 2);

        sink.replace_all(&sample()[..1]).await.unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(second.lines().count(), 1);
        let row: TieredGroup = serde_json::from_str(second.trim_end()).unwrap();
        assert_eq!(row, sample()[0]);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("tiers.jsonl")]);
    }

    #[tokio::test]
    async fn test_jsonl_sink_surfaces_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("occupied");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep.txt"), "previous").unwrap();

        // a non-empty directory cannot be replaced by a file
        let sink = JsonLinesSink::new(&target);
        let err = sink.replace_all(&sample()).await.unwrap_err();
        assert!(matches!(err, SinkError::WriteFailed { .. }));

        assert!(!dir.path().join(".occupied.tmp").exists());
        assert_eq!(std::fs::read_to_string(target.join("keep.txt")).unwrap(), "previous");
    }

    #[tokio::test]
    async fn test_jsonl_sink_keeps_previous_result_when_staging_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiers.jsonl");
        let sink = JsonLinesSink::new(&path);
        sink.replace_all(&sample()).await.unwrap();

        // occupy the staging slot so the new result cannot be written
        std::fs::create_dir(dir.path().join(".tiers.jsonl.tmp")).unwrap();
        let err = sink.replace_all(&sample()[..1]).await.unwrap_err();
        assert!(matches!(err, SinkError::WriteFailed { .. }));

        let kept = std::fs::read_to_string(&path).unwrap();
        assert_eq!(kept.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_stdout_sink_with_rows_disabled() {
        assert!(StdoutSink::new(0).replace_all(&sample()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_sink_receives_full_set() {
        let mut sink = MockStatsSink::new();
        sink.expect_name().return_const("mock");
        sink.expect_replace_all()
            .withf(|records| records.len() == 2)
            .times(1)
            .returning(|_| Ok(()));

        sink.replace_all(&sample()).await.unwrap();
    }

    #[test]
    fn test_open_sink_by_kind() {
        let config = SinkConfig::default();
        assert_eq!(open_sink(&config).unwrap().name(), "stdout");

        let missing_path = SinkConfig {
            kind: SinkKind::JsonLines,
            ..SinkConfig::default()
        };
        assert!(open_sink(&missing_path).is_err());

        let jsonl = SinkConfig {
            kind: SinkKind::JsonLines,
            output_path: Some("/tmp/tiers.jsonl".into()),
            ..SinkConfig::default()
        };
        assert_eq!(open_sink(&jsonl).unwrap().name(), "jsonl");
    }

    // ------------------------------------------------------------------------
    // Elasticsearch sink against a scripted HTTP peer
    // ------------------------------------------------------------------------

    /// Serves one canned reply per connection, in order, and returns the
    /// request lines it saw.
    #[cfg(feature = "elasticsearch")]
    async fn scripted_server(
        replies: Vec<(u16, &'static str)>,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in replies {
                let (mut stream, _) = listener.accept().await.unwrap();

                let mut request = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = stream.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "connection closed mid-request");
                    request.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };

                let head = String::from_utf8_lossy(&request[..header_end]).to_string();
                let content_length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while request.len() < header_end + content_length {
                    let n = stream.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "connection closed mid-body");
                    request.extend_from_slice(&chunk[..n]);
                }

                let request_line = head.lines().next().unwrap_or_default();
                let mut parts = request_line.split_whitespace();
                seen.push(format!(
                    "{} {}",
                    parts.next().unwrap_or_default(),
                    parts.next().unwrap_or_default()
                ));

                let reply = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(reply.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            seen
        });

        (url, handle)
    }

    #[cfg(feature = "elasticsearch")]
    fn es_sink(url: &str) -> ElasticsearchSink {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap();
        ElasticsearchSink::with_client(url, "logstats", client)
    }

    #[cfg(feature = "elasticsearch")]
    #[tokio::test]
    async fn test_es_replace_deletes_then_bulk_indexes() {
        let (url, server) = scripted_server(vec![
            (404, r#"{"error":{"type":"index_not_found_exception"},"status":404}"#),
            (200, r#"{"took":3,"errors":false,"items":[]}"#),
        ])
        .await;

        es_sink(&url).replace_all(&sample()).await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(seen, vec!["DELETE /logstats", "POST /_bulk?refresh=true"]);
    }

    #[cfg(feature = "elasticsearch")]
    #[tokio::test]
    async fn test_es_replace_with_empty_set_only_deletes() {
        let (url, server) = scripted_server(vec![(200, r#"{"acknowledged":true}"#)]).await;

        es_sink(&url).replace_all(&[]).await.unwrap();

        assert_eq!(server.await.unwrap(), vec!["DELETE /logstats"]);
    }

    #[cfg(feature = "elasticsearch")]
    #[tokio::test]
    async fn test_es_bulk_item_errors_are_rejected() {
        let (url, server) = scripted_server(vec![
            (200, r#"{"acknowledged":true}"#),
            (
                200,
                r#"{"took":1,"errors":true,"items":[{"index":{"status":400,"error":{"type":"mapper_parsing_exception","reason":"mapper boom"}}}]}"#,
            ),
        ])
        .await;

        let err = es_sink(&url).replace_all(&sample()).await.unwrap_err();
        match err {
            SinkError::Rejected {
                status_code,
                message,
                ..
            } => {
                assert_eq!(status_code, 200);
                assert_eq!(message, "mapper boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[cfg(feature = "elasticsearch")]
    #[tokio::test]
    async fn test_es_delete_server_error_stops_replace() {
        let (url, server) =
            scripted_server(vec![(503, r#"{"error":"cluster unavailable","status":503}"#)]).await;

        let err = es_sink(&url).replace_all(&sample()).await.unwrap_err();
        assert!(matches!(err, SinkError::Rejected { status_code: 503, .. }));
        assert!(err.is_recoverable());
        assert_eq!(server.await.unwrap(), vec!["DELETE /logstats"]);
    }
}
