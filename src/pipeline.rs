// ============================================================================
// SECTION 13: PIPELINE ORCHESTRATION
// ============================================================================
// Reader -> Deriver -> Aggregator -> Feature Builder -> K-Means -> Emitter.
// One batch run: every input is read once, grouped, clustered and handed to
// the sink as a complete result set.
// ============================================================================

use std::io::BufRead;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{Aggregator, GroupTable};
use crate::cluster::ClusteringOutcome;
use crate::config::PipelineConfig;
use crate::derive::DerivedRecord;
use crate::error::{IngestError, LogstatsError, LogstatsResult};
use crate::features::build_features;
use crate::logging::PerfTimer;
use crate::reader::{open_input, parse_batch, resolve_inputs, LineBatches, ReaderStats, RecordReader};
use crate::sink::{emit, StatsSink, TieredGroup};

// ----------------------------------------------------------------------------
// 13.1 Run Report
// ----------------------------------------------------------------------------

/// Ingest counters for a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub files: usize,
    pub lines_read: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub blank: u64,
}

impl IngestSummary {
    fn new(files: usize, stats: &ReaderStats) -> Self {
        Self {
            files,
            lines_read: stats.lines_read,
            accepted: stats.accepted,
            rejected: stats.total_rejected(),
            blank: stats.blank,
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub ingest: IngestSummary,
    pub reader_stats: ReaderStats,
    /// Groups dropped by the empty-sample policy
    pub excluded_groups: usize,
    pub clustering: ClusteringOutcome,
    /// Rows handed to the sink
    pub records: Vec<TieredGroup>,
}

impl PipelineReport {
    pub fn group_count(&self) -> usize {
        self.records.len()
    }
}

/// Grouped statistics with tier labels, before the sink.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub excluded_groups: usize,
    pub clustering: ClusteringOutcome,
    pub records: Vec<TieredGroup>,
}

// ----------------------------------------------------------------------------
// 13.2 Pipeline
// ----------------------------------------------------------------------------

/// A configured batch run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute the whole run and write the result set to `sink`.
    pub async fn run(&self, sink: &dyn StatsSink) -> LogstatsResult<PipelineReport> {
        let run_timer = PerfTimer::new("pipeline");
        info!(
            target: "logstats::pipeline",
            input = %self.config.input.path,
            sink = sink.name(),
            k = self.config.clustering.k,
            seed = self.config.clustering.seed,
            "Starting pipeline run"
        );

        // Parsing and clustering are CPU-bound; keep them off the async workers
        let pipeline = self.clone();
        let (files, reader_stats, analysis) =
            tokio::task::spawn_blocking(move || pipeline.compute())
                .await
                .map_err(|e| LogstatsError::Internal(format!("Pipeline task failed: {}", e)))??;

        let sink_timer = PerfTimer::new("sink");
        sink.replace_all(&analysis.records).await?;
        crate::log_stage!("sink", sink_timer.stop(), records = analysis.records.len());

        let report = PipelineReport {
            ingest: IngestSummary::new(files, &reader_stats),
            reader_stats,
            excluded_groups: analysis.excluded_groups,
            clustering: analysis.clustering,
            records: analysis.records,
        };

        info!(
            target: "logstats::pipeline",
            accepted = report.ingest.accepted,
            rejected = report.ingest.rejected,
            groups = report.group_count(),
            tiers = report.clustering.effective_k,
            elapsed_ms = run_timer.stop(),
            "Pipeline run complete"
        );

        Ok(report)
    }

    /// Ingest and analysis on the configured worker pool.
    fn compute(&self) -> LogstatsResult<(usize, ReaderStats, Analysis)> {
        self.within_pool(|| {
            let (table, files, reader_stats) = self.ingest()?;
            let analysis = self.analyze(table)?;
            Ok((files, reader_stats, analysis))
        })
    }

    /// Read every input and fold it into a group table.
    pub fn ingest(&self) -> LogstatsResult<(GroupTable, usize, ReaderStats)> {
        let timer = PerfTimer::new("ingest");
        let paths = resolve_inputs(&self.config.input.path)?;

        let mut table = GroupTable::new();
        let mut stats = ReaderStats::new();

        for path in &paths {
            let reader = open_input(path)?;
            let file_stats = self.ingest_reader(reader, &mut table, path)?;
            info!(
                target: "logstats::reader",
                path = %path.display(),
                accepted = file_stats.accepted,
                rejected = file_stats.total_rejected(),
                "Input file read"
            );
            stats.merge(file_stats);
        }

        if stats.total_rejected() > 0 {
            warn!(
                target: "logstats::reader",
                rejected = stats.total_rejected(),
                malformed = stats.rejected_for("malformed"),
                missing_timestamp = stats.rejected_for("missing_timestamp"),
                invalid_timestamp = stats.rejected_for("invalid_timestamp"),
                invalid_response_time = stats.rejected_for("invalid_response_time"),
                "Dropped input records"
            );
        }

        crate::log_stage!("ingest", timer.stop(), files = paths.len(), groups = table.len());
        Ok((table, paths.len(), stats))
    }

    /// Fold one line source into `table`. `origin` names it in errors.
    pub fn ingest_reader<R: BufRead>(
        &self,
        reader: R,
        table: &mut GroupTable,
        origin: &Path,
    ) -> Result<ReaderStats, IngestError> {
        if !self.config.parallelism.enabled {
            let mut records = RecordReader::new(reader);
            for record in records.by_ref() {
                table.observe(&DerivedRecord::from(record));
            }
            return records
                .finish()
                .map_err(|e| IngestError::read_failed(origin, e));
        }

        let mut stats = ReaderStats::new();
        let mut batches = LineBatches::new(reader, self.config.parallelism.batch_size);
        for batch in batches.by_ref() {
            let batch = batch.map_err(|e| IngestError::read_failed(origin, e))?;
            let (records, batch_stats) = parse_batch(&batch);
            let derived: Vec<DerivedRecord> = records.into_iter().map(DerivedRecord::from).collect();
            table.merge(GroupTable::from_records_par(&derived));
            stats.merge(batch_stats);
        }
        stats.add_undecodable(batches.invalid_utf8());
        Ok(stats)
    }

    /// Aggregate, cluster and label a filled group table.
    pub fn analyze(&self, table: GroupTable) -> LogstatsResult<Analysis> {
        let timer = PerfTimer::new("aggregate");
        let aggregated = Aggregator::new(self.config.aggregation.missing_average_policy).finalize(table);
        crate::log_stage!(
            "aggregate",
            timer.stop(),
            groups = aggregated.groups.len(),
            excluded = aggregated.excluded.len()
        );

        let timer = PerfTimer::new("cluster");
        let features = build_features(&aggregated.groups);
        let clustering = self.config.kmeans().fit(&features)?;
        crate::log_stage!(
            "cluster",
            timer.stop(),
            effective_k = clustering.effective_k,
            iterations = clustering.iterations
        );

        let records = emit(&aggregated.groups, &clustering)?;

        Ok(Analysis {
            excluded_groups: aggregated.excluded.len(),
            clustering,
            records,
        })
    }

    /// Run `f` on a dedicated rayon pool when a thread count is configured.
    fn within_pool<T, F>(&self, f: F) -> LogstatsResult<T>
    where
        F: FnOnce() -> LogstatsResult<T> + Send,
        T: Send,
    {
        let threads = self.config.parallelism.threads;
        if !self.config.parallelism.enabled || threads == 0 {
            return f();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("logstats-worker-{}", i))
            .build()
            .map_err(|e| LogstatsError::Internal(format!("Failed to build thread pool: {}", e)))?;
        pool.install(f)
    }
}
