// ============================================================================
// SECTION 15: COMMAND LINE INTERFACE
// ============================================================================
// - `run`: execute the pipeline against an input locator
// - `generate`: write a synthetic dataset
// - `validate`, `generate-config`, `version`
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use logstats_engine::aggregate::MissingAveragePolicy;
use logstats_engine::config::{PipelineConfig, SinkKind};
use logstats_engine::error::{LogstatsError, LogstatsResult};
use logstats_engine::generator::{generate_file, DatasetSize, GeneratorOptions};
use logstats_engine::logging::init_logging;
use logstats_engine::sink::{open_sink, render_summary};
use logstats_engine::{Pipeline, PipelineReport, ENGINE_FULL_NAME, ENGINE_VERSION};

// ----------------------------------------------------------------------------
// 15.1 CLI Argument Parser
// ----------------------------------------------------------------------------

/// Logstats CLI
#[derive(Parser, Debug)]
#[command(
    name = "logstats",
    author = "AIOps Team",
    version,
    about = "Per-application hourly log statistics with performance-tier clustering",
    long_about = "Reads JSON-lines application logs, aggregates request counts, average \
                  response time and error rate per application and hour of day, groups \
                  the results into performance tiers with seeded k-means and writes them \
                  to a sink."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "logstats.toml", env = "LOGSTATS_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "LOGSTATS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline
    Run(RunArgs),

    /// Generate a synthetic log dataset
    Generate {
        /// Dataset size preset
        #[arg(short, long, value_enum, default_value_t = DatasetSize::Medium)]
        size: DatasetSize,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Override the preset entry count
        #[arg(short = 'n', long)]
        entries: Option<usize>,

        /// Seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate configuration file
    Validate {
        /// Input locator to validate against
        #[arg(short, long)]
        input: Option<String>,

        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version and build info
    Version,
}

/// Overrides for a pipeline run. Unset flags keep the configured values.
#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Input file, directory or glob pattern
    pub input: Option<String>,

    /// Result sink
    #[arg(short, long, value_enum)]
    pub sink: Option<SinkKind>,

    /// Output file for the jsonl sink
    #[arg(short, long)]
    pub output: Option<String>,

    /// Elasticsearch node URL
    #[arg(long, env = "LOGSTATS_ES_URL")]
    pub es_url: Option<String>,

    /// Elasticsearch index name
    #[arg(long)]
    pub index: Option<String>,

    /// Number of performance tiers
    #[arg(short, long)]
    pub k: Option<usize>,

    /// Clustering seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Rows in the summary printout (0 disables it)
    #[arg(long)]
    pub show: Option<usize>,

    /// Leave out groups without response time samples
    #[arg(long)]
    pub exclude_empty: bool,

    /// Disable rayon parallelism
    #[arg(long)]
    pub sequential: bool,

    /// Worker threads (0 = all cores)
    #[arg(short, long)]
    pub threads: Option<usize>,
}

impl RunArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(input) = &self.input {
            config.input.path = input.clone();
        }
        if let Some(sink) = self.sink {
            config.sink.kind = sink;
        }
        if let Some(output) = &self.output {
            config.sink.output_path = Some(output.clone());
        }
        if let Some(url) = &self.es_url {
            config.sink.elasticsearch_url = url.clone();
        }
        if let Some(index) = &self.index {
            config.sink.index = index.clone();
        }
        if let Some(k) = self.k {
            config.clustering.k = k;
        }
        if let Some(seed) = self.seed {
            config.clustering.seed = seed;
        }
        if let Some(rows) = self.show {
            config.sink.summary_rows = rows;
        }
        if self.exclude_empty {
            config.aggregation.missing_average_policy = MissingAveragePolicy::Exclude;
        }
        if self.sequential {
            config.parallelism.enabled = false;
        }
        if let Some(threads) = self.threads {
            config.parallelism.threads = threads;
        }
    }
}

// ----------------------------------------------------------------------------
// 15.2 CLI Handler Functions
// ----------------------------------------------------------------------------

fn load_config(path: &Path) -> LogstatsResult<(PipelineConfig, bool)> {
    if path.exists() {
        Ok((PipelineConfig::load(path)?, true))
    } else {
        Ok((PipelineConfig::default(), false))
    }
}

/// Handle the validate subcommand
fn handle_validate(config_path: &Path, input: Option<String>, verbose: bool) -> LogstatsResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    let mut config = PipelineConfig::load(config_path)?;
    if let Some(input) = input {
        config.input.path = input;
    }

    match config.validate() {
        Ok(()) => {
            println!("✅ Configuration is valid!");

            if verbose {
                println!("\n📋 Parsed configuration:");
                println!("{}", "=".repeat(60));
                match toml::to_string_pretty(&config) {
                    Ok(s) => println!("{}", s),
                    Err(e) => println!("Failed to serialize: {}", e),
                }
            }

            println!("\n📊 Configuration Summary:");
            println!("  • Input: {}", config.input.path);
            println!("  • Sink: {:?}", config.sink.kind);
            println!("  • Tiers (k): {}", config.clustering.k);
            println!("  • Seed: {}", config.clustering.seed);
            println!(
                "  • Parallelism: {}",
                if config.parallelism.enabled { "rayon" } else { "sequential" }
            );
            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed!");
            println!("Error: {}", e);
            Err(LogstatsError::Config(e))
        }
    }
}

/// Handle the generate-config subcommand
fn handle_generate_config(output: Option<&Path>) -> LogstatsResult<()> {
    let config_str = PipelineConfig::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &config_str)?;
            println!("✅ Default configuration written to: {}", path.display());
        }
        None => {
            println!("{}", config_str);
        }
    }

    Ok(())
}

/// Handle the version subcommand
fn handle_version() {
    println!("📈 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    println!();
    println!("Build Information:");
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
    println!(
        "  • Elasticsearch sink: {}",
        if cfg!(feature = "elasticsearch") { "enabled" } else { "disabled" }
    );
    println!();
    println!("Pipeline:");
    println!("  • JSON-lines ingest with malformed-record accounting");
    println!("  • Hourly per-application aggregation");
    println!("  • Seeded k-means performance tiers");
    println!();
    println!("License: MIT");
}

fn print_report(report: &PipelineReport) {
    println!();
    println!("📊 Run Summary:");
    println!("  • Files read: {}", report.ingest.files);
    println!("  • Records accepted: {}", report.ingest.accepted);
    println!("  • Records dropped: {}", report.ingest.rejected);
    println!("  • Groups: {}", report.group_count());
    if report.excluded_groups > 0 {
        println!("  • Groups excluded (no samples): {}", report.excluded_groups);
    }
    println!(
        "  • Tiers: {} ({} iterations{})",
        report.clustering.effective_k,
        report.clustering.iterations,
        if report.clustering.converged { "" } else { ", not converged" }
    );
    for (label, centroid) in report.clustering.centroids.iter().enumerate() {
        println!("    - tier {}: {}", label, centroid);
    }
}

async fn handle_run(config: PipelineConfig) -> LogstatsResult<()> {
    config.validate()?;
    let sink = open_sink(&config.sink)?;
    let pipeline = Pipeline::new(config);

    let report = pipeline.run(sink.as_ref()).await?;

    let rows = pipeline.config().sink.summary_rows;
    if pipeline.config().sink.kind != SinkKind::Stdout && rows > 0 {
        print!("{}", render_summary(&report.records, rows));
    }
    print_report(&report);
    Ok(())
}

// ============================================================================
// SECTION 16: MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Subcommands that don't need logging
    match &cli.command {
        Commands::Version => {
            handle_version();
            return Ok(());
        }
        Commands::GenerateConfig { output } => {
            handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Commands::Validate { input, verbose } => {
            handle_validate(&cli.config, input.clone(), *verbose)?;
            return Ok(());
        }
        _ => {}
    }

    let (mut config, from_file) = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    init_logging(&logging_config)?;

    info!("📈 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    if !from_file {
        warn!("Config file not found at {}, using defaults", cli.config.display());
    }

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            handle_run(config).await.context("Pipeline run failed")?;
        }
        Commands::Generate {
            size,
            output,
            entries,
            seed,
        } => {
            let options = GeneratorOptions {
                size,
                entries,
                seed,
                end: None,
            };
            let summary = generate_file(&output, &options)
                .with_context(|| format!("Failed to generate {}", output.display()))?;
            println!(
                "✅ Wrote {} entries ({:.2} MB) to {}",
                summary.entries,
                summary.bytes as f64 / (1024.0 * 1024.0),
                summary.path.display()
            );
        }
        Commands::Version | Commands::GenerateConfig { .. } | Commands::Validate { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::parse_from([
            "logstats", "run", "logs/*.json", "--sink", "jsonl", "-o", "out.jsonl", "-k", "4",
            "--seed", "9", "--sequential",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut config = PipelineConfig::default();
        args.apply(&mut config);
        assert_eq!(config.input.path, "logs/*.json");
        assert_eq!(config.sink.kind, SinkKind::JsonLines);
        assert_eq!(config.sink.output_path.as_deref(), Some("out.jsonl"));
        assert_eq!(config.clustering.k, 4);
        assert_eq!(config.clustering.seed, 9);
        assert!(!config.parallelism.enabled);
        assert!(config.validate().is_ok());
    }
}
