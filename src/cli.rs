//! CLI interface for design-evolve

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{self, LearningConfig};
use crate::feedback::{FeedbackCollector, IngestSummary};
use crate::learning::{
    profile_from_store, run_passes, AnalogueMap, ConfigEvolver, PatternMiner, Recommendation,
    TransferRecommender, WeightOptimizer, WeightTable,
};
use crate::memory::LearningStore;
use crate::metrics::{AbTest, FeedbackSummary, QualityReport, Sample};
use crate::types::PatternCategory;

#[derive(Parser)]
#[command(name = "design-evolve")]
#[command(about = "Learns element weights and usage patterns from how generated output is edited", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config dir)
    #[arg(long, global = true, env = "DESIGN_EVOLVE_CONFIG")]
    config: Option<PathBuf>,

    /// Database file (overrides storage.database_path)
    #[arg(long, global = true, env = "DESIGN_EVOLVE_DB")]
    db: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest JSON-lines records ("-" reads stdin)
    Ingest {
        #[arg(value_enum)]
        kind: IngestKind,
        /// Input file
        file: PathBuf,
    },
    /// Run the incremental weight pass
    Optimize,
    /// Run the pattern mining pass
    Mine,
    /// Run the weight pass, then the mining pass
    Run,
    /// Run both passes and suggest configuration changes
    Evolve {
        /// Write the evolved configuration to this file
        #[arg(short, long)]
        write: Option<PathBuf>,
    },
    /// Recommend patterns from similar domains
    Transfer {
        /// Target domain
        #[arg(short, long)]
        target: String,
        /// Source domain (default: every other domain seen in the window)
        #[arg(short, long)]
        source: Option<String>,
        /// JSON object mapping source element keys to target element keys
        #[arg(long)]
        analogues: Option<PathBuf>,
        /// Days of history used to build profiles
        #[arg(long, default_value = "90")]
        days: i64,
    },
    /// Show the highest-weighted elements
    Weights {
        #[arg(short, long, default_value = "20")]
        top: usize,
    },
    /// Show mined patterns
    Patterns {
        /// success, failure or sequence
        #[arg(short, long, default_value = "success")]
        category: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Summarize session feedback
    Feedback {
        #[arg(short, long, default_value = "7")]
        days: i64,
    },
    /// Quality of recent generations
    Report {
        #[arg(short, long, default_value = "30")]
        days: i64,
    },
    /// Compare two versions from JSON arrays of metric samples
    AbTest {
        /// Control group samples
        file_a: PathBuf,
        /// Treatment group samples
        file_b: PathBuf,
        /// Metric to compare (repeatable)
        #[arg(short, long)]
        metric: Vec<String>,
        #[arg(long, default_value = "0.95")]
        confidence: f64,
    },
    /// Show table sizes and versions
    Status,
    /// Show or initialize configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
        /// Write the default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum IngestKind {
    Executions,
    Edits,
    Sessions,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = LearningConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Commands that never touch the store
    match &cli.command {
        Commands::Config { show, init } => return config_command(&cli.config, &config, *show, *init),
        Commands::AbTest { file_a, file_b, metric, confidence } => {
            let a: Vec<Sample> = read_json(file_a)?;
            let b: Vec<Sample> = read_json(file_b)?;
            let report = AbTest::new(*confidence).analyze(&a, &b, metric);
            if cli.json {
                return print_json(&report);
            }
            println!("A/B Test ({}% confidence, A={} B={})", report.confidence_level * 100.0, report.samples_a, report.samples_b);
            println!("==================");
            for m in &report.metrics {
                println!("{}:", m.metric);
                println!("  A: {:.4} (± {:.4})", m.version_a.mean, m.version_a.std);
                println!("  B: {:.4} (± {:.4})", m.version_b.mean, m.version_b.std);
                println!("  Improvement: {:+.2}%  p={:.4}  d={:.3}", m.relative_improvement, m.p_value, m.effect_size);
            }
            println!();
            println!("Winner: {:?}", report.winner);
            println!("{}", report.recommendation());
            return Ok(());
        }
        _ => {}
    }

    let db_path = match &cli.db {
        Some(p) => p.clone(),
        None => config.database_path()?,
    };
    let store = Arc::new(
        LearningStore::open(&db_path).with_context(|| format!("Failed to open store at {}", db_path.display()))?,
    );
    let now = Utc::now();

    match cli.command {
        Commands::Ingest { kind, file } => {
            let reader = open_input(&file)?;
            let collector = FeedbackCollector::new(store.clone(), &config);
            let summary = match kind {
                IngestKind::Executions => collector.ingest_executions(reader),
                IngestKind::Edits => collector.ingest_edits(reader),
                IngestKind::Sessions => collector.ingest_sessions(reader),
            };
            if cli.json {
                return print_json(&summary);
            }
            print_ingest(&summary);
        }
        Commands::Optimize => {
            config.validate()?;
            let report = WeightOptimizer::new(config.weights.clone()).run_pass(&store, now)?;
            if cli.json {
                return print_json(&report);
            }
            println!("Weight pass (v{})", report.version);
            println!("  Records consumed: {}", report.records_consumed);
            println!("  Added: {}  Updated: {}  Decayed: {}", report.elements_added, report.elements_updated, report.elements_decayed);
            println!("  Significant changes: {}", report.significant_changes);
            if !report.rising.is_empty() {
                println!("  Rising: {}", report.rising.join(", "));
            }
            for change in report.top_changes.iter().take(10) {
                println!("    {:<32} {:+.3} -> {:.3}", change.element, change.delta(), change.current);
            }
        }
        Commands::Mine => {
            config.validate()?;
            let set = PatternMiner::new(config.patterns.clone()).mine(&store, now)?;
            if cli.json {
                return print_json(&set);
            }
            println!("Pattern pass over {} records", set.stats.window_records);
            println!("  Success: {} (from {} records)", set.success.len(), set.stats.success_records);
            println!("  Failure: {} (from {} records)", set.failure.len(), set.stats.failure_records);
            println!("  Sequence: {}", set.sequence.len());
        }
        Commands::Run => {
            let summary = run_passes(&store, &config, now)?;
            if cli.json {
                return print_json(&summary);
            }
            println!(
                "Weights v{}: {} records, {} significant changes",
                summary.weights.version, summary.weights.records_consumed, summary.weights.significant_changes
            );
            println!(
                "Patterns: {} success, {} failure, {} sequence",
                summary.patterns.success.len(),
                summary.patterns.failure.len(),
                summary.patterns.sequence.len()
            );
        }
        Commands::Evolve { write } => {
            let summary = run_passes(&store, &config, now)?;
            let table = WeightTable::load(&store)?;
            let report = ConfigEvolver::new(config.evolution.clone()).recommend(
                &config,
                &table,
                Some(&summary.weights),
                &summary.patterns.sequence,
                now,
            );
            if let Some(path) = &write {
                let evolved = report.apply_to(&config);
                evolved.validate()?;
                evolved.save(path)?;
            }
            if cli.json {
                return print_json(&report);
            }
            println!("Evolution over {} records", report.records_seen);
            if report.is_empty() {
                println!("  Configuration is up to date.");
            }
            for r in &report.recommendations {
                match r {
                    Recommendation::SearchPriority { recommended, .. } => {
                        println!("  {}: {}", r.key(), recommended.join(" > "))
                    }
                    Recommendation::Smoothing { current, recommended, .. }
                    | Recommendation::SuccessQuality { current, recommended, .. } => {
                        println!("  {}: {:.2} -> {:.2}", r.key(), current, recommended)
                    }
                }
                println!("      {}", r.reason());
            }
            if let Some(path) = &write {
                println!("Wrote evolved config to {}", path.display());
            }
        }
        Commands::Transfer { target, source, analogues, days } => {
            config.validate()?;
            let analogues: AnalogueMap = match analogues {
                Some(path) => read_json(&path)?,
                None => AnalogueMap::new(),
            };
            let from = now - Duration::days(days);
            let miner = PatternMiner::new(config.patterns.clone());
            let recommender = TransferRecommender::new(config.transfer.clone());
            let target_profile = profile_from_store(&store, &target, &miner, from, now)?;

            let sources: Vec<String> = match source {
                Some(s) => vec![s],
                None => store
                    .executions_between(from, now)?
                    .into_iter()
                    .filter_map(|r| r.domain.map(|d| d.to_lowercase()))
                    .filter(|d| !d.eq_ignore_ascii_case(&target))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
            };
            if sources.is_empty() {
                bail!("No source domains found in the last {} days", days);
            }

            let mut reports = Vec::new();
            for s in &sources {
                let profile = profile_from_store(&store, s, &miner, from, now)?;
                reports.push(recommender.recommend(&profile, &target_profile, &analogues));
            }
            if cli.json {
                return print_json(&reports);
            }
            for report in &reports {
                println!(
                    "{} -> {}: similarity {:.3} (threshold {:.2})",
                    report.source_domain, report.target_domain, report.similarity.combined, report.threshold
                );
                for t in &report.transferred {
                    println!("    {:.3}  {}", t.adaptation_confidence, t.pattern.items.join(" + "));
                }
            }
        }
        Commands::Weights { top } => {
            let weights = store.top_weights(top)?;
            if cli.json {
                return print_json(&weights);
            }
            if weights.is_empty() {
                println!("No weights yet. Run `design-evolve optimize` first.");
            }
            for w in &weights {
                println!(
                    "  {:<32} {:.3}  used {:>4}x  q={:.2}  {}",
                    w.element,
                    w.weight,
                    w.usage_count,
                    w.mean_quality(),
                    w.trend.as_str()
                );
            }
        }
        Commands::Patterns { category, limit } => {
            let Some(category) = PatternCategory::parse(&category) else {
                bail!("Unknown pattern category '{}': use success, failure or sequence", category);
            };
            let mut patterns = store.patterns_by_category(category)?;
            patterns.truncate(limit);
            if cli.json {
                return print_json(&patterns);
            }
            if patterns.is_empty() {
                println!("No {} patterns.", category);
            }
            for p in &patterns {
                println!(
                    "  {:>5.1}%  conf {:.2}  q={:.2}  {}",
                    p.support * 100.0,
                    p.confidence,
                    p.mean_quality,
                    p.key()
                );
            }
        }
        Commands::Feedback { days } => {
            let summary = FeedbackSummary::load(&store, now - Duration::days(days), now)?;
            if cli.json {
                return print_json(&summary);
            }
            println!("Feedback (last {} days)", days);
            println!("==================");
            println!("Sessions: {}", summary.sessions);
            if let Some(s) = summary.mean_satisfaction {
                println!("Mean satisfaction: {:.1}", s);
            }
            if let Some(r) = summary.mean_rating {
                println!("Mean rating: {:.2} ({} rated)", r, summary.rated_sessions);
            }
            println!("Untouched sessions: {}", summary.untouched_sessions);
            for (generator, stats) in &summary.generators {
                println!(
                    "  {:<24} {} edits, {:.1}% mean change",
                    generator, stats.modifications, stats.mean_change_percentage
                );
            }
        }
        Commands::Report { days } => {
            let records = store.executions_between(now - Duration::days(days), now)?;
            let report = QualityReport::from_records(&records);
            if cli.json {
                return print_json(&report);
            }
            println!("Quality (last {} days)", days);
            println!("==================");
            println!("Generations: {}", report.records);
            println!("Mean quality: {:.3}", report.mean_quality);
            println!("Trend: {}", report.trend);
            for (generator, q) in &report.by_generator {
                println!("  {:<24} {:.3}", generator, q);
            }
        }
        Commands::Status => {
            let stats = store.stats()?;
            println!("Store: {}", db_path.display());
            println!("Executions: {}", stats.executions);
            println!("Modifications: {}", stats.modifications);
            println!("Feedback: {}", stats.feedback);
            println!("Weights: {}", stats.weights);
            println!("Patterns: {}", stats.patterns);
            if let Some(v) = store.table_version(crate::memory::WEIGHTS_TABLE)? {
                println!(
                    "Weight table v{} updated {} (watermark {})",
                    v.version,
                    v.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    v.watermark.unwrap_or(0)
                );
            }
        }
        Commands::Config { .. } | Commands::AbTest { .. } => {}
    }

    Ok(())
}

fn config_command(path: &Option<PathBuf>, config: &LearningConfig, show: bool, init: bool) -> Result<()> {
    if init {
        let target = match path {
            Some(p) => p.clone(),
            None => config::config_path()?,
        };
        if target.exists() {
            println!("Config already exists at {}", target.display());
        } else {
            LearningConfig::default().save(&target)?;
            println!("Wrote default config to {}", target.display());
        }
    }
    if show || !init {
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(std::io::stdin())));
    }
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_ingest(summary: &IngestSummary) {
    println!(
        "Read {} records: {} stored, {} duplicate, {} skipped",
        summary.read, summary.stored, summary.duplicates, summary.skipped
    );
}
