//! Configuration management
//!
//! Every threshold the learning passes use is read from here. Values are
//! loaded from TOML, defaulted field by field, and validated before any pass
//! runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to locate project directories")]
    NoProjectDirs,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
    #[serde(default)]
    pub weights: WeightConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file; defaults to the project data dir
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Generator names (substring match) whose output is mostly styling
    #[serde(default = "default_styling_generators")]
    pub styling_generators: Vec<String>,
    /// Edit sources that denote pasting in external content
    #[serde(default = "default_bulk_paste_actions")]
    pub bulk_paste_actions: Vec<String>,
}

fn default_styling_generators() -> Vec<String> {
    ["style", "theme", "design", "ui-ux"].iter().map(|s| s.to_string()).collect()
}

fn default_bulk_paste_actions() -> Vec<String> {
    ["paste", "bulk-paste", "bulk_paste"].iter().map(|s| s.to_string()).collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            styling_generators: default_styling_generators(),
            bulk_paste_actions: default_bulk_paste_actions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Trailing window mined per pass, in days
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// Minimum support in (0, 1]
    #[serde(default = "default_min_support")]
    pub min_support: f64,
    /// Largest itemset size mined
    #[serde(default = "default_max_itemset_len")]
    pub max_itemset_len: usize,
    /// Records at or above this quality count as successes
    #[serde(default = "default_success_quality")]
    pub success_quality: f64,
    /// Explicit ratings at or above this count as positive
    #[serde(default = "default_success_rating")]
    pub success_rating: f64,
    /// Records below this quality count as failures
    #[serde(default = "default_failure_quality")]
    pub failure_quality: f64,
    /// Explicit ratings below this count as negative
    #[serde(default = "default_failure_rating")]
    pub failure_rating: f64,
    /// Sessions below this satisfaction were heavily modified
    #[serde(default = "default_failure_satisfaction")]
    pub failure_satisfaction: f64,
    /// A query sequence must precede this many successes to be reported
    #[serde(default = "default_min_sequence_count")]
    pub min_sequence_count: usize,
    /// Share of a sequence's runs that must succeed for it to be reported
    #[serde(default = "default_min_sequence_confidence")]
    pub min_sequence_confidence: f64,
    /// Top of the explicit rating scale; ratings run from 0 to this
    #[serde(default = "default_max_rating")]
    pub max_rating: f64,
    /// Patterns kept per category
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_window_days() -> i64 {
    30
}

fn default_min_support() -> f64 {
    0.1
}

fn default_max_itemset_len() -> usize {
    3
}

fn default_success_quality() -> f64 {
    0.85
}

fn default_success_rating() -> f64 {
    4.0
}

fn default_failure_quality() -> f64 {
    0.6
}

fn default_failure_rating() -> f64 {
    2.0
}

fn default_failure_satisfaction() -> f64 {
    50.0
}

fn default_min_sequence_count() -> usize {
    3
}

fn default_min_sequence_confidence() -> f64 {
    0.7
}

fn default_max_rating() -> f64 {
    5.0
}

fn default_top_n() -> usize {
    20
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            min_support: default_min_support(),
            max_itemset_len: default_max_itemset_len(),
            success_quality: default_success_quality(),
            success_rating: default_success_rating(),
            failure_quality: default_failure_quality(),
            failure_rating: default_failure_rating(),
            failure_satisfaction: default_failure_satisfaction(),
            min_sequence_count: default_min_sequence_count(),
            min_sequence_confidence: default_min_sequence_confidence(),
            max_rating: default_max_rating(),
            top_n: default_top_n(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConfig {
    /// Share of the previous weight kept per pass, in [0, 1)
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    #[serde(default = "default_usage_blend")]
    pub usage_blend: f64,
    #[serde(default = "default_quality_blend")]
    pub quality_blend: f64,
    #[serde(default = "default_feedback_blend")]
    pub feedback_blend: f64,
    /// Feedback score used for elements no session feedback touched
    #[serde(default = "default_neutral_feedback")]
    pub neutral_feedback: f64,
    /// Idle days before decay starts
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: f64,
    /// Days over which an idle weight drops by a factor of e
    #[serde(default = "default_half_life_scale")]
    pub half_life_scale: f64,
    /// Recent-vs-history usage ratio above which an element is rising
    #[serde(default = "default_growth_threshold")]
    pub growth_threshold: f64,
    /// Look-back for the first pass when no watermark exists yet
    #[serde(default = "default_initial_window_days")]
    pub initial_window_days: i64,
}

fn default_smoothing() -> f64 {
    0.3
}

fn default_usage_blend() -> f64 {
    0.4
}

fn default_quality_blend() -> f64 {
    0.4
}

fn default_feedback_blend() -> f64 {
    0.2
}

fn default_neutral_feedback() -> f64 {
    0.5
}

fn default_grace_period_days() -> f64 {
    14.0
}

fn default_half_life_scale() -> f64 {
    // ln(2) scale for a 60 day half-life
    60.0 / std::f64::consts::LN_2
}

fn default_growth_threshold() -> f64 {
    1.5
}

fn default_initial_window_days() -> i64 {
    30
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            smoothing: default_smoothing(),
            usage_blend: default_usage_blend(),
            quality_blend: default_quality_blend(),
            feedback_blend: default_feedback_blend(),
            neutral_feedback: default_neutral_feedback(),
            grace_period_days: default_grace_period_days(),
            half_life_scale: default_half_life_scale(),
            growth_threshold: default_growth_threshold(),
            initial_window_days: default_initial_window_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Combined similarity needed before anything transfers (inclusive)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_jaccard_blend")]
    pub jaccard_blend: f64,
    #[serde(default = "default_pattern_blend")]
    pub pattern_blend: f64,
    #[serde(default = "default_structural_blend")]
    pub structural_blend: f64,
}

fn default_similarity_threshold() -> f64 {
    0.6
}

fn default_jaccard_blend() -> f64 {
    0.4
}

fn default_pattern_blend() -> f64 {
    0.4
}

fn default_structural_blend() -> f64 {
    0.2
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            jaccard_blend: default_jaccard_blend(),
            pattern_blend: default_pattern_blend(),
            structural_blend: default_structural_blend(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Largest weight move in a pass above which more smoothing is suggested
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: f64,
    /// How far one suggestion raises `weights.smoothing`
    #[serde(default = "default_smoothing_step")]
    pub smoothing_step: f64,
    /// How far one suggestion raises `patterns.success_quality`
    #[serde(default = "default_threshold_step")]
    pub threshold_step: f64,
    /// Records the weight table must have seen before thresholds are tuned
    #[serde(default = "default_min_records_for_tuning")]
    pub min_records_for_tuning: u64,
    /// Mean weight above which the success threshold is raised
    #[serde(default = "default_high_mean_weight")]
    pub high_mean_weight: f64,
    /// Query domains every search order must include
    #[serde(default = "default_essential_domains")]
    pub essential_domains: Vec<String>,
    /// Query-domain order handed to generators; empty until first tuned
    #[serde(default)]
    pub search_priority: Vec<String>,
}

fn default_volatility_threshold() -> f64 {
    0.15
}

fn default_smoothing_step() -> f64 {
    0.1
}

fn default_threshold_step() -> f64 {
    0.05
}

fn default_min_records_for_tuning() -> u64 {
    50
}

fn default_high_mean_weight() -> f64 {
    0.85
}

fn default_essential_domains() -> Vec<String> {
    ["product", "style", "color", "typography"].iter().map(|s| s.to_string()).collect()
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            volatility_threshold: default_volatility_threshold(),
            smoothing_step: default_smoothing_step(),
            threshold_step: default_threshold_step(),
            min_records_for_tuning: default_min_records_for_tuning(),
            high_mean_weight: default_high_mean_weight(),
            essential_domains: default_essential_domains(),
            search_priority: Vec::new(),
        }
    }
}

impl LearningConfig {
    /// Load from an explicit path, or from the default location if present.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match config_path() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("{}, using default config", e);
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: LearningConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Database file to open
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.database_path {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir()?.join("learning.db")),
        }
    }

    /// Reject out-of-range values before any work starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.patterns;
        if !(p.min_support > 0.0 && p.min_support <= 1.0) {
            return invalid(format!("patterns.min_support must be in (0, 1], got {}", p.min_support));
        }
        if p.max_itemset_len == 0 {
            return invalid("patterns.max_itemset_len must be at least 1".to_string());
        }
        if p.window_days <= 0 {
            return invalid("patterns.window_days must be positive".to_string());
        }
        unit_interval("patterns.success_quality", p.success_quality)?;
        unit_interval("patterns.failure_quality", p.failure_quality)?;
        if p.failure_quality > p.success_quality {
            return invalid("patterns.failure_quality must not exceed patterns.success_quality".to_string());
        }
        if !(0.0..=100.0).contains(&p.failure_satisfaction) {
            return invalid("patterns.failure_satisfaction must be in [0, 100]".to_string());
        }
        if p.min_sequence_count == 0 || p.top_n == 0 {
            return invalid("patterns.min_sequence_count and patterns.top_n must be at least 1".to_string());
        }
        unit_interval("patterns.min_sequence_confidence", p.min_sequence_confidence)?;
        if !(p.max_rating > 0.0 && p.max_rating.is_finite()) {
            return invalid(format!("patterns.max_rating must be positive, got {}", p.max_rating));
        }
        for (name, value) in [
            ("patterns.success_rating", p.success_rating),
            ("patterns.failure_rating", p.failure_rating),
        ] {
            if !(0.0..=p.max_rating).contains(&value) {
                return invalid(format!("{} must be in [0, {}], got {}", name, p.max_rating, value));
            }
        }
        if p.failure_rating > p.success_rating {
            return invalid("patterns.failure_rating must not exceed patterns.success_rating".to_string());
        }

        let w = &self.weights;
        if !(0.0..1.0).contains(&w.smoothing) {
            return invalid(format!("weights.smoothing must be in [0, 1), got {}", w.smoothing));
        }
        unit_interval("weights.usage_blend", w.usage_blend)?;
        unit_interval("weights.quality_blend", w.quality_blend)?;
        unit_interval("weights.feedback_blend", w.feedback_blend)?;
        unit_interval("weights.neutral_feedback", w.neutral_feedback)?;
        let blend = w.usage_blend + w.quality_blend + w.feedback_blend;
        if (blend - 1.0).abs() > 1e-6 {
            return invalid(format!("weights blend factors must sum to 1, got {}", blend));
        }
        if !(w.grace_period_days >= 0.0) {
            return invalid("weights.grace_period_days must not be negative".to_string());
        }
        if !(w.half_life_scale > 0.0) {
            return invalid("weights.half_life_scale must be positive".to_string());
        }
        if !(w.growth_threshold > 0.0) {
            return invalid("weights.growth_threshold must be positive".to_string());
        }
        if w.initial_window_days <= 0 {
            return invalid("weights.initial_window_days must be positive".to_string());
        }

        let t = &self.transfer;
        unit_interval("transfer.similarity_threshold", t.similarity_threshold)?;
        unit_interval("transfer.jaccard_blend", t.jaccard_blend)?;
        unit_interval("transfer.pattern_blend", t.pattern_blend)?;
        unit_interval("transfer.structural_blend", t.structural_blend)?;
        if t.jaccard_blend + t.pattern_blend + t.structural_blend <= 0.0 {
            return invalid("transfer blend factors must not all be zero".to_string());
        }

        let e = &self.evolution;
        if !(e.volatility_threshold > 0.0 && e.volatility_threshold <= 1.0) {
            return invalid(format!(
                "evolution.volatility_threshold must be in (0, 1], got {}",
                e.volatility_threshold
            ));
        }
        for (name, step) in [
            ("evolution.smoothing_step", e.smoothing_step),
            ("evolution.threshold_step", e.threshold_step),
        ] {
            if !(step > 0.0 && step < 1.0) {
                return invalid(format!("{} must be in (0, 1), got {}", name, step));
            }
        }
        unit_interval("evolution.high_mean_weight", e.high_mean_weight)?;

        Ok(())
    }
}

fn invalid(message: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(message))
}

fn unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        invalid(format!("{} must be in [0, 1], got {}", name, value))
    }
}

fn project_dirs() -> Result<directories::ProjectDirs, ConfigError> {
    directories::ProjectDirs::from("com", "design-evolve", "design-evolve")
        .ok_or(ConfigError::NoProjectDirs)
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}
