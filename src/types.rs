//! Shared types used across modules
//!
//! Records crossing the boundary between the event collectors, the learning
//! passes and the persisted tables live here so that `feedback`, `learning`
//! and `memory` can depend on them without depending on each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::feedback::diff::DiffStats;

/// Anything that produced output the learning loop can score.
///
/// The core only ever looks at which elements went into a generation and how
/// well it scored; generator internals stay outside.
pub trait ScoredGeneration {
    fn elements_used(&self) -> &BTreeSet<String>;
    fn quality_score(&self) -> f64;
}

impl<T: ScoredGeneration + ?Sized> ScoredGeneration for &T {
    fn elements_used(&self) -> &BTreeSet<String> {
        (**self).elements_used()
    }

    fn quality_score(&self) -> f64 {
        (**self).quality_score()
    }
}

/// Pulls normalized `category:value` element keys out of a generator's output.
///
/// Real extractors are per output format and live with the generators; the
/// core only ships the trivial tag-list form.
pub trait ElementExtractor {
    fn extract(&self, output: &str) -> BTreeSet<String>;
}

/// Accepts output that is already a list of `category:value` tags separated by
/// whitespace or commas. Tokens without a category are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagListExtractor;

impl ElementExtractor for TagListExtractor {
    fn extract(&self, output: &str) -> BTreeSet<String> {
        output
            .split(|c: char| c.is_whitespace() || c == ',')
            .map(str::trim)
            .filter(|token| {
                token
                    .split_once(':')
                    .is_some_and(|(category, value)| !category.is_empty() && !value.is_empty())
            })
            .map(|token| token.to_lowercase())
            .collect()
    }
}

/// Why a record was rejected or could not be read back
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("execution has no id")]
    MissingId,

    #[error("execution {0} has no session_id")]
    MissingSession(String),

    #[error("execution {id} has quality_score {value} outside [0, 1]")]
    QualityOutOfRange { id: String, value: f64 },

    #[error("bad timestamp '{0}'")]
    Timestamp(String),

    #[error("unknown severity '{0}'")]
    Severity(String),

    #[error("malformed column: {0}")]
    Json(#[from] serde_json::Error),
}

/// One scored generation, appended after each run of a generator.
///
/// Producers may leave `id` out; the collector then derives one from the
/// record's content so a replayed stream stays idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    #[serde(default)]
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub generator_name: String,
    #[serde(default)]
    pub elements_used: BTreeSet<String>,
    /// Quality in [0, 1]
    pub quality_score: f64,
    /// Wall-clock duration in milliseconds
    #[serde(default, rename = "duration", alias = "duration_ms")]
    pub duration_ms: u64,
    /// Categorical generation context (e.g. "saas", "dashboard")
    #[serde(default)]
    pub domain: Option<String>,
    /// Ordered query-domain tags issued before producing output
    #[serde(default)]
    pub query_domains: Vec<String>,
}

impl ExecutionRecord {
    pub fn new(session_id: &str, generator_name: &str, quality_score: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            generator_name: generator_name.to_string(),
            elements_used: BTreeSet::new(),
            quality_score,
            duration_ms: 0,
            domain: None,
            query_domains: Vec::new(),
        }
    }

    pub fn with_elements<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements_used = elements.into_iter().map(Into::into).collect();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn in_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_domains = queries.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Check the fields a batch pass relies on
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.id.is_empty() {
            return Err(RecordError::MissingId);
        }
        if self.session_id.trim().is_empty() {
            return Err(RecordError::MissingSession(self.id.clone()));
        }
        if !self.quality_score.is_finite() || !(0.0..=1.0).contains(&self.quality_score) {
            return Err(RecordError::QualityOutOfRange {
                id: self.id.clone(),
                value: self.quality_score,
            });
        }
        Ok(())
    }
}

impl ScoredGeneration for ExecutionRecord {
    fn elements_used(&self) -> &BTreeSet<String> {
        &self.elements_used
    }

    fn quality_score(&self) -> f64 {
        self.quality_score
    }
}

/// A file edit observed after generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEditEvent {
    pub file_path: String,
    pub generated_by: String,
    /// Missing for files created by the edit
    #[serde(default)]
    pub previous_content: Option<String>,
    pub new_content: String,
    #[serde(default)]
    pub edit_type: String,
    #[serde(default)]
    pub user_action: String,
    pub session_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// A file touched during a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedFile {
    pub path: String,
    pub generated_by: String,
}

/// Emitted once when a session closes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndEvent {
    pub session_id: String,
    #[serde(default)]
    pub files_modified: Vec<ModifiedFile>,
    /// Explicit rating, if the user gave one
    #[serde(default)]
    pub user_rating: Option<f64>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Severity band of a modification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Trivial,
    Minor,
    Moderate,
    Major,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trivial => "trivial",
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Major => "major",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trivial" => Some(Severity::Trivial),
            "minor" => Some(Severity::Minor),
            "moderate" => Some(Severity::Moderate),
            "major" => Some(Severity::Major),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diff of one file edit plus its classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationRecord {
    pub id: String,
    pub session_id: String,
    pub file_path: String,
    pub generated_by: String,
    pub edit_source: String,
    /// Content hash of the snapshot before the edit
    pub before_ref: String,
    /// Content hash of the snapshot after the edit
    pub after_ref: String,
    pub stats: DiffStats,
    pub categories: BTreeSet<String>,
    pub severity: Severity,
    /// Set when the diff could not be computed
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-generator aggregate over a set of modifications
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorStats {
    pub modifications: usize,
    pub total_modified_lines: usize,
    pub mean_change_percentage: f64,
    pub category_histogram: BTreeMap<String, usize>,
}

/// Implicit (and optionally explicit) feedback for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// Satisfaction in [0, 100]
    pub satisfaction: f64,
    #[serde(default)]
    pub user_rating: Option<f64>,
    #[serde(default)]
    pub generator_stats: BTreeMap<String, GeneratorStats>,
}

/// Usage trend of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    #[default]
    Steady,
    Rising,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Steady => "steady",
            Trend::Rising => "rising",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "rising" => Trend::Rising,
            _ => Trend::Steady,
        }
    }
}

/// Relevance weight of a single element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementWeight {
    pub element: String,
    /// Weight in [0, 1]
    pub weight: f64,
    pub last_used: DateTime<Utc>,
    /// Cumulative usage across all passes
    pub usage_count: u64,
    /// Sum of quality scores of every recorded use
    pub quality_sum: f64,
    #[serde(default)]
    pub trend: Trend,
    /// When decay was last applied; cleared on use
    #[serde(default)]
    pub decayed_at: Option<DateTime<Utc>>,
}

impl ElementWeight {
    pub fn mean_quality(&self) -> f64 {
        if self.usage_count == 0 {
            0.0
        } else {
            self.quality_sum / self.usage_count as f64
        }
    }
}

/// Kind of mined pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    Success,
    Failure,
    Sequence,
}

impl PatternCategory {
    pub fn all() -> [PatternCategory; 3] {
        [PatternCategory::Success, PatternCategory::Failure, PatternCategory::Sequence]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternCategory::Success => "success",
            PatternCategory::Failure => "failure",
            PatternCategory::Sequence => "sequence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "success" => Some(PatternCategory::Success),
            "failure" | "anti" | "anti_pattern" => Some(PatternCategory::Failure),
            "sequence" => Some(PatternCategory::Sequence),
            _ => None,
        }
    }
}

impl std::fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mined element combination or query sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Sorted for itemsets, in order for sequences
    pub items: Vec<String>,
    /// Support in (0, 1]
    pub support: f64,
    pub confidence: f64,
    pub category: PatternCategory,
    pub occurrences: usize,
    pub mean_quality: f64,
    #[serde(default)]
    pub mean_satisfaction: Option<f64>,
}

impl Pattern {
    /// Stable identity of the pattern across domains
    pub fn key(&self) -> String {
        let sep = match self.category {
            PatternCategory::Sequence => " > ",
            _ => " + ",
        };
        format!("{}:{}", self.category, self.items.join(sep))
    }
}
