//! Read-only reports over stored records
//!
//! Feedback summaries by time window and the quality trend of recent
//! generations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::memory::{LearningStore, StoreError};
use crate::types::{ExecutionRecord, FeedbackRecord, GeneratorStats};

/// Fewer records than this always read as stable
const MIN_TREND_RECORDS: usize = 10;
const TREND_DELTA: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTrend {
    Improving,
    Declining,
    Stable,
}

impl std::fmt::Display for QualityTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QualityTrend::Improving => "improving",
            QualityTrend::Declining => "declining",
            QualityTrend::Stable => "stable",
        };
        f.write_str(s)
    }
}

/// Compare mean quality of the later half of the records with the earlier half
pub fn quality_trend(records: &[ExecutionRecord]) -> QualityTrend {
    if records.len() < MIN_TREND_RECORDS {
        return QualityTrend::Stable;
    }

    let mut sorted: Vec<&ExecutionRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);

    let mid = sorted.len() / 2;
    let mean = |rs: &[&ExecutionRecord]| rs.iter().map(|r| r.quality_score).sum::<f64>() / rs.len() as f64;
    let delta = mean(&sorted[mid..]) - mean(&sorted[..mid]);

    if delta > TREND_DELTA {
        QualityTrend::Improving
    } else if delta < -TREND_DELTA {
        QualityTrend::Declining
    } else {
        QualityTrend::Stable
    }
}

/// Quality of generations over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub records: usize,
    pub mean_quality: f64,
    pub trend: QualityTrend,
    /// Mean quality per generator
    pub by_generator: BTreeMap<String, f64>,
}

impl QualityReport {
    pub fn from_records(records: &[ExecutionRecord]) -> Self {
        let mut grouped: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for r in records {
            let entry = grouped.entry(r.generator_name.clone()).or_insert((0.0, 0));
            entry.0 += r.quality_score;
            entry.1 += 1;
        }

        let mean_quality = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.quality_score).sum::<f64>() / records.len() as f64
        };

        Self {
            records: records.len(),
            mean_quality,
            trend: quality_trend(records),
            by_generator: grouped
                .into_iter()
                .map(|(generator, (sum, n))| (generator, sum / n as f64))
                .collect(),
        }
    }
}

/// Aggregate of the feedback recorded over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub sessions: usize,
    pub mean_satisfaction: Option<f64>,
    pub mean_rating: Option<f64>,
    pub rated_sessions: usize,
    /// Sessions nobody had to edit
    pub untouched_sessions: usize,
    pub generators: BTreeMap<String, GeneratorStats>,
}

impl FeedbackSummary {
    pub fn from_records(from: DateTime<Utc>, to: DateTime<Utc>, records: &[FeedbackRecord]) -> Self {
        let in_window: Vec<&FeedbackRecord> = records
            .iter()
            .filter(|r| r.timestamp >= from && r.timestamp < to)
            .collect();

        let ratings: Vec<f64> = in_window.iter().filter_map(|r| r.user_rating).collect();
        let mut generators: BTreeMap<String, GeneratorStats> = BTreeMap::new();
        for record in &in_window {
            for (generator, stats) in &record.generator_stats {
                merge_stats(generators.entry(generator.clone()).or_default(), stats);
            }
        }

        Self {
            from,
            to,
            sessions: in_window.len(),
            mean_satisfaction: mean(in_window.iter().map(|r| r.satisfaction)),
            mean_rating: mean(ratings.iter().copied()),
            rated_sessions: ratings.len(),
            untouched_sessions: in_window.iter().filter(|r| r.satisfaction >= 100.0).count(),
            generators,
        }
    }

    pub fn load(store: &LearningStore, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, StoreError> {
        let records = store.feedback_between(from, to)?;
        debug!("Summarizing {} feedback records", records.len());
        Ok(Self::from_records(from, to, &records))
    }
}

/// Fold `other` into `acc`, keeping the mean change weighted by modification count
fn merge_stats(acc: &mut GeneratorStats, other: &GeneratorStats) {
    let total = acc.modifications + other.modifications;
    if total > 0 {
        acc.mean_change_percentage = (acc.mean_change_percentage * acc.modifications as f64
            + other.mean_change_percentage * other.modifications as f64)
            / total as f64;
    }
    acc.modifications = total;
    acc.total_modified_lines += other.total_modified_lines;
    for (category, count) in &other.category_histogram {
        *acc.category_histogram.entry(category.clone()).or_insert(0) += count;
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}
