//! Element weight optimizer
//!
//! Keeps one relevance weight per element. Each pass blends how often an
//! element was used, how well the generations using it scored and how much
//! their sessions were edited, smooths the result against the previous
//! weight, and lets elements nobody uses any more decay toward zero.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::patterns::{enrich, EnrichedRecord};
use super::PassError;
use crate::config::WeightConfig;
use crate::memory::{LearningStore, StoreError, WEIGHTS_TABLE};
use crate::types::{ElementWeight, ScoredGeneration, Trend};

/// In-memory copy of the persisted weight table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightTable {
    pub weights: BTreeMap<String, ElementWeight>,
    /// Highest execution sequence already consumed
    pub watermark: Option<i64>,
    /// Records consumed over the table's whole history
    pub records_seen: u64,
    pub version: u64,
    pub last_run: Option<DateTime<Utc>>,
}

impl WeightTable {
    pub fn load(store: &LearningStore) -> Result<Self, StoreError> {
        let weights = store
            .load_weights()?
            .into_iter()
            .map(|w| (w.element.clone(), w))
            .collect();

        let mut table = Self {
            weights,
            ..Default::default()
        };
        if let Some(v) = store.table_version(WEIGHTS_TABLE)? {
            table.watermark = v.watermark;
            table.records_seen = v.records_seen;
            table.version = v.version;
            table.last_run = Some(v.updated_at);
        }
        Ok(table)
    }

    pub fn get(&self, element: &str) -> Option<f64> {
        self.weights.get(element).map(|w| w.weight)
    }

    /// Highest weights first, ties by element key
    pub fn top(&self, n: usize) -> Vec<&ElementWeight> {
        let mut all: Vec<&ElementWeight> = self.weights.values().collect();
        all.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.element.cmp(&b.element)));
        all.truncate(n);
        all
    }
}

/// One element's weight movement in a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightChange {
    pub element: String,
    pub previous: Option<f64>,
    pub current: f64,
}

impl WeightChange {
    pub fn delta(&self) -> f64 {
        self.current - self.previous.unwrap_or(0.0)
    }
}

/// Summary of one optimizer pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightUpdateReport {
    pub records_consumed: usize,
    pub elements_updated: usize,
    pub elements_added: usize,
    pub elements_decayed: usize,
    /// Elements flagged rising this pass
    pub rising: Vec<String>,
    /// Largest moves by |delta|, at most 20
    pub top_changes: Vec<WeightChange>,
    /// Moves of at least 0.05 in either direction
    pub significant_changes: usize,
    /// Table version written by the pass, 0 when not persisted
    pub version: u64,
}

const TOP_CHANGES: usize = 20;
const SIGNIFICANT_DELTA: f64 = 0.05;

#[derive(Default)]
struct ElementUsage {
    count: usize,
    quality_sum: f64,
    satisfaction: Vec<f64>,
    last_seen: Option<DateTime<Utc>>,
}

pub struct WeightOptimizer {
    config: WeightConfig,
}

impl WeightOptimizer {
    pub fn new(config: WeightConfig) -> Self {
        Self { config }
    }

    /// Multiplier for `days` of decay
    pub fn decay_factor(&self, days: f64) -> f64 {
        if days <= 0.0 {
            1.0
        } else {
            (-days / self.config.half_life_scale).exp()
        }
    }

    /// Fold a batch of new records into the table and decay idle elements
    pub fn update(
        &self,
        table: &mut WeightTable,
        batch: &[EnrichedRecord],
        now: DateTime<Utc>,
    ) -> WeightUpdateReport {
        let mut usage: BTreeMap<&str, ElementUsage> = BTreeMap::new();
        for r in batch {
            for element in r.elements_used() {
                let u = usage.entry(element.as_str()).or_default();
                u.count += 1;
                u.quality_sum += r.quality_score();
                if let Some(s) = r.satisfaction {
                    u.satisfaction.push(s);
                }
                u.last_seen = u.last_seen.max(Some(r.record.timestamp));
            }
        }

        let max_count = usage.values().map(|u| u.count).max().unwrap_or(0);
        let previous_seen = table.records_seen;
        let batch_len = batch.len();
        let mut report = WeightUpdateReport {
            records_consumed: batch_len,
            ..Default::default()
        };
        let mut changes = Vec::new();

        for (element, u) in &usage {
            let usage_score = u.count as f64 / max_count as f64;
            let quality_score = u.quality_sum / u.count as f64;
            let feedback_score = if u.satisfaction.is_empty() {
                self.config.neutral_feedback
            } else {
                u.satisfaction.iter().sum::<f64>() / u.satisfaction.len() as f64 / 100.0
            };
            let raw = self.config.usage_blend * usage_score
                + self.config.quality_blend * quality_score
                + self.config.feedback_blend * feedback_score;

            let existing = table.weights.get(*element);
            let previous = existing.map(|w| w.weight);
            let base = previous.unwrap_or(raw);
            let weight = clamp_weight(self.config.smoothing * base + (1.0 - self.config.smoothing) * raw);

            let trend = match existing {
                Some(w) if w.usage_count > 0 && previous_seen > 0 => {
                    let recent_share = u.count as f64 / batch_len as f64;
                    let expected_share = w.usage_count as f64 / previous_seen as f64;
                    if recent_share / expected_share > self.config.growth_threshold {
                        Trend::Rising
                    } else {
                        Trend::Steady
                    }
                }
                _ => Trend::Steady,
            };
            if trend == Trend::Rising {
                report.rising.push(element.to_string());
            }

            let last_seen = u.last_seen.unwrap_or(now);
            let entry = table
                .weights
                .entry(element.to_string())
                .or_insert_with(|| ElementWeight {
                    element: element.to_string(),
                    weight,
                    last_used: last_seen,
                    usage_count: 0,
                    quality_sum: 0.0,
                    trend: Trend::Steady,
                    decayed_at: None,
                });
            entry.weight = weight;
            entry.usage_count += u.count as u64;
            entry.quality_sum += u.quality_sum;
            entry.last_used = entry.last_used.max(last_seen);
            entry.trend = trend;
            entry.decayed_at = None;

            if previous.is_some() {
                report.elements_updated += 1;
            } else {
                report.elements_added += 1;
            }
            changes.push(WeightChange {
                element: element.to_string(),
                previous,
                current: weight,
            });
        }

        let seen: BTreeSet<&str> = usage.keys().copied().collect();
        for (element, w) in table.weights.iter_mut() {
            if seen.contains(element.as_str()) {
                continue;
            }
            w.trend = Trend::Steady;
            if let Some(change) = self.decay(w, now) {
                report.elements_decayed += 1;
                changes.push(change);
            }
        }

        table.records_seen = previous_seen + batch_len as u64;
        table.last_run = Some(now);

        report.significant_changes = changes
            .iter()
            .filter(|c| c.delta().abs() >= SIGNIFICANT_DELTA)
            .count();
        changes.sort_by(|a, b| {
            b.delta()
                .abs()
                .total_cmp(&a.delta().abs())
                .then_with(|| a.element.cmp(&b.element))
        });
        changes.truncate(TOP_CHANGES);
        report.top_changes = changes;

        debug!(
            "Weight update: {} added, {} updated, {} decayed",
            report.elements_added, report.elements_updated, report.elements_decayed
        );
        report
    }

    /// Decay an idle element relative to its last checkpoint.
    ///
    /// The first decay measures from `last_used`, later ones from the
    /// previous decay, so running the pass often compounds to the same
    /// factor as running it once.
    fn decay(&self, w: &mut ElementWeight, now: DateTime<Utc>) -> Option<WeightChange> {
        let idle = days_between(w.last_used, now);
        if idle <= self.config.grace_period_days {
            return None;
        }

        let checkpoint = w.decayed_at.unwrap_or(w.last_used);
        let elapsed = days_between(checkpoint, now);
        if elapsed <= 0.0 {
            return None;
        }

        let previous = w.weight;
        w.weight = clamp_weight(previous * self.decay_factor(elapsed));
        w.decayed_at = Some(now);

        Some(WeightChange {
            element: w.element.clone(),
            previous: Some(previous),
            current: w.weight,
        })
    }

    /// Run one incremental pass against the store and persist the new table.
    ///
    /// Consumes executions inserted since the table's watermark; the first
    /// pass starts `initial_window_days` back.
    pub fn run_pass(&self, store: &LearningStore, now: DateTime<Utc>) -> Result<WeightUpdateReport, PassError> {
        let mut table = WeightTable::load(store)?;

        let start = match table.watermark {
            Some(seq) => seq,
            None => store.last_seq_before(now - Duration::days(self.config.initial_window_days))?,
        };
        let stored = store.executions_after(start)?;
        let watermark = stored.last().map(|s| s.seq).unwrap_or(start);

        let records: Vec<_> = stored.into_iter().map(|s| s.record).collect();
        let sessions: BTreeSet<String> = records.iter().map(|r| r.session_id.clone()).collect();
        let feedback = store.feedback_for_sessions(&sessions)?;
        let batch = enrich(records, &feedback);

        let mut report = self.update(&mut table, &batch, now);

        let rows: Vec<ElementWeight> = table.weights.values().cloned().collect();
        report.version = store.replace_weights(&rows, watermark, table.records_seen, now)?;

        info!(
            "Weight pass consumed {} records: {} added, {} updated, {} decayed, {} significant (v{})",
            report.records_consumed,
            report.elements_added,
            report.elements_updated,
            report.elements_decayed,
            report.significant_changes,
            report.version
        );
        Ok(report)
    }
}

fn clamp_weight(w: f64) -> f64 {
    if w.is_nan() {
        0.0
    } else {
        w.clamp(0.0, 1.0)
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 86_400_000.0
}
