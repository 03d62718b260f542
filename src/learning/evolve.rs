//! Configuration evolution
//!
//! Reads what the learning passes left behind and suggests configuration
//! changes: a query-domain search order built from mined sequences, more
//! smoothing when weights swing hard between passes, and a stricter success
//! bar once the weight table has settled high. Suggestions are never applied
//! on their own; callers write them out explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::weights::{WeightTable, WeightUpdateReport};
use crate::config::{EvolutionConfig, LearningConfig};
use crate::types::{Pattern, PatternCategory};

/// Smoothing is never pushed past this
const MAX_SMOOTHING: f64 = 0.9;

/// One suggested configuration change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "parameter", rename_all = "snake_case")]
pub enum Recommendation {
    /// Raise `weights.smoothing`
    Smoothing {
        current: f64,
        recommended: f64,
        /// Largest move of an existing weight in the last pass
        max_change: f64,
    },
    /// Raise `patterns.success_quality`
    SuccessQuality {
        current: f64,
        recommended: f64,
        mean_weight: f64,
    },
    /// Replace `evolution.search_priority`
    SearchPriority {
        current: Vec<String>,
        recommended: Vec<String>,
    },
}

impl Recommendation {
    /// Config key the recommendation changes
    pub fn key(&self) -> &'static str {
        match self {
            Recommendation::Smoothing { .. } => "weights.smoothing",
            Recommendation::SuccessQuality { .. } => "patterns.success_quality",
            Recommendation::SearchPriority { .. } => "evolution.search_priority",
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Recommendation::Smoothing { max_change, .. } => format!(
                "weights moved by up to {:.3} in one pass, smooth harder",
                max_change
            ),
            Recommendation::SuccessQuality { mean_weight, .. } => format!(
                "mean element weight {:.3} is consistently high, raise the success bar",
                mean_weight
            ),
            Recommendation::SearchPriority { .. } => {
                "ordered by position and success rate in mined query sequences".to_string()
            }
        }
    }

    pub fn apply(&self, config: &mut LearningConfig) {
        match self {
            Recommendation::Smoothing { recommended, .. } => config.weights.smoothing = *recommended,
            Recommendation::SuccessQuality { recommended, .. } => {
                config.patterns.success_quality = *recommended
            }
            Recommendation::SearchPriority { recommended, .. } => {
                config.evolution.search_priority = recommended.clone()
            }
        }
    }
}

/// Suggestions from one evolution run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionReport {
    pub generated_at: DateTime<Utc>,
    /// Records the weight table had consumed when the report was made
    pub records_seen: u64,
    pub recommendations: Vec<Recommendation>,
}

impl EvolutionReport {
    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty()
    }

    /// Copy of `config` with every recommendation applied
    pub fn apply_to(&self, config: &LearningConfig) -> LearningConfig {
        let mut evolved = config.clone();
        for r in &self.recommendations {
            r.apply(&mut evolved);
        }
        evolved
    }
}

/// Order query domains by how early and how reliably they show up in
/// successful sequences.
///
/// Each sequence adds `(len - position) * confidence` to every domain in it.
/// Ties go alphabetically; essential domains missing from every sequence are
/// appended in their given order.
pub fn search_priority(sequences: &[Pattern], essential: &[String]) -> Vec<String> {
    let mut scores: BTreeMap<&str, f64> = BTreeMap::new();
    for p in sequences.iter().filter(|p| p.category == PatternCategory::Sequence) {
        let len = p.items.len();
        for (i, domain) in p.items.iter().enumerate() {
            *scores.entry(domain.as_str()).or_insert(0.0) += (len - i) as f64 * p.confidence;
        }
    }

    let mut ranked: Vec<(&str, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut order: Vec<String> = ranked.into_iter().map(|(d, _)| d.to_string()).collect();
    for domain in essential {
        if !order.contains(domain) {
            order.push(domain.clone());
        }
    }
    order
}

pub struct ConfigEvolver {
    config: EvolutionConfig,
}

impl ConfigEvolver {
    pub fn new(config: EvolutionConfig) -> Self {
        Self { config }
    }

    /// Suggest changes to `current` from the weight table, the report of
    /// the pass that wrote it (if known) and the mined sequence patterns
    pub fn recommend(
        &self,
        current: &LearningConfig,
        table: &WeightTable,
        last_pass: Option<&WeightUpdateReport>,
        sequences: &[Pattern],
        now: DateTime<Utc>,
    ) -> EvolutionReport {
        let mut recommendations = Vec::new();

        if let Some(r) = self.smoothing(current, last_pass) {
            recommendations.push(r);
        }
        if let Some(r) = self.success_quality(current, table) {
            recommendations.push(r);
        }

        let order = search_priority(sequences, &self.config.essential_domains);
        if order != current.evolution.search_priority {
            recommendations.push(Recommendation::SearchPriority {
                current: current.evolution.search_priority.clone(),
                recommended: order,
            });
        }

        info!("Evolution run produced {} recommendations", recommendations.len());
        EvolutionReport {
            generated_at: now,
            records_seen: table.records_seen,
            recommendations,
        }
    }

    fn smoothing(&self, current: &LearningConfig, last_pass: Option<&WeightUpdateReport>) -> Option<Recommendation> {
        // New elements have no previous weight to swing from
        let max_change = last_pass?
            .top_changes
            .iter()
            .filter(|c| c.previous.is_some())
            .map(|c| c.delta().abs())
            .fold(0.0, f64::max);
        if max_change <= self.config.volatility_threshold {
            return None;
        }

        let smoothing = current.weights.smoothing;
        let recommended = (smoothing + self.config.smoothing_step).min(MAX_SMOOTHING);
        if recommended <= smoothing {
            debug!("Weights volatile ({:.3}) but smoothing already at {}", max_change, smoothing);
            return None;
        }
        Some(Recommendation::Smoothing {
            current: smoothing,
            recommended,
            max_change,
        })
    }

    fn success_quality(&self, current: &LearningConfig, table: &WeightTable) -> Option<Recommendation> {
        if table.records_seen <= self.config.min_records_for_tuning || table.weights.is_empty() {
            return None;
        }
        let mean_weight =
            table.weights.values().map(|w| w.weight).sum::<f64>() / table.weights.len() as f64;
        if mean_weight <= self.config.high_mean_weight {
            return None;
        }

        let threshold = current.patterns.success_quality;
        let recommended = (threshold + self.config.threshold_step).min(1.0);
        if recommended <= threshold {
            return None;
        }
        Some(Recommendation::SuccessQuality {
            current: threshold,
            recommended,
            mean_weight,
        })
    }
}
