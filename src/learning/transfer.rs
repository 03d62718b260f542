//! Cross-domain transfer recommender
//!
//! Compares two domain profiles and, when they are similar enough, proposes
//! the source domain's success patterns for the target domain with their
//! elements mapped into the target vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::patterns::{enrich, PatternMiner};
use super::weights::WeightTable;
use super::PassError;
use crate::config::TransferConfig;
use crate::memory::LearningStore;
use crate::types::{ExecutionRecord, Pattern, PatternCategory, ScoredGeneration};

/// Explicit `source element -> target element` substitutions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalogueMap {
    map: BTreeMap<String, String>,
}

impl AnalogueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: &str, target: &str) {
        self.map.insert(source.to_string(), target.to_string());
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.map.get(source).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<S: Into<String>, T: Into<String>> FromIterator<(S, T)> for AnalogueMap {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().map(|(s, t)| (s.into(), t.into())).collect(),
        }
    }
}

/// Characteristic features of well-known domains, used for structural
/// similarity when a profile carries none of its own
pub fn known_domain_features(domain: &str) -> BTreeMap<String, f64> {
    let features: &[(&str, f64)] = match domain.to_lowercase().as_str() {
        "saas" => &[("business", 1.0), ("professional", 0.9), ("clean", 0.8), ("trust", 0.8)],
        "ecommerce" => &[("product", 1.0), ("visual", 0.9), ("conversion", 0.9), ("trust", 0.7)],
        "portfolio" => &[("creative", 1.0), ("visual", 0.9), ("personal", 0.8), ("showcase", 0.8)],
        "blog" => &[("content", 1.0), ("readable", 0.9), ("personal", 0.7), ("simple", 0.8)],
        "dashboard" => &[("data", 1.0), ("functional", 0.9), ("professional", 0.8), ("clean", 0.7)],
        "landing" => &[("conversion", 1.0), ("visual", 0.9), ("marketing", 0.8), ("trust", 0.7)],
        "healthcare" => &[("trust", 1.0), ("professional", 0.9), ("clean", 0.8), ("accessible", 0.9)],
        "fintech" => &[("trust", 1.0), ("professional", 0.9), ("secure", 0.9), ("data", 0.7)],
        "education" => &[("content", 0.9), ("accessible", 1.0), ("clean", 0.8), ("engaging", 0.8)],
        "social" => &[("engaging", 1.0), ("visual", 0.9), ("interactive", 0.9), ("personal", 0.7)],
        _ => &[],
    };
    features.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Snapshot of what is known about one domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainProfile {
    pub domain: String,
    /// Share of the domain's records using each element
    pub element_frequency: BTreeMap<String, f64>,
    pub patterns: Vec<Pattern>,
    /// Weight table restricted to the domain's elements
    pub weights: BTreeMap<String, f64>,
    /// Structural/layout features
    pub features: BTreeMap<String, f64>,
}

impl DomainProfile {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            features: known_domain_features(domain),
            ..Default::default()
        }
    }

    /// Build from records tagged with this domain (others are ignored), the
    /// domain's mined patterns and the current weight table.
    pub fn from_records(
        domain: &str,
        records: &[ExecutionRecord],
        patterns: Vec<Pattern>,
        weights: &WeightTable,
    ) -> Self {
        let own: Vec<&ExecutionRecord> = records
            .iter()
            .filter(|r| r.domain.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(domain)))
            .collect();
        let element_frequency = element_frequency(&own);

        let domain_weights = element_frequency
            .keys()
            .filter_map(|e| weights.get(e).map(|w| (e.clone(), w)))
            .collect();

        Self {
            element_frequency,
            patterns,
            weights: domain_weights,
            ..Self::new(domain)
        }
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }

    /// Every element key the domain is known to use
    pub fn vocabulary(&self) -> BTreeSet<&str> {
        self.element_frequency
            .keys()
            .chain(self.weights.keys())
            .map(String::as_str)
            .chain(self.patterns.iter().flat_map(|p| match p.category {
                PatternCategory::Sequence => Vec::new(),
                _ => p.items.iter().map(String::as_str).collect(),
            }))
            .collect()
    }

    fn pattern_vector(&self) -> BTreeMap<String, f64> {
        self.patterns.iter().map(|p| (p.key(), p.support)).collect()
    }
}

/// Components of a domain similarity score. A component is None when either
/// side has nothing to compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Similarity {
    pub jaccard: Option<f64>,
    pub pattern: Option<f64>,
    pub structural: Option<f64>,
    pub combined: f64,
}

/// A source pattern proposed for the target domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferredPattern {
    /// Pattern with items in the target vocabulary
    pub pattern: Pattern,
    pub source_domain: String,
    pub source_items: Vec<String>,
    pub original_support: f64,
    pub similarity: f64,
    pub adaptation_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReport {
    pub source_domain: String,
    pub target_domain: String,
    pub similarity: Similarity,
    pub threshold: f64,
    pub transferred: Vec<TransferredPattern>,
    /// Success patterns left out because an element had no counterpart
    pub unmapped: usize,
}

pub struct TransferRecommender {
    config: TransferConfig,
}

impl TransferRecommender {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    pub fn similarity(&self, source: &DomainProfile, target: &DomainProfile) -> Similarity {
        let jaccard = jaccard(&source.vocabulary(), &target.vocabulary());
        let pattern = sparse_cosine(&source.pattern_vector(), &target.pattern_vector());
        let structural = sparse_cosine(&source.features, &target.features);

        let parts = [
            (jaccard, self.config.jaccard_blend),
            (pattern, self.config.pattern_blend),
            (structural, self.config.structural_blend),
        ];
        let total_blend: f64 = parts.iter().filter(|(v, _)| v.is_some()).map(|(_, w)| w).sum();
        let combined = if total_blend > 0.0 {
            parts
                .iter()
                .filter_map(|(v, w)| v.map(|v| v * w))
                .sum::<f64>()
                / total_blend
        } else {
            0.0
        };

        Similarity {
            jaccard,
            pattern,
            structural,
            combined: combined.clamp(0.0, 1.0),
        }
    }

    /// Propose source success patterns for the target domain
    pub fn recommend(
        &self,
        source: &DomainProfile,
        target: &DomainProfile,
        analogues: &AnalogueMap,
    ) -> TransferReport {
        let similarity = self.similarity(source, target);
        let mut report = TransferReport {
            source_domain: source.domain.clone(),
            target_domain: target.domain.clone(),
            similarity: similarity.clone(),
            threshold: self.config.similarity_threshold,
            transferred: Vec::new(),
            unmapped: 0,
        };

        if similarity.combined < self.config.similarity_threshold {
            debug!(
                "{} -> {} similarity {:.3} below threshold {:.3}",
                source.domain, target.domain, similarity.combined, self.config.similarity_threshold
            );
            return report;
        }

        let vocabulary = target.vocabulary();
        for p in source.patterns.iter().filter(|p| p.category == PatternCategory::Success) {
            let Some(items) = remap(&p.items, &vocabulary, analogues) else {
                report.unmapped += 1;
                continue;
            };
            let confidence = similarity.combined * p.support;
            report.transferred.push(TransferredPattern {
                pattern: Pattern {
                    items,
                    ..p.clone()
                },
                source_domain: source.domain.clone(),
                source_items: p.items.clone(),
                original_support: p.support,
                similarity: similarity.combined,
                adaptation_confidence: confidence,
            });
        }

        report.transferred.sort_by(|a, b| {
            b.adaptation_confidence
                .total_cmp(&a.adaptation_confidence)
                .then_with(|| a.pattern.items.cmp(&b.pattern.items))
        });

        info!(
            "Transfer {} -> {}: similarity {:.3}, {} patterns transferred, {} unmapped",
            source.domain,
            target.domain,
            similarity.combined,
            report.transferred.len(),
            report.unmapped
        );
        report
    }

    /// Recommend from several source domains at once, best first
    pub fn recommend_from(
        &self,
        sources: &[DomainProfile],
        target: &DomainProfile,
        analogues: &AnalogueMap,
    ) -> Vec<TransferredPattern> {
        let mut all: Vec<TransferredPattern> = sources
            .iter()
            .filter(|s| s.domain != target.domain)
            .flat_map(|s| self.recommend(s, target, analogues).transferred)
            .collect();
        all.sort_by(|a, b| {
            b.adaptation_confidence
                .total_cmp(&a.adaptation_confidence)
                .then_with(|| a.source_domain.cmp(&b.source_domain))
                .then_with(|| a.pattern.items.cmp(&b.pattern.items))
        });
        all
    }
}

/// Share of generations using each element
pub fn element_frequency<G: ScoredGeneration>(generations: &[G]) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for g in generations {
        for element in g.elements_used() {
            *counts.entry(element.clone()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .map(|(element, count)| (element, count as f64 / generations.len() as f64))
        .collect()
}

/// Build a domain profile from the store: the domain's records in
/// `[from, to)`, patterns mined over just those records and the current
/// weight table.
pub fn profile_from_store(
    store: &LearningStore,
    domain: &str,
    miner: &PatternMiner,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<DomainProfile, PassError> {
    let records: Vec<ExecutionRecord> = store
        .executions_between(from, to)?
        .into_iter()
        .filter(|r| r.domain.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(domain)))
        .collect();

    let sessions: BTreeSet<String> = records.iter().map(|r| r.session_id.clone()).collect();
    let feedback = store.feedback_for_sessions(&sessions)?;
    let mined = miner.mine_records(&enrich(records.clone(), &feedback));
    let weights = WeightTable::load(store)?;

    let mut patterns = mined.success;
    patterns.extend(mined.failure);
    patterns.extend(mined.sequence);
    Ok(DomainProfile::from_records(domain, &records, patterns, &weights))
}

/// Map every item into the target vocabulary, or give up
fn remap(items: &[String], vocabulary: &BTreeSet<&str>, analogues: &AnalogueMap) -> Option<Vec<String>> {
    let mapped: Option<BTreeSet<String>> = items
        .iter()
        .map(|item| {
            if vocabulary.contains(item.as_str()) {
                Some(item.clone())
            } else {
                analogues.get(item).map(str::to_string)
            }
        })
        .collect();
    mapped.map(|set| set.into_iter().collect())
}

fn jaccard(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    Some(intersection as f64 / union as f64)
}

/// Cosine similarity of two sparse vectors aligned on the union of their keys
fn sparse_cosine(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    let va: Vec<f64> = keys.iter().map(|k| a.get(*k).copied().unwrap_or(0.0)).collect();
    let vb: Vec<f64> = keys.iter().map(|k| b.get(*k).copied().unwrap_or(0.0)).collect();
    Some(cosine_similarity(&va, &vb))
}

/// Cosine similarity of two dense vectors, 0 on length mismatch or zero magnitude
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
