//! Pattern miner
//!
//! Finds element combinations that keep showing up in good (and bad)
//! generations with Apriori, plus query sequences that tend to precede good
//! output. Every pass recomputes from the window alone; identical input gives
//! identical output.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::PassError;
use crate::config::PatternConfig;
use crate::memory::LearningStore;
use crate::types::{ExecutionRecord, FeedbackRecord, Pattern, PatternCategory, ScoredGeneration};

/// An execution record joined with its session's feedback
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub record: ExecutionRecord,
    /// Implicit satisfaction of the session, in [0, 100]
    pub satisfaction: Option<f64>,
    /// Explicit rating of the session
    pub rating: Option<f64>,
}

impl EnrichedRecord {
    pub fn new(record: ExecutionRecord) -> Self {
        Self {
            record,
            satisfaction: None,
            rating: None,
        }
    }

    pub fn with_feedback(mut self, satisfaction: Option<f64>, rating: Option<f64>) -> Self {
        self.satisfaction = satisfaction;
        self.rating = rating;
        self
    }

    fn quality(&self) -> f64 {
        self.record.quality_score
    }
}

impl ScoredGeneration for EnrichedRecord {
    fn elements_used(&self) -> &BTreeSet<String> {
        &self.record.elements_used
    }

    fn quality_score(&self) -> f64 {
        self.record.quality_score
    }
}

/// Join records with feedback by session id
pub fn enrich(
    records: Vec<ExecutionRecord>,
    feedback: &BTreeMap<String, FeedbackRecord>,
) -> Vec<EnrichedRecord> {
    records
        .into_iter()
        .map(|record| {
            let fb = feedback.get(&record.session_id);
            let satisfaction = fb.map(|f| f.satisfaction);
            let rating = fb.and_then(|f| f.user_rating);
            EnrichedRecord::new(record).with_feedback(satisfaction, rating)
        })
        .collect()
}

/// Counts from one mining pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningStats {
    pub window_records: usize,
    pub success_records: usize,
    pub failure_records: usize,
    pub sequence_records: usize,
}

/// Result of one mining pass, each category ranked best first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternSet {
    pub success: Vec<Pattern>,
    pub failure: Vec<Pattern>,
    pub sequence: Vec<Pattern>,
    pub stats: MiningStats,
}

impl PatternSet {
    pub fn get(&self, category: PatternCategory) -> &[Pattern] {
        match category {
            PatternCategory::Success => &self.success,
            PatternCategory::Failure => &self.failure,
            PatternCategory::Sequence => &self.sequence,
        }
    }
}

/// Apriori frequent itemset search.
///
/// Returns every itemset (sorted items) with `count / |transactions| >=
/// min_support` and at most `max_len` items, mapped to its count.
pub fn frequent_itemsets(
    transactions: &[&BTreeSet<String>],
    min_support: f64,
    max_len: usize,
) -> BTreeMap<Vec<String>, usize> {
    let mut result = BTreeMap::new();
    let n = transactions.len();
    if n == 0 || max_len == 0 {
        return result;
    }
    let is_frequent = |count: usize| count as f64 / n as f64 >= min_support;

    let mut singles: BTreeMap<Vec<String>, usize> = BTreeMap::new();
    for t in transactions {
        for item in t.iter() {
            *singles.entry(vec![item.clone()]).or_insert(0) += 1;
        }
    }
    let mut level: BTreeMap<Vec<String>, usize> =
        singles.into_iter().filter(|(_, c)| is_frequent(*c)).collect();

    let mut k = 1;
    while !level.is_empty() {
        result.extend(level.iter().map(|(items, count)| (items.clone(), *count)));
        if k >= max_len {
            break;
        }

        let mut next = BTreeMap::new();
        for candidate in join_candidates(&level) {
            let count = transactions
                .iter()
                .filter(|t| contains_all(t, &candidate))
                .count();
            if is_frequent(count) {
                next.insert(candidate, count);
            }
        }
        level = next;
        k += 1;
    }

    result
}

/// Apriori over the element sets of any scored generations
pub fn frequent_element_sets<G: ScoredGeneration>(
    generations: &[G],
    min_support: f64,
    max_len: usize,
) -> BTreeMap<Vec<String>, usize> {
    let transactions: Vec<&BTreeSet<String>> = generations.iter().map(|g| g.elements_used()).collect();
    frequent_itemsets(&transactions, min_support, max_len)
}

/// Join k-itemsets sharing their first k-1 items, then drop candidates with an
/// infrequent k-subset
fn join_candidates(level: &BTreeMap<Vec<String>, usize>) -> Vec<Vec<String>> {
    let keys: Vec<&Vec<String>> = level.keys().collect();
    let mut candidates = Vec::new();

    for (i, a) in keys.iter().enumerate() {
        let k = a.len();
        // Sorted keys keep every shared prefix contiguous
        for b in &keys[i + 1..] {
            if a[..k - 1] != b[..k - 1] {
                break;
            }
            let mut candidate = (*a).clone();
            candidate.push(b[k - 1].clone());

            let closed = (0..candidate.len()).all(|skip| {
                let subset: Vec<String> = candidate
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != skip)
                    .map(|(_, item)| item.clone())
                    .collect();
                level.contains_key(&subset)
            });
            if closed {
                candidates.push(candidate);
            }
        }
    }

    candidates
}

fn contains_all(transaction: &BTreeSet<String>, items: &[String]) -> bool {
    items.iter().all(|item| transaction.contains(item))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Mines success, failure and sequence patterns over a trailing window
pub struct PatternMiner {
    config: PatternConfig,
}

impl PatternMiner {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    pub fn is_success(&self, r: &EnrichedRecord) -> bool {
        r.quality() >= self.config.success_quality
            && r.rating.map_or(true, |rating| rating >= self.config.success_rating)
    }

    pub fn is_failure(&self, r: &EnrichedRecord) -> bool {
        r.quality() < self.config.failure_quality
            || r.rating.is_some_and(|rating| rating < self.config.failure_rating)
            || r.satisfaction
                .is_some_and(|s| s < self.config.failure_satisfaction)
    }

    /// Mine an in-memory window
    pub fn mine_records(&self, window: &[EnrichedRecord]) -> PatternSet {
        let success: Vec<&EnrichedRecord> = window.iter().filter(|r| self.is_success(r)).collect();
        let failure: Vec<&EnrichedRecord> = window.iter().filter(|r| self.is_failure(r)).collect();

        let success_patterns = self.itemset_patterns(window, &success, PatternCategory::Success);
        let failure_patterns = self.itemset_patterns(window, &failure, PatternCategory::Failure);
        let sequence_patterns = self.sequence_patterns(window, &success);

        let stats = MiningStats {
            window_records: window.len(),
            success_records: success.len(),
            failure_records: failure.len(),
            sequence_records: window.iter().filter(|r| !r.record.query_domains.is_empty()).count(),
        };
        debug!(
            "Mined {} records: {} success, {} failure",
            stats.window_records, stats.success_records, stats.failure_records
        );

        PatternSet {
            success: self.rank(success_patterns, PatternCategory::Success),
            failure: self.rank(failure_patterns, PatternCategory::Failure),
            sequence: self.rank(sequence_patterns, PatternCategory::Sequence),
            stats,
        }
    }

    fn itemset_patterns(
        &self,
        window: &[EnrichedRecord],
        subset: &[&EnrichedRecord],
        category: PatternCategory,
    ) -> Vec<Pattern> {
        if subset.is_empty() {
            return Vec::new();
        }
        let frequent = frequent_element_sets(subset, self.config.min_support, self.config.max_itemset_len);

        frequent
            .into_iter()
            .map(|(items, count)| {
                let matching: Vec<&&EnrichedRecord> = subset
                    .iter()
                    .filter(|r| contains_all(r.elements_used(), &items))
                    .collect();
                let window_count = window
                    .iter()
                    .filter(|r| contains_all(r.elements_used(), &items))
                    .count()
                    .max(count);

                Pattern {
                    support: count as f64 / subset.len() as f64,
                    confidence: count as f64 / window_count as f64,
                    category,
                    occurrences: count,
                    mean_quality: mean(matching.iter().map(|r| r.quality())).unwrap_or(0.0),
                    mean_satisfaction: mean(matching.iter().filter_map(|r| r.satisfaction)),
                    items,
                }
            })
            .collect()
    }

    /// Query-domain sequences preceding high-quality records.
    ///
    /// A sequence needs `min_sequence_count` successful runs and at least
    /// `min_sequence_confidence` of all its runs successful. `occurrences`
    /// and the means cover every run of the sequence in the window.
    fn sequence_patterns(&self, window: &[EnrichedRecord], success: &[&EnrichedRecord]) -> Vec<Pattern> {
        if success.is_empty() {
            return Vec::new();
        }

        let mut runs: BTreeMap<&[String], Vec<&EnrichedRecord>> = BTreeMap::new();
        for r in window.iter().filter(|r| !r.record.query_domains.is_empty()) {
            runs.entry(r.record.query_domains.as_slice()).or_default().push(r);
        }

        let mut hits: BTreeMap<&[String], usize> = BTreeMap::new();
        for r in success.iter().filter(|r| !r.record.query_domains.is_empty()) {
            *hits.entry(r.record.query_domains.as_slice()).or_insert(0) += 1;
        }

        hits.into_iter()
            .filter(|(_, count)| *count >= self.config.min_sequence_count)
            .filter_map(|(sequence, count)| {
                let all = runs.get(sequence)?;
                let total = all.len().max(count);
                let confidence = count as f64 / total as f64;
                if confidence < self.config.min_sequence_confidence {
                    debug!(
                        "Dropping sequence {:?}: {} of {} runs succeeded",
                        sequence, count, total
                    );
                    return None;
                }
                Some(Pattern {
                    items: sequence.to_vec(),
                    support: count as f64 / success.len() as f64,
                    confidence,
                    category: PatternCategory::Sequence,
                    occurrences: total,
                    mean_quality: mean(all.iter().map(|r| r.quality())).unwrap_or(0.0),
                    mean_satisfaction: mean(all.iter().filter_map(|r| r.satisfaction)),
                })
            })
            .collect()
    }

    /// Support desc, then mean quality (desc, asc for failures), then items
    fn rank(&self, mut patterns: Vec<Pattern>, category: PatternCategory) -> Vec<Pattern> {
        patterns.sort_by(|a, b| {
            let quality = match category {
                PatternCategory::Failure => a.mean_quality.total_cmp(&b.mean_quality),
                _ => b.mean_quality.total_cmp(&a.mean_quality),
            };
            b.support
                .total_cmp(&a.support)
                .then(quality)
                .then_with(|| a.items.cmp(&b.items))
        });
        patterns.truncate(self.config.top_n);
        patterns
    }

    /// Run a mining pass over the store's trailing window (`now` excluded)
    /// and replace the persisted pattern tables.
    pub fn mine(&self, store: &LearningStore, now: DateTime<Utc>) -> Result<PatternSet, PassError> {
        let from = now - Duration::days(self.config.window_days);
        let records = store.executions_between(from, now)?;
        let sessions: BTreeSet<String> = records.iter().map(|r| r.session_id.clone()).collect();
        let feedback = store.feedback_for_sessions(&sessions)?;
        let window = enrich(records, &feedback);

        let set = self.mine_records(&window);
        store.replace_patterns(
            &[
                (PatternCategory::Success, set.success.as_slice()),
                (PatternCategory::Failure, set.failure.as_slice()),
                (PatternCategory::Sequence, set.sequence.as_slice()),
            ],
            now,
        )?;

        info!(
            "Pattern pass over {} records: {} success, {} failure, {} sequence patterns",
            set.stats.window_records,
            set.success.len(),
            set.failure.len(),
            set.sequence.len()
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn record(elements: &[&str], quality: f64) -> EnrichedRecord {
        EnrichedRecord::new(ExecutionRecord::new("s", "gen", quality).with_elements(elements.iter().copied()))
    }

    fn config(min_support: f64) -> PatternConfig {
        PatternConfig {
            min_support,
            ..Default::default()
        }
    }

    #[test]
    fn test_apriori_prunes_infrequent_items() {
        let t1 = set(&["a", "x"]);
        let t2 = set(&["a", "x"]);
        let t3 = set(&["b"]);
        let frequent = frequent_itemsets(&[&t1, &t2, &t3], 0.5, 3);

        assert_eq!(frequent.get(&vec!["a".to_string(), "x".to_string()]), Some(&2));
        assert!(!frequent.contains_key(&vec!["b".to_string()]));
    }

    #[test]
    fn test_success_support_relative_to_subset() {
        let window = vec![
            record(&["a", "x"], 0.9),
            record(&["a", "x"], 0.9),
            record(&["b"], 0.9),
        ];
        let miner = PatternMiner::new(config(0.5));
        let result = miner.mine_records(&window);

        let ax = result
            .success
            .iter()
            .find(|p| p.items == vec!["a".to_string(), "x".to_string()])
            .unwrap();
        assert!((ax.support - 0.667).abs() < 1e-3);
        assert_eq!(ax.confidence, 1.0);
        assert_eq!(ax.occurrences, 2);
        assert!(result.success.iter().all(|p| p.items != vec!["b".to_string()]));
    }

    #[test]
    fn test_apriori_respects_max_len() {
        let t = set(&["a", "b", "c", "d"]);
        let frequent = frequent_itemsets(&[&t, &t], 0.5, 2);
        assert!(frequent.keys().all(|k| k.len() <= 2));
        assert_eq!(frequent.len(), 4 + 6);

        let full = frequent_itemsets(&[&t, &t], 0.5, 4);
        let abcd: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert!(full.contains_key(&abcd));
    }

    #[test]
    fn test_confidence_counts_window_outside_subset() {
        let window = vec![
            record(&["style:flat"], 0.95),
            record(&["style:flat"], 0.90),
            record(&["style:flat"], 0.30),
            record(&["style:flat"], 0.70),
        ];
        let result = PatternMiner::new(config(0.5)).mine_records(&window);
        let flat = &result.success[0];
        assert_eq!(flat.support, 1.0);
        assert_eq!(flat.confidence, 0.5);

        let failure = &result.failure[0];
        assert_eq!(failure.items, vec!["style:flat".to_string()]);
        assert_eq!(failure.confidence, 0.25);
    }

    #[test]
    fn test_rating_and_satisfaction_gate_subsets() {
        let window = vec![
            record(&["font:serif"], 0.9).with_feedback(Some(95.0), Some(2.5)),
            record(&["font:mono"], 0.9).with_feedback(Some(30.0), None),
            record(&["font:sans"], 0.9).with_feedback(Some(90.0), Some(5.0)),
        ];
        let miner = PatternMiner::new(config(0.1));
        let result = miner.mine_records(&window);

        let success: Vec<&str> = result.success.iter().map(|p| p.items[0].as_str()).collect();
        assert_eq!(success, vec!["font:mono", "font:sans"]);
        let failure: Vec<&str> = result.failure.iter().map(|p| p.items[0].as_str()).collect();
        assert_eq!(failure, vec!["font:mono"]);
        assert_eq!(result.failure[0].mean_satisfaction, Some(30.0));
    }

    #[test]
    fn test_sequences_need_minimum_count() {
        let seq = ["product", "style", "color"];
        let mut window: Vec<EnrichedRecord> = (0..3)
            .map(|_| {
                EnrichedRecord::new(ExecutionRecord::new("s", "gen", 0.9).with_queries(seq))
            })
            .collect();
        window.push(EnrichedRecord::new(ExecutionRecord::new("s", "gen", 0.2).with_queries(seq)));
        window.push(EnrichedRecord::new(
            ExecutionRecord::new("s", "gen", 0.9).with_queries(["style"]),
        ));

        let result = PatternMiner::new(config(0.1)).mine_records(&window);
        assert_eq!(result.sequence.len(), 1);
        let p = &result.sequence[0];
        assert_eq!(p.items, vec!["product", "style", "color"]);
        assert_eq!(p.occurrences, 4);
        assert_eq!(p.confidence, 0.75);
        assert_eq!(p.support, 0.75);
        assert_eq!(p.key(), "sequence:product > style > color");
    }

    #[test]
    fn test_sequence_mostly_preceding_failures_dropped() {
        let seq = ["product", "style", "color"];
        let mut window: Vec<EnrichedRecord> = (0..3)
            .map(|_| EnrichedRecord::new(ExecutionRecord::new("s", "gen", 0.95).with_queries(seq)))
            .collect();
        window.extend(
            (0..17).map(|_| EnrichedRecord::new(ExecutionRecord::new("s", "gen", 0.2).with_queries(seq))),
        );

        let result = PatternMiner::new(config(0.1)).mine_records(&window);
        assert!(result.sequence.is_empty());
        assert_eq!(result.stats.sequence_records, 20);

        // Same runs pass once the gate is lowered to their 0.15 success rate
        let lenient = PatternMiner::new(PatternConfig {
            min_sequence_confidence: 0.15,
            ..config(0.1)
        });
        let p = &lenient.mine_records(&window).sequence[0];
        assert_eq!(p.occurrences, 20);
        assert!((p.confidence - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_element_sets_from_any_scored_generation() {
        let records = vec![
            ExecutionRecord::new("s1", "gen", 0.9).with_elements(["a", "b"]),
            ExecutionRecord::new("s2", "gen", 0.4).with_elements(["a"]),
        ];
        let frequent = frequent_element_sets(&records, 0.5, 2);
        assert_eq!(frequent.get(&vec!["a".to_string()]), Some(&2));
        assert_eq!(frequent.get(&vec!["a".to_string(), "b".to_string()]), Some(&1));

        let enriched: Vec<EnrichedRecord> = records.into_iter().map(EnrichedRecord::new).collect();
        assert_eq!(frequent_element_sets(&enriched, 0.5, 2), frequent);
    }

    #[test]
    fn test_ranking_and_truncation() {
        let window = vec![
            record(&["a", "b"], 0.9),
            record(&["a", "c"], 0.95),
            record(&["a"], 0.9),
            record(&["c"], 1.0),
        ];
        let miner = PatternMiner::new(PatternConfig {
            min_support: 0.25,
            top_n: 3,
            ..Default::default()
        });
        let result = miner.mine_records(&window);
        assert_eq!(result.success.len(), 3);
        assert_eq!(result.success[0].items, vec!["a".to_string()]);
        assert_eq!(result.success[1].items, vec!["c".to_string()]);
        // a+c wins the 0.25 tier on mean quality
        assert_eq!(result.success[2].items, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_empty_window() {
        let result = PatternMiner::new(PatternConfig::default()).mine_records(&[]);
        assert_eq!(result, PatternSet::default());
    }

    #[test]
    fn test_mine_persists_and_replaces() {
        let store = LearningStore::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 0, 0, 0).unwrap();
        for i in 0..4 {
            let r = ExecutionRecord::new(&format!("s{}", i), "gen", 0.9)
                .with_elements(["style:flat", "color:blue"])
                .at(now - Duration::days(i + 1));
            store.append_execution(&r).unwrap();
        }
        let stale = ExecutionRecord::new("old", "gen", 0.9)
            .with_elements(["style:retro"])
            .at(now - Duration::days(60));
        store.append_execution(&stale).unwrap();

        let miner = PatternMiner::new(PatternConfig::default());
        let result = miner.mine(&store, now).unwrap();
        assert_eq!(result.stats.window_records, 4);
        assert_eq!(store.patterns_by_category(PatternCategory::Success).unwrap(), result.success);
        assert!(result
            .success
            .iter()
            .all(|p| !p.items.contains(&"style:retro".to_string())));

        let again = miner.mine(&store, now).unwrap();
        assert_eq!(again, result);
    }

    proptest! {
        #[test]
        fn prop_support_bounded_and_deterministic(
            txs in prop::collection::vec(
                prop::collection::btree_set("[a-e]", 1..4), 1..25),
            min_support in 0.05f64..1.0
        ) {
            let refs: Vec<&BTreeSet<String>> = txs.iter().collect();
            let first = frequent_itemsets(&refs, min_support, 3);
            let second = frequent_itemsets(&refs, min_support, 3);
            prop_assert_eq!(&first, &second);
            for (items, count) in &first {
                let support = *count as f64 / txs.len() as f64;
                prop_assert!(support > 0.0 && support <= 1.0);
                prop_assert!(support >= min_support);
                prop_assert!(items.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
