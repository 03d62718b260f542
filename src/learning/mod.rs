//! Batch learning passes
//!
//! Mines usage patterns, re-weights elements and transfers what worked in one
//! domain to similar ones. The evolver turns their output into suggested
//! configuration changes. Passes are explicit functions taking `now`; an
//! external scheduler decides when they run.

pub mod patterns;
pub mod weights;
pub mod transfer;
pub mod evolve;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, LearningConfig};
use crate::memory::{LearningStore, StoreError};

pub use patterns::{
    enrich, frequent_element_sets, frequent_itemsets, EnrichedRecord, MiningStats, PatternMiner,
    PatternSet,
};
pub use weights::{WeightChange, WeightOptimizer, WeightTable, WeightUpdateReport};
pub use transfer::{
    element_frequency, known_domain_features, profile_from_store, AnalogueMap, DomainProfile, Similarity,
    TransferRecommender, TransferReport, TransferredPattern,
};
pub use evolve::{search_priority, ConfigEvolver, EvolutionReport, Recommendation};

/// Why a batch pass stopped. The persisted tables are unchanged when a pass
/// fails.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Reports of one scheduled round of passes
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub weights: WeightUpdateReport,
    pub patterns: PatternSet,
}

/// Validate the configuration, then run the weight pass followed by the
/// mining pass. Each pass commits on its own; if mining fails the new weight
/// table stays.
pub fn run_passes(
    store: &LearningStore,
    config: &LearningConfig,
    now: DateTime<Utc>,
) -> Result<PassSummary, PassError> {
    config.validate()?;

    let weights = WeightOptimizer::new(config.weights.clone()).run_pass(store, now)?;
    let patterns = PatternMiner::new(config.patterns.clone()).mine(store, now)?;

    Ok(PassSummary { weights, patterns })
}
