//! design-evolve - Feedback-Driven Adaptation Library
//!
//! Learns from how users edit generated output:
//! - Line diffs and modification classification for every edit
//! - Per-session satisfaction scores
//! - Apriori mining of success, failure and sequence patterns
//! - Incremental element weights with usage decay
//! - Pattern transfer between similar domains
//! - Configuration suggestions from weight volatility and query sequences
//!
//! # Example
//!
//! ```ignore
//! use design_evolve::{run_passes, LearningConfig, LearningStore};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LearningConfig::load(None)?;
//!     let store = LearningStore::open(config.database_path()?)?;
//!     let summary = run_passes(&store, &config, chrono::Utc::now())?;
//!     println!("{} success patterns", summary.patterns.success.len());
//!     Ok(())
//! }
//! ```

// Core modules
pub mod types;
pub mod config;
pub mod memory;
pub mod cli;

// Feature modules
pub mod feedback; // Edit capture, diffing and satisfaction
pub mod learning; // Batch passes: patterns, weights, transfer
pub mod metrics;  // Read-only reports and A/B comparison

// Re-export commonly used types for convenience
pub use config::LearningConfig;

pub use memory::{LearningStore, StoreError};

pub use types::{
    ElementWeight,
    ExecutionRecord,
    FeedbackRecord,
    FileEditEvent,
    ModificationRecord,
    Pattern,
    PatternCategory,
    RecordError,
    SessionEndEvent,
    Severity,
};

pub use feedback::{compute_diff, DiffStats, FeedbackCollector, ModificationClassifier};

pub use learning::{
    run_passes,
    ConfigEvolver,
    EvolutionReport,
    PassError,
    PatternMiner,
    Recommendation,
    TransferRecommender,
    WeightOptimizer,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Feedback-Driven Adaptation Library", NAME, VERSION)
}
