//! Implicit feedback capture
//!
//! Measures how much humans changed generated files, labels the change and
//! turns it into a per-session satisfaction score.

pub mod diff;
pub mod classifier;
pub mod satisfaction;
pub mod collector;

pub use diff::{compute_diff, diff_text, DiffError, DiffStats, Region, RegionKind};
pub use classifier::{Classification, EditContext, ModificationClassifier};
pub use satisfaction::{build_feedback, file_satisfaction, session_satisfaction};
pub use collector::{FeedbackCollector, IngestSummary};
