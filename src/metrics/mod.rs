//! Reporting over the learning tables
//!
//! This module provides:
//! - Feedback summaries over a time window
//! - Quality trend detection for recent generations
//! - A/B comparison of two versions with significance testing

pub mod analysis;
pub mod ab_test;

pub use analysis::{quality_trend, FeedbackSummary, QualityReport, QualityTrend};
pub use ab_test::{AbReport, AbTest, MetricComparison, Sample, Winner};
