//! A/B comparison of two weight/pattern versions
//!
//! Welch's t-test (one-tailed, B better than A) per metric, plus Cohen's d
//! and a 95% interval around B's mean.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One observation: metric name to value
pub type Sample = BTreeMap<String, f64>;

/// Metrics compared when none are named
pub const DEFAULT_METRICS: [&str; 3] = ["quality_score", "satisfaction", "modification_rate"];

const Z_95: f64 = 1.96;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub mean: f64,
    pub std: f64,
    pub n: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: String,
    pub version_a: GroupStats,
    pub version_b: GroupStats,
    /// 95% interval around B's mean
    pub confidence_interval: (f64, f64),
    pub t_statistic: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub significant: bool,
    pub absolute_improvement: f64,
    /// Percent change of B over A, 0 when A's mean is not positive
    pub relative_improvement: f64,
}

impl MetricComparison {
    pub fn b_wins(&self) -> bool {
        self.significant && self.version_b.mean > self.version_a.mean
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    VersionA,
    VersionB,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbReport {
    pub confidence_level: f64,
    pub samples_a: usize,
    pub samples_b: usize,
    pub metrics: Vec<MetricComparison>,
    pub winner: Winner,
}

impl AbReport {
    pub fn recommendation(&self) -> &'static str {
        match self.winner {
            Winner::VersionB => "Deploy version B: significant improvement",
            Winner::VersionA => "Keep version A: version B regresses",
            Winner::Inconclusive => "Needs more data or no significant difference",
        }
    }
}

pub struct AbTest {
    confidence_level: f64,
}

impl Default for AbTest {
    fn default() -> Self {
        Self::new(0.95)
    }
}

impl AbTest {
    pub fn new(confidence_level: f64) -> Self {
        Self {
            confidence_level: confidence_level.clamp(0.5, 0.9999),
        }
    }

    fn alpha(&self) -> f64 {
        1.0 - self.confidence_level
    }

    /// Compare the named metrics (or [`DEFAULT_METRICS`]) across both groups.
    /// Metrics missing from either group are left out.
    pub fn analyze(&self, a: &[Sample], b: &[Sample], metrics: &[String]) -> AbReport {
        let names: Vec<String> = if metrics.is_empty() {
            DEFAULT_METRICS.iter().map(|m| m.to_string()).collect()
        } else {
            metrics.to_vec()
        };

        let comparisons: Vec<MetricComparison> = names
            .iter()
            .filter_map(|name| {
                let va: Vec<f64> = a.iter().filter_map(|s| s.get(name).copied()).collect();
                let vb: Vec<f64> = b.iter().filter_map(|s| s.get(name).copied()).collect();
                if va.is_empty() || vb.is_empty() {
                    None
                } else {
                    Some(self.compare(name, &va, &vb))
                }
            })
            .collect();

        let improvements = comparisons
            .iter()
            .filter(|m| m.significant && m.relative_improvement > 0.0)
            .count();
        let regressions = comparisons
            .iter()
            .filter(|m| m.significant && m.relative_improvement < 0.0)
            .count();
        let winner = match improvements.cmp(&regressions) {
            std::cmp::Ordering::Greater => Winner::VersionB,
            std::cmp::Ordering::Less => Winner::VersionA,
            std::cmp::Ordering::Equal => Winner::Inconclusive,
        };

        AbReport {
            confidence_level: self.confidence_level,
            samples_a: a.len(),
            samples_b: b.len(),
            metrics: comparisons,
            winner,
        }
    }

    pub fn compare(&self, metric: &str, a: &[f64], b: &[f64]) -> MetricComparison {
        let mean_a = mean(a);
        let mean_b = mean(b);
        let (t_statistic, p_value, significant) = self.t_test(a, b);

        let se_b = (variance(b) / b.len().max(1) as f64).sqrt();
        let relative_improvement = if mean_a > 0.0 {
            (mean_b - mean_a) / mean_a * 100.0
        } else {
            0.0
        };

        MetricComparison {
            metric: metric.to_string(),
            version_a: GroupStats { mean: mean_a, std: variance(a).sqrt(), n: a.len() },
            version_b: GroupStats { mean: mean_b, std: variance(b).sqrt(), n: b.len() },
            confidence_interval: (mean_b - Z_95 * se_b, mean_b + Z_95 * se_b),
            t_statistic,
            p_value,
            effect_size: cohens_d(a, b),
            significant,
            absolute_improvement: mean_b - mean_a,
            relative_improvement,
        }
    }

    /// Welch's t-test, H1: mean(b) > mean(a). Returns (t, p, significant).
    pub fn t_test(&self, a: &[f64], b: &[f64]) -> (f64, f64, bool) {
        let (n_a, n_b) = (a.len(), b.len());
        if n_a < 2 || n_b < 2 {
            return (0.0, 1.0, false);
        }

        let va = variance(a) / n_a as f64;
        let vb = variance(b) / n_b as f64;
        let se = (va + vb).sqrt();
        if se == 0.0 {
            return (0.0, 1.0, false);
        }

        let t = (mean(b) - mean(a)) / se;
        let df = (va + vb).powi(2) / (va.powi(2) / (n_a - 1) as f64 + vb.powi(2) / (n_b - 1) as f64);

        let p = if df > 30.0 {
            upper_tail_normal(t)
        } else if t > 1.5 {
            // Small samples: conservative fixed estimate
            0.1
        } else {
            0.3
        };

        (t, p, t > 0.0 && p < self.alpha())
    }
}

/// Cohen's d with pooled standard deviation
pub fn cohens_d(a: &[f64], b: &[f64]) -> f64 {
    let (n_a, n_b) = (a.len(), b.len());
    if n_a < 2 || n_b < 2 {
        return 0.0;
    }
    let pooled = (((n_a - 1) as f64 * variance(a) + (n_b - 1) as f64 * variance(b))
        / (n_a + n_b - 2) as f64)
        .sqrt();
    if pooled == 0.0 {
        0.0
    } else {
        (mean(b) - mean(a)) / pooled
    }
}

/// P(Z > z) via the Winitzki erf approximation
fn upper_tail_normal(z: f64) -> f64 {
    let x = z / std::f64::consts::SQRT_2;
    let a = 0.147;
    let x2 = x * x;
    let erf = x.signum()
        * (1.0 - (-x2 * (4.0 / std::f64::consts::PI + a * x2) / (1.0 + a * x2)).exp()).sqrt();
    0.5 * (1.0 - erf)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample variance (n - 1)
fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(metric: &str, values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .map(|v| [(metric.to_string(), *v)].into())
            .collect()
    }

    #[test]
    fn test_too_few_samples_not_significant() {
        let (t, p, sig) = AbTest::default().t_test(&[0.5], &[0.9, 0.95]);
        assert_eq!((t, p, sig), (0.0, 1.0, false));
    }

    #[test]
    fn test_large_samples_use_normal_tail() {
        let a: Vec<f64> = (0..40).map(|i| 0.60 + (i % 5) as f64 * 0.01).collect();
        let b: Vec<f64> = (0..40).map(|i| 0.70 + (i % 5) as f64 * 0.01).collect();
        let (t, p, sig) = AbTest::default().t_test(&a, &b);
        assert!(t > 10.0);
        assert!(p < 0.001);
        assert!(sig);
    }

    #[test]
    fn test_small_samples_conservative_p() {
        let test = AbTest::default();
        let (_, p, sig) = test.t_test(&[0.5, 0.6, 0.55], &[0.8, 0.9, 0.85]);
        assert_eq!(p, 0.1);
        assert!(!sig);

        let loose = AbTest::new(0.8);
        let (_, _, sig) = loose.t_test(&[0.5, 0.6, 0.55], &[0.8, 0.9, 0.85]);
        assert!(sig);
    }

    #[test]
    fn test_cohens_d() {
        assert_eq!(cohens_d(&[1.0, 1.0], &[2.0, 2.0]), 0.0);
        let d = cohens_d(&[1.0, 2.0, 3.0], &[2.0, 3.0, 4.0]);
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_analyze_picks_winner() {
        let a_values: Vec<f64> = (0..40).map(|i| 0.60 + (i % 4) as f64 * 0.02).collect();
        let b_values: Vec<f64> = (0..40).map(|i| 0.75 + (i % 4) as f64 * 0.02).collect();
        let report = AbTest::default().analyze(
            &samples("quality_score", &a_values),
            &samples("quality_score", &b_values),
            &[],
        );

        assert_eq!(report.metrics.len(), 1);
        let m = &report.metrics[0];
        assert!(m.b_wins());
        assert!(m.relative_improvement > 20.0);
        assert!(m.confidence_interval.0 < m.version_b.mean && m.version_b.mean < m.confidence_interval.1);
        assert_eq!(report.winner, Winner::VersionB);

        let reversed = AbTest::default().analyze(
            &samples("quality_score", &b_values),
            &samples("quality_score", &a_values),
            &[],
        );
        // One-tailed: B being worse is never significant
        assert_eq!(reversed.winner, Winner::Inconclusive);
    }
}
