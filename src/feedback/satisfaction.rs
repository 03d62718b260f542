//! Implicit satisfaction scoring
//!
//! How little a human needed to touch generated output stands in for a
//! quality rating when none is given: an untouched file scores 100, a file
//! rewritten from scratch scores 0.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::types::{FeedbackRecord, GeneratorStats, ModificationRecord, SessionEndEvent};

/// Satisfaction for one file
pub fn file_satisfaction(change_percentage: f64) -> f64 {
    (100.0 - change_percentage).clamp(0.0, 100.0)
}

/// Satisfaction for a session given the change percentage of each modified file.
///
/// No modified files means nothing needed fixing.
pub fn session_satisfaction(change_percentages: &[f64]) -> f64 {
    if change_percentages.is_empty() {
        return 100.0;
    }
    change_percentages.iter().map(|c| file_satisfaction(*c)).sum::<f64>() / change_percentages.len() as f64
}

/// Collapse a session's modifications into one change percentage per file.
///
/// Several edits to the same file add up (capped at 100) since each one is
/// more human work on that file.
pub fn per_file_change(modifications: &[ModificationRecord]) -> BTreeMap<String, f64> {
    let mut per_file: BTreeMap<String, f64> = BTreeMap::new();
    for m in modifications {
        let entry = per_file.entry(m.file_path.clone()).or_insert(0.0);
        *entry = (*entry + m.stats.change_percentage).min(100.0);
    }
    per_file
}

/// Group modifications by the generator that produced the edited file
pub fn generator_stats(modifications: &[ModificationRecord]) -> BTreeMap<String, GeneratorStats> {
    let mut grouped: BTreeMap<String, Vec<&ModificationRecord>> = BTreeMap::new();
    for m in modifications {
        grouped.entry(m.generated_by.clone()).or_default().push(m);
    }

    grouped
        .into_iter()
        .map(|(generator, records)| {
            let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
            for record in &records {
                for category in &record.categories {
                    *histogram.entry(category.clone()).or_insert(0) += 1;
                }
            }
            let total_change: f64 = records.iter().map(|r| r.stats.change_percentage).sum();
            let stats = GeneratorStats {
                modifications: records.len(),
                total_modified_lines: records.iter().map(|r| r.stats.total_changed_lines()).sum(),
                mean_change_percentage: total_change / records.len() as f64,
                category_histogram: histogram,
            };
            (generator, stats)
        })
        .collect()
}

/// Build the feedback record for a closed session
pub fn build_feedback(
    event: &SessionEndEvent,
    modifications: &[ModificationRecord],
    now: DateTime<Utc>,
) -> FeedbackRecord {
    let changes: Vec<f64> = per_file_change(modifications).into_values().collect();

    FeedbackRecord {
        session_id: event.session_id.clone(),
        timestamp: now,
        satisfaction: session_satisfaction(&changes),
        user_rating: event.user_rating,
        generator_stats: generator_stats(modifications),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::diff::DiffStats;
    use crate::types::Severity;
    use std::collections::BTreeSet;

    fn modification(file: &str, generator: &str, pct: f64, categories: &[&str]) -> ModificationRecord {
        ModificationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: "s1".to_string(),
            file_path: file.to_string(),
            generated_by: generator.to_string(),
            edit_source: "typing".to_string(),
            before_ref: String::new(),
            after_ref: String::new(),
            stats: DiffStats {
                lines_modified: 2,
                lines_added: 1,
                change_percentage: pct,
                ..Default::default()
            },
            categories: categories.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
            severity: Severity::Minor,
            note: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_modified_files_is_full_satisfaction() {
        assert_eq!(session_satisfaction(&[]), 100.0);
    }

    #[test]
    fn test_session_mean() {
        assert_eq!(session_satisfaction(&[5.0, 45.0]), 75.0);
    }

    #[test]
    fn test_file_satisfaction_clamped() {
        assert_eq!(file_satisfaction(0.0), 100.0);
        assert_eq!(file_satisfaction(100.0), 0.0);
        assert_eq!(file_satisfaction(140.0), 0.0);
    }

    #[test]
    fn test_satisfaction_non_increasing() {
        let mut previous = f64::MAX;
        for tenth in 0..=1000 {
            let s = file_satisfaction(tenth as f64 / 10.0);
            assert!((0.0..=100.0).contains(&s));
            assert!(s <= previous);
            previous = s;
        }
    }

    #[test]
    fn test_build_feedback_two_files() {
        let mods = vec![
            modification("a.css", "style-gen", 5.0, &["focused"]),
            modification("b.html", "page-gen", 45.0, &["focused", "addition-dominant"]),
        ];
        let event = SessionEndEvent {
            session_id: "s1".to_string(),
            files_modified: vec![],
            user_rating: Some(4.0),
            timestamp: Utc::now(),
        };
        let feedback = build_feedback(&event, &mods, Utc::now());
        assert_eq!(feedback.satisfaction, 75.0);
        assert_eq!(feedback.user_rating, Some(4.0));
        assert_eq!(feedback.generator_stats.len(), 2);

        let page = &feedback.generator_stats["page-gen"];
        assert_eq!(page.modifications, 1);
        assert_eq!(page.total_modified_lines, 3);
        assert_eq!(page.mean_change_percentage, 45.0);
        assert_eq!(page.category_histogram["addition-dominant"], 1);
    }

    #[test]
    fn test_repeated_edits_to_one_file_accumulate() {
        let mods = vec![
            modification("a.css", "style-gen", 70.0, &[]),
            modification("a.css", "style-gen", 60.0, &[]),
        ];
        let per_file = per_file_change(&mods);
        assert_eq!(per_file["a.css"], 100.0);
        assert_eq!(generator_stats(&mods)["style-gen"].mean_change_percentage, 65.0);
    }
}
