//! Modification classifier
//!
//! Labels a diff with a severity band and additive category tags. Pure: the
//! only inputs are the diff stats and who/what made the edit.

use std::collections::BTreeSet;

use super::diff::DiffStats;
use crate::config::ClassifierConfig;
use crate::types::Severity;

/// Minimal metadata about the edit being classified
#[derive(Debug, Clone, Default)]
pub struct EditContext {
    /// How the edit was made (`edit_type`/`user_action` of the event)
    pub edit_source: String,
    /// Generator that produced the edited file
    pub generator: String,
}

/// Classification outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub severity: Severity,
    pub categories: BTreeSet<String>,
}

/// Map a change percentage onto its severity band
pub fn severity_for(change_percentage: f64) -> Severity {
    if change_percentage < 2.0 {
        Severity::Trivial
    } else if change_percentage < 10.0 {
        Severity::Minor
    } else if change_percentage < 30.0 {
        Severity::Moderate
    } else {
        Severity::Major
    }
}

pub struct ModificationClassifier {
    config: ClassifierConfig,
}

impl ModificationClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, stats: &DiffStats, ctx: &EditContext) -> Classification {
        let mut categories = BTreeSet::new();
        let added = stats.lines_added;
        let removed = stats.lines_removed;
        let modified = stats.lines_modified;

        if added > 2 * removed {
            categories.extend(tags(&["addition-dominant", "feature-enhancement", "missing-functionality"]));
        }
        if removed > 2 * added {
            categories.extend(tags(&["removal-dominant", "simplification", "redundancy-removal"]));
        }
        if modified > added + removed {
            categories.extend(tags(&["modification-dominant", "logic-correction", "style-adjustment"]));
        }

        match stats.regions.len() {
            0 => {}
            1 => {
                categories.insert("focused".to_string());
            }
            2..=3 => {
                categories.insert("multi-region".to_string());
            }
            _ => {
                categories.insert("scattered".to_string());
            }
        }

        if self.is_bulk_paste(&ctx.edit_source) {
            categories.insert("external-integration".to_string());
        }
        if stats.change_percentage > 50.0 && self.is_styling_generator(&ctx.generator) {
            categories.insert("style-preference-mismatch".to_string());
        }

        Classification {
            severity: severity_for(stats.change_percentage),
            categories,
        }
    }

    fn is_bulk_paste(&self, edit_source: &str) -> bool {
        let source = edit_source.to_lowercase();
        !source.is_empty()
            && self
                .config
                .bulk_paste_actions
                .iter()
                .any(|action| source == action.to_lowercase())
    }

    fn is_styling_generator(&self, generator: &str) -> bool {
        let generator = generator.to_lowercase();
        !generator.is_empty()
            && self
                .config
                .styling_generators
                .iter()
                .any(|marker| generator.contains(&marker.to_lowercase()))
    }
}

fn tags<'a>(names: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    names.iter().map(|s| s.to_string())
}
