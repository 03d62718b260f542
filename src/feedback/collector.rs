//! Feedback collector - turns raw events into stored learning records
//!
//! Entry points are fail-open: a broken event, an undiffable snapshot or a
//! store error is logged and becomes a no-op, never an error returned into
//! the generation workflow that emitted the event.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::classifier::{EditContext, ModificationClassifier};
use super::diff::{diff_text, DiffStats};
use super::satisfaction::build_feedback;
use crate::config::LearningConfig;
use crate::memory::LearningStore;
use crate::types::{
    ElementExtractor, ExecutionRecord, FeedbackRecord, FileEditEvent, ModificationRecord,
    SessionEndEvent, Severity, TagListExtractor,
};

/// Outcome of a bulk ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Lines read, blank lines excluded
    pub read: usize,
    /// Records newly stored
    pub stored: usize,
    /// Well-formed records that were already stored
    pub duplicates: usize,
    /// Malformed or rejected lines
    pub skipped: usize,
}

/// One line of an execution stream. Producers that don't tag elements
/// themselves send the raw `output` instead.
#[derive(Debug, Deserialize)]
struct ExecutionLine {
    #[serde(flatten)]
    record: ExecutionRecord,
    #[serde(default)]
    output: Option<String>,
}

/// Collects execution, edit and session events into the learning store
pub struct FeedbackCollector {
    store: Arc<LearningStore>,
    classifier: ModificationClassifier,
    extractor: Box<dyn ElementExtractor + Send + Sync>,
    max_rating: f64,
}

impl FeedbackCollector {
    pub fn new(store: Arc<LearningStore>, config: &LearningConfig) -> Self {
        Self {
            store,
            classifier: ModificationClassifier::new(config.classifier.clone()),
            extractor: Box::new(TagListExtractor),
            max_rating: config.patterns.max_rating,
        }
    }

    /// Replace the extractor used for executions that arrive as raw output
    pub fn with_extractor<E>(mut self, extractor: E) -> Self
    where
        E: ElementExtractor + Send + Sync + 'static,
    {
        self.extractor = Box::new(extractor);
        self
    }

    /// Diff and classify one edit without storing it.
    ///
    /// Snapshots that can't be diffed produce a placeholder record with zeroed
    /// stats, no categories, `trivial` severity and a note.
    pub fn build_modification(&self, event: &FileEditEvent, now: DateTime<Utc>) -> ModificationRecord {
        let before = event.previous_content.as_deref().unwrap_or("");
        let edit_source = edit_source(event);

        let (stats, categories, severity, note) = match diff_text(before, &event.new_content) {
            Ok(stats) => {
                let ctx = EditContext {
                    edit_source: edit_source.clone(),
                    generator: event.generated_by.clone(),
                };
                let classification = self.classifier.classify(&stats, &ctx);
                (stats, classification.categories, classification.severity, None)
            }
            Err(e) => {
                warn!("Diff failed for {}: {}", event.file_path, e);
                (
                    DiffStats::default(),
                    Default::default(),
                    Severity::Trivial,
                    Some(format!("diff unavailable: {}", e)),
                )
            }
        };

        let before_ref = content_ref(before);
        let after_ref = content_ref(&event.new_content);
        ModificationRecord {
            id: digest_id(&[
                event.session_id.as_str(),
                event.file_path.as_str(),
                before_ref.as_str(),
                after_ref.as_str(),
                event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true).as_str(),
            ]),
            session_id: event.session_id.clone(),
            file_path: event.file_path.clone(),
            generated_by: event.generated_by.clone(),
            edit_source,
            before_ref,
            after_ref,
            stats,
            categories,
            severity,
            note,
            created_at: now,
        }
    }

    /// Record a file edit. Returns the stored record, or None if the same
    /// edit was already recorded or the store failed.
    pub fn on_file_edit(&self, event: &FileEditEvent) -> Option<ModificationRecord> {
        match self.record_edit(event) {
            Some((record, true)) => Some(record),
            _ => None,
        }
    }

    /// The built record and whether it was newly stored, or None if the
    /// event was rejected
    fn record_edit(&self, event: &FileEditEvent) -> Option<(ModificationRecord, bool)> {
        if event.session_id.trim().is_empty() || event.file_path.trim().is_empty() {
            warn!("Ignoring edit event without session or file path");
            return None;
        }

        let record = self.build_modification(event, event.timestamp);
        match self.store.append_modification(&record) {
            Ok(stored) => {
                if stored {
                    debug!(
                        "Recorded {} edit to {} ({}%)",
                        record.severity, record.file_path, record.stats.change_percentage
                    );
                } else {
                    debug!("Edit {} to {} already recorded", record.id, record.file_path);
                }
                Some((record, stored))
            }
            Err(e) => {
                warn!("Failed to store modification for {}: {}", event.file_path, e);
                None
            }
        }
    }

    /// Close a session: score it from its stored modifications and store the
    /// feedback record. Returns None if the session was already closed or the
    /// store failed.
    pub fn on_session_end(&self, event: &SessionEndEvent) -> Option<FeedbackRecord> {
        if event.session_id.trim().is_empty() {
            warn!("Ignoring session end without session id");
            return None;
        }
        if !self.valid_rating(event) {
            return None;
        }

        let modifications = match self.store.modifications_for_session(&event.session_id) {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to load modifications for {}: {}", event.session_id, e);
                return None;
            }
        };

        let unrecorded = event
            .files_modified
            .iter()
            .filter(|f| !modifications.iter().any(|m| m.file_path == f.path))
            .count();
        if unrecorded > 0 {
            debug!(
                "Session {} lists {} modified files with no recorded edit",
                event.session_id, unrecorded
            );
        }

        let feedback = build_feedback(event, &modifications, event.timestamp);
        match self.store.append_feedback(&feedback) {
            Ok(true) => {
                info!(
                    "Session {} closed: satisfaction {:.1} over {} edits",
                    feedback.session_id,
                    feedback.satisfaction,
                    modifications.len()
                );
                Some(feedback)
            }
            Ok(false) => {
                debug!("Session {} already has feedback", event.session_id);
                None
            }
            Err(e) => {
                warn!("Failed to store feedback for {}: {}", event.session_id, e);
                None
            }
        }
    }

    fn valid_rating(&self, event: &SessionEndEvent) -> bool {
        match event.user_rating {
            Some(rating) if !rating.is_finite() || !(0.0..=self.max_rating).contains(&rating) => {
                warn!(
                    "Ignoring session {} with rating {} outside [0, {}]",
                    event.session_id, rating, self.max_rating
                );
                false
            }
            _ => true,
        }
    }

    /// Record a scored generation. Returns true if it was newly stored.
    ///
    /// A record without an id gets one derived from its content.
    pub fn on_execution(&self, record: &ExecutionRecord) -> bool {
        self.record_execution(record.clone()).unwrap_or(false)
    }

    /// Record a generation from its raw output, tagging elements with the
    /// collector's extractor
    pub fn on_output(&self, mut record: ExecutionRecord, output: &str) -> bool {
        record.elements_used = self.extractor.extract(output);
        self.record_execution(record).unwrap_or(false)
    }

    /// Whether the record was newly stored, or None if it was rejected
    fn record_execution(&self, mut record: ExecutionRecord) -> Option<bool> {
        if record.id.is_empty() {
            record.id = execution_id(&record);
        }
        if let Err(e) = record.validate() {
            warn!("Rejecting execution record: {}", e);
            return None;
        }
        match self.store.append_execution(&record) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("Failed to store execution {}: {}", record.id, e);
                None
            }
        }
    }

    /// Ingest JSON-lines execution records
    pub fn ingest_executions<R: BufRead>(&self, reader: R) -> IngestSummary {
        ingest_lines::<ExecutionLine, _, _>(reader, "execution", |line| {
            let mut record = line.record;
            if record.elements_used.is_empty() {
                if let Some(output) = &line.output {
                    record.elements_used = self.extractor.extract(output);
                }
            }
            self.record_execution(record)
        })
    }

    /// Ingest JSON-lines file edit events
    pub fn ingest_edits<R: BufRead>(&self, reader: R) -> IngestSummary {
        ingest_lines::<FileEditEvent, _, _>(reader, "edit", |event| {
            self.record_edit(&event).map(|(_, stored)| stored)
        })
    }

    /// Ingest JSON-lines session end events
    pub fn ingest_sessions<R: BufRead>(&self, reader: R) -> IngestSummary {
        ingest_lines::<SessionEndEvent, _, _>(reader, "session", |event| {
            if event.session_id.trim().is_empty() || !self.valid_rating(&event) {
                return None;
            }
            Some(self.on_session_end(&event).is_some())
        })
    }
}

/// Parse each non-blank line as `T` and hand it to `handle`, which returns
/// None for a rejected record or whether it was newly stored.
fn ingest_lines<T, R, F>(reader: R, kind: &str, mut handle: F) -> IngestSummary
where
    T: DeserializeOwned,
    R: BufRead,
    F: FnMut(T) -> Option<bool>,
{
    let mut summary = IngestSummary::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Stopping {} ingestion at line {}: {}", kind, idx + 1, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        summary.read += 1;

        let parsed: T = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping malformed {} at line {}: {}", kind, idx + 1, e);
                summary.skipped += 1;
                continue;
            }
        };

        match handle(parsed) {
            Some(true) => summary.stored += 1,
            Some(false) => summary.duplicates += 1,
            None => {
                warn!("Skipping rejected {} at line {}", kind, idx + 1);
                summary.skipped += 1;
            }
        }
    }

    info!(
        "Ingested {} {} records ({} stored, {} duplicate, {} skipped)",
        summary.read, kind, summary.stored, summary.duplicates, summary.skipped
    );
    summary
}

/// How an edit was made, preferring the user action over the edit type
fn edit_source(event: &FileEditEvent) -> String {
    if event.user_action.trim().is_empty() {
        event.edit_type.clone()
    } else {
        event.user_action.clone()
    }
}

/// Content hash used as a snapshot reference
pub fn content_ref(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Stable id for an execution that arrived without one
pub fn execution_id(record: &ExecutionRecord) -> String {
    let elements: Vec<&str> = record.elements_used.iter().map(String::as_str).collect();
    digest_id(&[
        record.session_id.as_str(),
        record.generator_name.as_str(),
        record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true).as_str(),
        elements.join(",").as_str(),
    ])
}

fn digest_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
