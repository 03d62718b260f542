//! SQLite-backed learning tables
//!
//! Execution, modification and feedback records are append-only. Element
//! weights and mined patterns are replaced wholesale by their batch passes,
//! each replacement running in one transaction that also bumps the table's
//! row in `table_versions`. A failed replacement rolls back and leaves the
//! previous table readable.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{
    ElementWeight, ExecutionRecord, FeedbackRecord, ModificationRecord, Pattern, PatternCategory,
    RecordError, Severity, Trend,
};

/// Version row name of the element weight table
pub const WEIGHTS_TABLE: &str = "element_weights";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to prepare store location: {0}")]
    Io(#[from] std::io::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}

/// An execution record together with its insertion sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct StoredExecution {
    pub seq: i64,
    pub record: ExecutionRecord,
}

/// Bookkeeping row for a wholesale-replaced table
#[derive(Debug, Clone, PartialEq)]
pub struct TableVersion {
    pub name: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    /// Highest execution sequence consumed by the pass that wrote the table
    pub watermark: Option<i64>,
    /// Total execution records consumed over the table's history
    pub records_seen: u64,
}

/// Row counts for status output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub executions: u64,
    pub modifications: u64,
    pub feedback: u64,
    pub weights: u64,
    pub patterns: u64,
}

/// Persistent store for every learning table
pub struct LearningStore {
    conn: Mutex<Connection>,
}

impl LearningStore {
    /// Open (or create) a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;
        debug!("Opened learning store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests and dry runs
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            -- Scored generations, append-only
            CREATE TABLE IF NOT EXISTS executions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                generator TEXT NOT NULL,
                elements TEXT NOT NULL DEFAULT '[]',
                quality REAL NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                domain TEXT,
                query_domains TEXT NOT NULL DEFAULT '[]'
            );

            -- Classified file edits, append-only
            CREATE TABLE IF NOT EXISTS modifications (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                generated_by TEXT NOT NULL,
                edit_source TEXT NOT NULL,
                before_ref TEXT NOT NULL,
                after_ref TEXT NOT NULL,
                stats TEXT NOT NULL,
                categories TEXT NOT NULL DEFAULT '[]',
                severity TEXT NOT NULL,
                note TEXT,
                created_at TEXT NOT NULL
            );

            -- One feedback row per closed session
            CREATE TABLE IF NOT EXISTS feedback (
                session_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                satisfaction REAL NOT NULL,
                user_rating REAL,
                generator_stats TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS element_weights (
                element TEXT PRIMARY KEY,
                weight REAL NOT NULL CHECK (weight >= 0.0 AND weight <= 1.0),
                last_used TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0,
                quality_sum REAL NOT NULL DEFAULT 0,
                trend TEXT NOT NULL DEFAULT 'steady',
                decayed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                rank INTEGER NOT NULL,
                items TEXT NOT NULL,
                support REAL NOT NULL CHECK (support > 0.0 AND support <= 1.0),
                confidence REAL NOT NULL,
                occurrences INTEGER NOT NULL,
                mean_quality REAL NOT NULL,
                mean_satisfaction REAL
            );

            CREATE TABLE IF NOT EXISTS table_versions (
                name TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                watermark INTEGER,
                records_seen INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_executions_timestamp ON executions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_executions_session ON executions(session_id);
            CREATE INDEX IF NOT EXISTS idx_modifications_session ON modifications(session_id);
            CREATE INDEX IF NOT EXISTS idx_feedback_timestamp ON feedback(timestamp);
            CREATE INDEX IF NOT EXISTS idx_patterns_category ON patterns(category, rank);
            CREATE INDEX IF NOT EXISTS idx_weights_weight ON element_weights(weight DESC);
        "#,
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ---- append-only tables ----

    /// Append an execution record. Returns false if the id already exists.
    pub fn append_execution(&self, record: &ExecutionRecord) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO executions
               (id, session_id, timestamp, generator, elements, quality, duration_ms, domain, query_domains)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                record.id,
                record.session_id,
                ts(&record.timestamp),
                record.generator_name,
                serde_json::to_string(&record.elements_used)?,
                record.quality_score,
                record.duration_ms as i64,
                record.domain,
                serde_json::to_string(&record.query_domains)?,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Append a modification record. Returns false if the id already exists.
    pub fn append_modification(&self, record: &ModificationRecord) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO modifications
               (id, session_id, file_path, generated_by, edit_source, before_ref, after_ref,
                stats, categories, severity, note, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                record.id,
                record.session_id,
                record.file_path,
                record.generated_by,
                record.edit_source,
                record.before_ref,
                record.after_ref,
                serde_json::to_string(&record.stats)?,
                serde_json::to_string(&record.categories)?,
                record.severity.as_str(),
                record.note,
                ts(&record.created_at),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Append a feedback record. A session gets at most one; later duplicates
    /// are ignored and false is returned.
    pub fn append_feedback(&self, record: &FeedbackRecord) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO feedback
               (session_id, timestamp, satisfaction, user_rating, generator_stats)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                record.session_id,
                ts(&record.timestamp),
                record.satisfaction,
                record.user_rating,
                serde_json::to_string(&record.generator_stats)?,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Executions with `from <= timestamp < to`, oldest first
    pub fn executions_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"SELECT seq, id, session_id, timestamp, generator, elements, quality,
                      duration_ms, domain, query_domains
               FROM executions
               WHERE timestamp >= ?1 AND timestamp < ?2
               ORDER BY timestamp ASC, seq ASC"#,
        )?;
        let rows = stmt
            .query_map(params![ts(&from), ts(&to)], ExecutionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(decode_rows(rows).into_iter().map(|s| s.record).collect())
    }

    /// Executions inserted after the given sequence number, in insertion order
    pub fn executions_after(&self, seq: i64) -> Result<Vec<StoredExecution>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"SELECT seq, id, session_id, timestamp, generator, elements, quality,
                      duration_ms, domain, query_domains
               FROM executions
               WHERE seq > ?1
               ORDER BY seq ASC"#,
        )?;
        let rows = stmt
            .query_map(params![seq], ExecutionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(decode_rows(rows))
    }

    /// Highest execution sequence number whose timestamp is before `before`
    pub fn last_seq_before(&self, before: DateTime<Utc>) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let seq: Option<i64> = conn.query_row(
            "SELECT MAX(seq) FROM executions WHERE timestamp < ?1",
            params![ts(&before)],
            |row| row.get(0),
        )?;
        Ok(seq.unwrap_or(0))
    }

    pub fn modifications_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ModificationRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"SELECT id, session_id, file_path, generated_by, edit_source, before_ref, after_ref,
                      stats, categories, severity, note, created_at
               FROM modifications
               WHERE session_id = ?1
               ORDER BY created_at ASC"#,
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(ModificationRow {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    file_path: row.get(2)?,
                    generated_by: row.get(3)?,
                    edit_source: row.get(4)?,
                    before_ref: row.get(5)?,
                    after_ref: row.get(6)?,
                    stats: row.get(7)?,
                    categories: row.get(8)?,
                    severity: row.get(9)?,
                    note: row.get(10)?,
                    created_at: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                row.decode()
                    .map_err(|e| warn!("Skipping malformed modification {}: {}", id, e))
                    .ok()
            })
            .collect())
    }

    /// Feedback records with `from <= timestamp < to`, oldest first
    pub fn feedback_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FeedbackRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"SELECT session_id, timestamp, satisfaction, user_rating, generator_stats
               FROM feedback
               WHERE timestamp >= ?1 AND timestamp < ?2
               ORDER BY timestamp ASC"#,
        )?;
        let rows = stmt
            .query_map(params![ts(&from), ts(&to)], FeedbackRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(decode_feedback(rows))
    }

    /// Feedback for the given sessions, keyed by session id
    pub fn feedback_for_sessions(
        &self,
        session_ids: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, FeedbackRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"SELECT session_id, timestamp, satisfaction, user_rating, generator_stats
               FROM feedback WHERE session_id = ?1"#,
        )?;

        let mut rows = Vec::new();
        for session_id in session_ids {
            if let Some(row) = stmt
                .query_row(params![session_id], FeedbackRow::from_row)
                .optional()?
            {
                rows.push(row);
            }
        }

        Ok(decode_feedback(rows)
            .into_iter()
            .map(|f| (f.session_id.clone(), f))
            .collect())
    }

    // ---- wholesale-replaced tables ----

    /// Full element weight table, ordered by element key
    pub fn load_weights(&self) -> Result<Vec<ElementWeight>, StoreError> {
        self.query_weights(
            r#"SELECT element, weight, last_used, usage_count, quality_sum, trend, decayed_at
               FROM element_weights ORDER BY element ASC"#,
            params![],
        )
    }

    /// Highest-weighted elements first
    pub fn top_weights(&self, limit: usize) -> Result<Vec<ElementWeight>, StoreError> {
        self.query_weights(
            r#"SELECT element, weight, last_used, usage_count, quality_sum, trend, decayed_at
               FROM element_weights ORDER BY weight DESC, element ASC LIMIT ?1"#,
            params![limit as i64],
        )
    }

    pub fn weight(&self, element: &str) -> Result<Option<ElementWeight>, StoreError> {
        Ok(self
            .query_weights(
                r#"SELECT element, weight, last_used, usage_count, quality_sum, trend, decayed_at
                   FROM element_weights WHERE element = ?1"#,
                params![element],
            )?
            .into_iter()
            .next())
    }

    fn query_weights(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ElementWeight>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(WeightRow {
                    element: row.get(0)?,
                    weight: row.get(1)?,
                    last_used: row.get(2)?,
                    usage_count: row.get(3)?,
                    quality_sum: row.get(4)?,
                    trend: row.get(5)?,
                    decayed_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let element = row.element.clone();
                row.decode()
                    .map_err(|e| warn!("Skipping malformed weight row {}: {}", element, e))
                    .ok()
            })
            .collect())
    }

    /// Replace the whole weight table and advance its watermark.
    /// Returns the new table version.
    pub fn replace_weights(
        &self,
        weights: &[ElementWeight],
        watermark: i64,
        records_seen: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM element_weights", [])?;
        {
            let mut stmt = tx.prepare_cached(
                r#"INSERT INTO element_weights
                   (element, weight, last_used, usage_count, quality_sum, trend, decayed_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            )?;
            for w in weights {
                stmt.execute(params![
                    w.element,
                    w.weight,
                    ts(&w.last_used),
                    w.usage_count as i64,
                    w.quality_sum,
                    w.trend.as_str(),
                    w.decayed_at.as_ref().map(ts),
                ])?;
            }
        }
        let version = bump_version(&tx, WEIGHTS_TABLE, now, Some(watermark), records_seen)?;

        tx.commit()?;
        debug!("Replaced weight table with {} rows (v{})", weights.len(), version);
        Ok(version)
    }

    /// Patterns of one category, best first
    pub fn patterns_by_category(&self, category: PatternCategory) -> Result<Vec<Pattern>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"SELECT items, support, confidence, occurrences, mean_quality, mean_satisfaction
               FROM patterns WHERE category = ?1 ORDER BY rank ASC"#,
        )?;
        let rows = stmt
            .query_map(params![category.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut patterns = Vec::with_capacity(rows.len());
        for (items, support, confidence, occurrences, mean_quality, mean_satisfaction) in rows {
            match serde_json::from_str::<Vec<String>>(&items) {
                Ok(items) => patterns.push(Pattern {
                    items,
                    support,
                    confidence,
                    category,
                    occurrences: occurrences.max(0) as usize,
                    mean_quality,
                    mean_satisfaction,
                }),
                Err(e) => warn!("Skipping malformed {} pattern: {}", category, e),
            }
        }
        Ok(patterns)
    }

    /// Replace the pattern tables of the given categories in one transaction.
    /// Categories not listed are left untouched.
    pub fn replace_patterns(
        &self,
        sets: &[(PatternCategory, &[Pattern])],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for (category, patterns) in sets {
            tx.execute(
                "DELETE FROM patterns WHERE category = ?1",
                params![category.as_str()],
            )?;
            {
                let mut stmt = tx.prepare_cached(
                    r#"INSERT INTO patterns
                       (category, rank, items, support, confidence, occurrences, mean_quality, mean_satisfaction)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                )?;
                for (rank, p) in patterns.iter().enumerate() {
                    stmt.execute(params![
                        category.as_str(),
                        rank as i64,
                        serde_json::to_string(&p.items)?,
                        p.support,
                        p.confidence,
                        p.occurrences as i64,
                        p.mean_quality,
                        p.mean_satisfaction,
                    ])?;
                }
            }
            bump_version(&tx, &pattern_table_name(*category), now, None, 0)?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn table_version(&self, name: &str) -> Result<Option<TableVersion>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"SELECT name, version, updated_at, watermark, records_seen
                   FROM table_versions WHERE name = ?1"#,
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(name, version, updated_at, watermark, records_seen)| TableVersion {
            name,
            version: version.max(0) as u64,
            updated_at: parse_ts(&updated_at).unwrap_or_default(),
            watermark,
            records_seen: records_seen.max(0) as u64,
        }))
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<u64, StoreError> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
            Ok(n.max(0) as u64)
        };

        Ok(StoreStats {
            executions: count("executions")?,
            modifications: count("modifications")?,
            feedback: count("feedback")?,
            weights: count("element_weights")?,
            patterns: count("patterns")?,
        })
    }
}

/// Version row name of a pattern category
pub fn pattern_table_name(category: PatternCategory) -> String {
    format!("patterns:{}", category)
}

fn bump_version(
    tx: &Transaction<'_>,
    name: &str,
    now: DateTime<Utc>,
    watermark: Option<i64>,
    records_seen: u64,
) -> Result<u64, StoreError> {
    tx.execute(
        r#"INSERT INTO table_versions (name, version, updated_at, watermark, records_seen)
           VALUES (?1, 1, ?2, ?3, ?4)
           ON CONFLICT(name) DO UPDATE SET
               version = version + 1,
               updated_at = excluded.updated_at,
               watermark = excluded.watermark,
               records_seen = excluded.records_seen"#,
        params![name, ts(&now), watermark, records_seen as i64],
    )?;
    let version: i64 = tx.query_row(
        "SELECT version FROM table_versions WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(version.max(0) as u64)
}

/// Fixed-width RFC 3339 so text comparison orders correctly
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn decode_ts(s: &str) -> Result<DateTime<Utc>, RecordError> {
    parse_ts(s).ok_or_else(|| RecordError::Timestamp(s.to_string()))
}

struct ExecutionRow {
    seq: i64,
    id: String,
    session_id: String,
    timestamp: String,
    generator: String,
    elements: String,
    quality: f64,
    duration_ms: i64,
    domain: Option<String>,
    query_domains: String,
}

impl ExecutionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            session_id: row.get(2)?,
            timestamp: row.get(3)?,
            generator: row.get(4)?,
            elements: row.get(5)?,
            quality: row.get(6)?,
            duration_ms: row.get(7)?,
            domain: row.get(8)?,
            query_domains: row.get(9)?,
        })
    }

    fn decode(self) -> Result<StoredExecution, RecordError> {
        let timestamp = decode_ts(&self.timestamp)?;
        let elements_used = serde_json::from_str(&self.elements)?;
        let query_domains = serde_json::from_str(&self.query_domains)?;

        let record = ExecutionRecord {
            id: self.id,
            session_id: self.session_id,
            timestamp,
            generator_name: self.generator,
            elements_used,
            quality_score: self.quality,
            duration_ms: self.duration_ms.max(0) as u64,
            domain: self.domain,
            query_domains,
        };
        record.validate()?;

        Ok(StoredExecution {
            seq: self.seq,
            record,
        })
    }
}

fn decode_rows(rows: Vec<ExecutionRow>) -> Vec<StoredExecution> {
    rows.into_iter()
        .filter_map(|row| {
            let seq = row.seq;
            row.decode()
                .map_err(|e| warn!("Skipping malformed execution seq {}: {}", seq, e))
                .ok()
        })
        .collect()
}

struct ModificationRow {
    id: String,
    session_id: String,
    file_path: String,
    generated_by: String,
    edit_source: String,
    before_ref: String,
    after_ref: String,
    stats: String,
    categories: String,
    severity: String,
    note: Option<String>,
    created_at: String,
}

impl ModificationRow {
    fn decode(self) -> Result<ModificationRecord, RecordError> {
        Ok(ModificationRecord {
            id: self.id,
            session_id: self.session_id,
            file_path: self.file_path,
            generated_by: self.generated_by,
            edit_source: self.edit_source,
            before_ref: self.before_ref,
            after_ref: self.after_ref,
            stats: serde_json::from_str(&self.stats)?,
            categories: serde_json::from_str(&self.categories)?,
            severity: Severity::parse(&self.severity)
                .ok_or_else(|| RecordError::Severity(self.severity.clone()))?,
            note: self.note,
            created_at: decode_ts(&self.created_at)?,
        })
    }
}

struct FeedbackRow {
    session_id: String,
    timestamp: String,
    satisfaction: f64,
    user_rating: Option<f64>,
    generator_stats: String,
}

impl FeedbackRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            timestamp: row.get(1)?,
            satisfaction: row.get(2)?,
            user_rating: row.get(3)?,
            generator_stats: row.get(4)?,
        })
    }

    fn decode(self) -> Result<FeedbackRecord, RecordError> {
        Ok(FeedbackRecord {
            timestamp: decode_ts(&self.timestamp)?,
            generator_stats: serde_json::from_str(&self.generator_stats)?,
            session_id: self.session_id,
            satisfaction: self.satisfaction,
            user_rating: self.user_rating,
        })
    }
}

fn decode_feedback(rows: Vec<FeedbackRow>) -> Vec<FeedbackRecord> {
    rows.into_iter()
        .filter_map(|row| {
            let session_id = row.session_id.clone();
            row.decode()
                .map_err(|e| warn!("Skipping malformed feedback for {}: {}", session_id, e))
                .ok()
        })
        .collect()
}

struct WeightRow {
    element: String,
    weight: f64,
    last_used: String,
    usage_count: i64,
    quality_sum: f64,
    trend: String,
    decayed_at: Option<String>,
}

impl WeightRow {
    fn decode(self) -> Result<ElementWeight, RecordError> {
        let decayed_at = match self.decayed_at {
            Some(s) => Some(decode_ts(&s)?),
            None => None,
        };
        Ok(ElementWeight {
            last_used: decode_ts(&self.last_used)?,
            element: self.element,
            weight: self.weight,
            usage_count: self.usage_count.max(0) as u64,
            quality_sum: self.quality_sum,
            trend: Trend::parse(&self.trend),
            decayed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::diff::compute_diff;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn weight(element: &str, value: f64) -> ElementWeight {
        ElementWeight {
            element: element.to_string(),
            weight: value,
            last_used: t0(),
            usage_count: 3,
            quality_sum: 2.4,
            trend: Trend::Rising,
            decayed_at: None,
        }
    }

    fn pattern(items: &[&str], support: f64) -> Pattern {
        Pattern {
            items: items.iter().map(|s| s.to_string()).collect(),
            support,
            confidence: 0.8,
            category: PatternCategory::Success,
            occurrences: 4,
            mean_quality: 0.9,
            mean_satisfaction: Some(88.0),
        }
    }

    #[test]
    fn test_execution_round_trip_and_window() {
        let store = LearningStore::in_memory().unwrap();
        let early = ExecutionRecord::new("s1", "gen", 0.9)
            .with_elements(["style:flat", "color:blue"])
            .with_queries(["product", "style"])
            .in_domain("saas")
            .at(t0());
        let late = ExecutionRecord::new("s2", "gen", 0.4).at(t0() + Duration::days(3));

        assert!(store.append_execution(&early).unwrap());
        assert!(!store.append_execution(&early).unwrap());
        assert!(store.append_execution(&late).unwrap());

        let window = store
            .executions_between(t0() - Duration::hours(1), t0() + Duration::days(1))
            .unwrap();
        assert_eq!(window, vec![early.clone()]);

        let after = store.executions_after(1).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].record.id, late.id);
        assert_eq!(store.last_seq_before(t0() + Duration::days(1)).unwrap(), 1);
    }

    #[test]
    fn test_feedback_one_per_session() {
        let store = LearningStore::in_memory().unwrap();
        let feedback = FeedbackRecord {
            session_id: "s1".to_string(),
            timestamp: t0(),
            satisfaction: 75.0,
            user_rating: Some(4.0),
            generator_stats: BTreeMap::new(),
        };
        assert!(store.append_feedback(&feedback).unwrap());
        assert!(!store.append_feedback(&feedback).unwrap());

        let sessions: BTreeSet<String> = ["s1".to_string(), "missing".to_string()].into();
        let found = store.feedback_for_sessions(&sessions).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["s1"], feedback);
    }

    #[test]
    fn test_modifications_by_session() {
        let store = LearningStore::in_memory().unwrap();
        let record = ModificationRecord {
            id: "m1".to_string(),
            session_id: "s1".to_string(),
            file_path: "index.html".to_string(),
            generated_by: "page-gen".to_string(),
            edit_source: "typing".to_string(),
            before_ref: "aa".to_string(),
            after_ref: "bb".to_string(),
            stats: compute_diff(&["a", "b", "c"], &["a", "x", "c"]),
            categories: ["focused".to_string()].into(),
            severity: Severity::Major,
            note: None,
            created_at: t0(),
        };
        store.append_modification(&record).unwrap();

        assert_eq!(store.modifications_for_session("s1").unwrap(), vec![record]);
        assert!(store.modifications_for_session("s2").unwrap().is_empty());
    }

    #[test]
    fn test_weight_replace_bumps_version() {
        let store = LearningStore::in_memory().unwrap();
        assert!(store.table_version(WEIGHTS_TABLE).unwrap().is_none());

        let v1 = store
            .replace_weights(&[weight("style:flat", 0.7), weight("color:blue", 0.2)], 10, 10, t0())
            .unwrap();
        let v2 = store
            .replace_weights(&[weight("style:flat", 0.6)], 12, 12, t0())
            .unwrap();
        assert_eq!((v1, v2), (1, 2));

        let version = store.table_version(WEIGHTS_TABLE).unwrap().unwrap();
        assert_eq!(version.watermark, Some(12));
        assert_eq!(version.records_seen, 12);
        assert_eq!(store.load_weights().unwrap(), vec![weight("style:flat", 0.6)]);
    }

    #[test]
    fn test_failed_replace_keeps_previous_table() {
        let store = LearningStore::in_memory().unwrap();
        store
            .replace_weights(&[weight("style:flat", 0.7)], 5, 5, t0())
            .unwrap();

        let result = store.replace_weights(
            &[weight("style:flat", 0.1), weight("color:red", 1.5)],
            9,
            9,
            t0(),
        );
        assert!(result.is_err());

        assert_eq!(store.load_weights().unwrap(), vec![weight("style:flat", 0.7)]);
        let version = store.table_version(WEIGHTS_TABLE).unwrap().unwrap();
        assert_eq!(version.version, 1);
        assert_eq!(version.watermark, Some(5));
    }

    #[test]
    fn test_top_weights_order() {
        let store = LearningStore::in_memory().unwrap();
        store
            .replace_weights(
                &[weight("a:1", 0.2), weight("b:1", 0.9), weight("c:1", 0.5)],
                3,
                3,
                t0(),
            )
            .unwrap();
        let top: Vec<String> = store
            .top_weights(2)
            .unwrap()
            .into_iter()
            .map(|w| w.element)
            .collect();
        assert_eq!(top, vec!["b:1", "c:1"]);
        assert_eq!(store.weight("c:1").unwrap().map(|w| w.weight), Some(0.5));
    }

    #[test]
    fn test_pattern_replace_is_per_category_and_atomic() {
        let store = LearningStore::in_memory().unwrap();
        let first = vec![pattern(&["a:1", "b:1"], 0.5), pattern(&["a:1"], 0.4)];
        store
            .replace_patterns(&[(PatternCategory::Success, first.as_slice())], t0())
            .unwrap();

        let bad = vec![pattern(&["c:1"], 1.5)];
        let failure = vec![pattern(&["d:1"], 0.3)];
        let result = store.replace_patterns(
            &[
                (PatternCategory::Failure, failure.as_slice()),
                (PatternCategory::Success, bad.as_slice()),
            ],
            t0(),
        );
        assert!(result.is_err());

        assert_eq!(store.patterns_by_category(PatternCategory::Success).unwrap(), first);
        assert!(store.patterns_by_category(PatternCategory::Failure).unwrap().is_empty());
        let name = pattern_table_name(PatternCategory::Success);
        assert_eq!(store.table_version(&name).unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_malformed_execution_rows_are_skipped() {
        let store = LearningStore::in_memory().unwrap();
        store
            .append_execution(&ExecutionRecord::new("s1", "gen", 0.5).at(t0()))
            .unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                r#"INSERT INTO executions (id, session_id, timestamp, generator, elements, quality)
                   VALUES ('bad-ts', 's2', 'yesterday', 'gen', '[]', 0.5),
                          ('bad-json', 's3', '2026-03-01T12:00:00Z', 'gen', '{', 0.5)"#,
                [],
            )
            .unwrap();

        let rows = store.executions_after(0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.session_id, "s1");
    }

    #[test]
    fn test_decode_reports_record_errors() {
        let row = WeightRow {
            element: "style:flat".to_string(),
            weight: 0.5,
            last_used: "not a time".to_string(),
            usage_count: 1,
            quality_sum: 0.5,
            trend: "steady".to_string(),
            decayed_at: None,
        };
        assert!(matches!(row.decode(), Err(RecordError::Timestamp(s)) if s == "not a time"));

        let row = FeedbackRow {
            session_id: "s1".to_string(),
            timestamp: ts(&t0()),
            satisfaction: 80.0,
            user_rating: None,
            generator_stats: "[".to_string(),
        };
        assert!(matches!(row.decode(), Err(RecordError::Json(_))));
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("learning.db");
        {
            let store = LearningStore::open(&path).unwrap();
            store
                .append_execution(&ExecutionRecord::new("s1", "gen", 0.5).at(t0()))
                .unwrap();
        }
        let store = LearningStore::open(&path).unwrap();
        assert_eq!(store.stats().unwrap().executions, 1);
    }
}
