//! End-to-end test of the learning loop against an on-disk store

use chrono::{DateTime, Duration, TimeZone, Utc};
use design_evolve::config::LearningConfig;
use design_evolve::feedback::FeedbackCollector;
use design_evolve::learning::{
    profile_from_store, run_passes, AnalogueMap, ConfigEvolver, PatternMiner, Recommendation, TransferRecommender,
    WeightTable,
};
use design_evolve::memory::LearningStore;
use design_evolve::types::{ExecutionRecord, FileEditEvent, ModifiedFile, PatternCategory, SessionEndEvent};
use std::io::Cursor;
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
}

fn seed(collector: &FeedbackCollector) {
    for i in 0..10 {
        let record = ExecutionRecord::new(&format!("saas-{}", i), "page-gen", 0.9)
            .with_elements(["hero", "pricing"])
            .in_domain("saas")
            .at(now() - Duration::hours(i + 1));
        assert!(collector.on_execution(&record));
    }
    for i in 0..5 {
        let record = ExecutionRecord::new(&format!("fin-{}", i), "page-gen", 0.7)
            .with_elements(["hero", "pricing", "chart"])
            .in_domain("fintech")
            .at(now() - Duration::hours(20 + i));
        assert!(collector.on_execution(&record));
    }
    for i in 0..4 {
        let record = ExecutionRecord::new(&format!("bad-{}", i), "page-gen", 0.3)
            .with_elements(["carousel"])
            .in_domain("saas")
            .at(now() - Duration::hours(30 + i));
        assert!(collector.on_execution(&record));
    }
}

#[test]
fn test_full_loop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("learning.db");
    let config = LearningConfig::default();

    {
        let store = Arc::new(LearningStore::open(&db)?);
        let collector = FeedbackCollector::new(store.clone(), &config);
        seed(&collector);

        // A generation the user rewrote and rated poorly
        let edited = ExecutionRecord::new("edited", "page-gen", 0.9)
            .with_elements(["hero", "modal"])
            .in_domain("saas")
            .at(now() - Duration::hours(2));
        assert!(collector.on_execution(&edited));

        let modification = collector
            .on_file_edit(&FileEditEvent {
                file_path: "src/page.html".into(),
                generated_by: "page-gen".into(),
                previous_content: Some("a\nb\nc\nd\n".into()),
                new_content: "a\nB\nc\nd\n".into(),
                edit_type: "manual".into(),
                user_action: String::new(),
                session_id: "edited".into(),
                timestamp: now() - Duration::hours(1),
            })
            .expect("edit stored");
        assert_eq!(modification.stats.lines_modified, 1);

        let session_end = SessionEndEvent {
            session_id: "edited".into(),
            files_modified: vec![ModifiedFile {
                path: "src/page.html".into(),
                generated_by: "page-gen".into(),
            }],
            user_rating: Some(1.0),
            timestamp: now() - Duration::minutes(30),
        };
        let feedback = collector.on_session_end(&session_end).expect("feedback stored");
        assert!(feedback.satisfaction < 100.0);
        assert_eq!(feedback.generator_stats["page-gen"].modifications, 1);

        // Closing a session twice keeps the first record
        assert!(collector.on_session_end(&session_end).is_none());

        let summary = run_passes(&store, &config, now())?;
        assert_eq!(summary.weights.records_consumed, 20);
        assert_eq!(summary.weights.version, 1);

        let patterns = &summary.patterns;
        assert_eq!(patterns.stats.window_records, 20);
        assert_eq!(patterns.stats.success_records, 10);
        assert_eq!(patterns.stats.failure_records, 5);
        assert!(patterns
            .success
            .iter()
            .any(|p| p.items == vec!["hero".to_string(), "pricing".to_string()]));
        assert!(patterns.failure.iter().any(|p| p.items == vec!["carousel".to_string()]));

        let hero = store.weight("hero")?.expect("hero weighted");
        let carousel = store.weight("carousel")?.expect("carousel weighted");
        assert!(hero.weight > carousel.weight);
        assert_eq!(hero.usage_count, 16);
    }

    // Reopen: tables persist and the watermark stops reprocessing
    let store = Arc::new(LearningStore::open(&db)?);
    assert!(!store.patterns_by_category(PatternCategory::Success)?.is_empty());

    let rerun = run_passes(&store, &config, now())?;
    assert_eq!(rerun.weights.records_consumed, 0);
    assert_eq!(rerun.weights.version, 2);

    let collector = FeedbackCollector::new(store.clone(), &config);
    let late = ExecutionRecord::new("late", "page-gen", 0.95)
        .with_elements(["hero"])
        .in_domain("saas")
        .at(now() - Duration::days(2));
    assert!(collector.on_execution(&late));

    let next = run_passes(&store, &config, now() + Duration::hours(1))?;
    assert_eq!(next.weights.records_consumed, 1);
    assert_eq!(next.weights.version, 3);

    Ok(())
}

#[test]
fn test_transfer_between_domains() -> anyhow::Result<()> {
    let store = Arc::new(LearningStore::in_memory()?);
    let mut config = LearningConfig::default();
    config.transfer.similarity_threshold = 0.0;

    let collector = FeedbackCollector::new(store.clone(), &config);
    seed(&collector);
    run_passes(&store, &config, now())?;

    let miner = PatternMiner::new(config.patterns.clone());
    let from = now() - Duration::days(30);
    let saas = profile_from_store(&store, "saas", &miner, from, now())?;
    let fintech = profile_from_store(&store, "fintech", &miner, from, now())?;

    let report = TransferRecommender::new(config.transfer.clone()).recommend(&saas, &fintech, &AnalogueMap::new());
    assert_eq!(report.source_domain, "saas");
    assert!(!report.transferred.is_empty());
    for t in &report.transferred {
        let expected = report.similarity.combined * t.original_support;
        assert!((t.adaptation_confidence - expected).abs() < 1e-12);
        assert!(t.pattern.items.iter().all(|i| fintech.vocabulary().contains(i.as_str())));
    }

    // Confidence ordering, best first
    for pair in report.transferred.windows(2) {
        assert!(pair[0].adaptation_confidence >= pair[1].adaptation_confidence);
    }

    Ok(())
}

#[test]
fn test_ingest_json_lines() -> anyhow::Result<()> {
    let store = Arc::new(LearningStore::in_memory()?);
    let collector = FeedbackCollector::new(store.clone(), &LearningConfig::default());

    let line = r#"{"id":"e1","session_id":"s1","timestamp":"2026-04-30T10:00:00Z","generator_name":"page-gen","elements_used":["hero"],"quality_score":0.9}"#;
    let out_of_range = r#"{"id":"e2","session_id":"s1","timestamp":"2026-04-30T10:00:00Z","generator_name":"page-gen","elements_used":[],"quality_score":1.5}"#;
    let input = format!("{}\n\n{}\n{{\n{}\n", line, line, out_of_range);

    let summary = collector.ingest_executions(Cursor::new(input));
    assert_eq!(summary.read, 4);
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(store.stats()?.executions, 1);

    Ok(())
}

#[test]
fn test_evolved_config_round_trips_through_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(LearningStore::in_memory()?);
    let config = LearningConfig::default();

    let collector = FeedbackCollector::new(store.clone(), &config);
    for i in 0..5 {
        let record = ExecutionRecord::new(&format!("q-{}", i), "page-gen", 0.9)
            .with_elements(["hero"])
            .with_queries(["style", "color"])
            .at(now() - Duration::hours(i + 1));
        assert!(collector.on_execution(&record));
    }

    let summary = run_passes(&store, &config, now())?;
    assert_eq!(summary.patterns.sequence.len(), 1);

    let evolver = ConfigEvolver::new(config.evolution.clone());
    let table = WeightTable::load(&store)?;
    let report = evolver.recommend(&config, &table, Some(&summary.weights), &summary.patterns.sequence, now());

    // First pass: every weight is new and too few records to tune thresholds
    assert_eq!(report.recommendations.len(), 1);
    assert!(matches!(report.recommendations[0], Recommendation::SearchPriority { .. }));

    let path = dir.path().join("evolved.toml");
    report.apply_to(&config).save(&path)?;
    let reloaded = LearningConfig::load(Some(&path))?;
    assert_eq!(reloaded.evolution.search_priority, vec!["style", "color", "product", "typography"]);

    let again = evolver.recommend(&reloaded, &table, Some(&summary.weights), &summary.patterns.sequence, now());
    assert!(again.is_empty());

    Ok(())
}
