//! Report tests over hand-built aggregates, fixture data and capture logs

use pulse_common::aggregate::{AggregateMap, SubjectAggregate};
use pulse_common::capture::{read_capture_log, CaptureLog, WebhookEventRecord};
use pulse_common::events::{EventKind, WebhookEvent};
use pulse_common::fixtures::{FixtureGenerator, ARCHETYPES, BIOMARKERS, SCORE_TYPES};
use pulse_common::store::{read_aggregate_file, write_aggregate_file};
use pulse_report::{
    demo_capture_records, numeric_value, ArchetypeReport, BiomarkerReport, EventsReport,
    ScoreReport, SummaryReport,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn record(events: &[(EventKind, Value)]) -> SubjectAggregate {
    let mut record = SubjectAggregate::default();
    for (kind, body) in events {
        let patch = WebhookEvent::decode(*kind, kind.provider_event_name(), body)
            .unwrap()
            .into_patch();
        record.merge(&patch, chrono::Utc::now());
    }
    record
}

fn sample() -> AggregateMap {
    let mut map = AggregateMap::new();
    map.insert(
        "abc".into(),
        record(&[
            (EventKind::Score, json!({"type": "sleep", "value": 0.8, "state": "high"})),
            (EventKind::Score, json!({"type": "activity", "value": 0.2, "state": "low"})),
            (
                EventKind::Biomarker,
                json!({"category": "activity", "type": "steps", "value": "8000", "unit": "count"}),
            ),
            (EventKind::Archetype, json!({"name": "sleep_pattern", "value": "inconsistent"})),
        ]),
    );
    map.insert(
        "def".into(),
        record(&[
            (EventKind::Score, json!({"type": "sleep", "value": 0.4, "state": "medium"})),
            (
                EventKind::Biomarker,
                json!({"category": "activity", "type": "steps", "value": 4000, "unit": "count"}),
            ),
            (EventKind::Archetype, json!({"name": "sleep_pattern", "value": "inconsistent"})),
            (EventKind::Unknown, json!({"raw": true})),
        ]),
    );
    map.insert(
        "ghi".into(),
        record(&[(
            EventKind::Biomarker,
            json!({"type": "steps", "value": "n/a", "unit": "steps"}),
        )]),
    );
    map
}

#[test]
fn test_summary_counts() {
    let report = SummaryReport::build(&sample());

    assert_eq!(report.subjects, 3);
    assert_eq!(report.subjects_with.scores, 2);
    assert_eq!(report.subjects_with.biomarkers, 3);
    assert_eq!(report.subjects_with.archetypes, 2);
    assert_eq!(report.subjects_with.unclassified, 1);
    assert_eq!(report.totals.scores, 3);
    assert!(report.last_updated.is_some());

    let text = report.to_string();
    assert!(text.starts_with("Subjects: 3"));
}

#[test]
fn test_empty_reports() {
    let empty = AggregateMap::new();
    assert_eq!(SummaryReport::build(&empty).subjects, 0);
    assert!(ScoreReport::build(&empty, None).score_types.is_empty());
    assert_eq!(ScoreReport::build(&empty, None).to_string(), "No scores.\n");
    assert_eq!(BiomarkerReport::build(&empty).to_string(), "No biomarkers.\n");
    assert_eq!(ArchetypeReport::build(&empty).to_string(), "No archetypes.\n");
}

#[test]
fn test_score_stats_and_states() {
    let report = ScoreReport::build(&sample(), None);
    let types: Vec<&str> = report.score_types.iter().map(|r| r.score_type.as_str()).collect();
    assert_eq!(types, vec!["activity", "sleep"]);

    let sleep = &report.score_types[1];
    assert_eq!(sleep.subjects, 2);
    let stats = sleep.stats.unwrap();
    assert_eq!(stats.count, 2);
    assert!((stats.mean - 0.6).abs() < 1e-9);
    assert_eq!(stats.min, 0.4);
    assert_eq!(stats.max, 0.8);
    assert_eq!(sleep.states["high"], 1);
    assert_eq!(sleep.states["medium"], 1);
    assert_eq!(sleep.histogram[4], 1);
    assert_eq!(sleep.histogram[8], 1);
}

#[test]
fn test_score_type_filter() {
    let report = ScoreReport::build(&sample(), Some("activity"));
    assert_eq!(report.score_types.len(), 1);
    assert_eq!(report.score_types[0].score_type, "activity");
}

#[test]
fn test_biomarker_numeric_strings_parsed() {
    let report = BiomarkerReport::build(&sample());
    assert_eq!(report.biomarkers.len(), 1);

    let steps = &report.biomarkers[0];
    assert_eq!(steps.key, "steps");
    assert_eq!(steps.subjects, 3);
    assert_eq!(steps.category.as_deref(), Some("activity"));
    // "n/a" is not numeric
    let stats = steps.stats.unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.mean, 6000.0);
    assert_eq!(
        steps.units.iter().cloned().collect::<Vec<_>>(),
        vec!["count".to_string(), "steps".to_string()]
    );
}

#[test]
fn test_numeric_value_skips_non_finite() {
    assert_eq!(numeric_value(&json!(" 42.5 ")), Some(42.5));
    assert_eq!(numeric_value(&json!(7)), Some(7.0));
    assert_eq!(numeric_value(&json!("NaN")), None);
    assert_eq!(numeric_value(&json!("inf")), None);
    assert_eq!(numeric_value(&json!("1e999")), None);
    assert_eq!(numeric_value(&json!(true)), None);
}

#[test]
fn test_archetype_counts() {
    let report = ArchetypeReport::build(&sample());
    assert_eq!(report.archetypes["sleep_pattern"]["inconsistent"], 2);
}

#[test]
fn test_json_output_shape() {
    let value = serde_json::to_value(SummaryReport::build(&sample())).unwrap();
    assert_eq!(value["subjects"], 3);
    assert_eq!(value["subjectsWith"]["dataLogs"], 0);
    assert_eq!(value["totals"]["biomarkers"], 3);

    let value = serde_json::to_value(ScoreReport::build(&sample(), Some("sleep"))).unwrap();
    assert_eq!(value["scoreTypes"][0]["histogram"].as_array().unwrap().len(), 10);
}

#[test]
fn test_fixture_reports() {
    let aggregates = FixtureGenerator::new(3).aggregates(40);

    let summary = SummaryReport::build(&aggregates);
    assert_eq!(summary.subjects, 40);
    assert_eq!(summary.subjects_with.biomarkers, 40);

    let biomarkers = BiomarkerReport::build(&aggregates);
    assert_eq!(biomarkers.biomarkers.len(), BIOMARKERS.len());
    for report in &biomarkers.biomarkers {
        assert_eq!(report.stats.unwrap().count, 40);
    }

    let archetypes = ArchetypeReport::build(&aggregates);
    assert_eq!(archetypes.archetypes.len(), ARCHETYPES.len());
    for values in archetypes.archetypes.values() {
        assert_eq!(values.values().sum::<usize>(), 40);
    }

    for report in ScoreReport::build(&aggregates, None).score_types {
        let stats = report.stats.unwrap();
        assert!(stats.min >= 0.0 && stats.max <= 1.0);
        assert_eq!(report.histogram.iter().sum::<usize>(), report.subjects);
    }
}

#[tokio::test]
async fn test_reports_from_store_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("aggregates.json");
    let written = sample();
    write_aggregate_file(&path, &written).await.unwrap();

    let aggregates = read_aggregate_file(&path).await.unwrap();
    assert_eq!(aggregates, written);
    assert_eq!(SummaryReport::build(&aggregates), SummaryReport::build(&written));
    assert_eq!(BiomarkerReport::build(&aggregates).biomarkers[0].subjects, 3);
}

#[tokio::test]
async fn test_events_report_from_capture_log() {
    let dir = TempDir::new().unwrap();
    let log = CaptureLog::new(dir.path().join("webhook-events.jsonl"));

    let deliveries: [(Option<&str>, Option<&str>, &[u8]); 4] = [
        (Some("ScoreCreatedIntegrationEvent"), Some("abc"), br#"{"type":"sleep"}"#),
        (Some("ScoreCreatedIntegrationEvent"), Some("def"), br#"{"type":"sleep"}"#),
        (Some("BiomarkerCreatedIntegrationEvent"), Some("abc"), b"{oops"),
        (None, None, b"{}"),
    ];
    for (event_type, external_id, body) in deliveries {
        let record = WebhookEventRecord::new(
            Vec::new(),
            event_type.map(str::to_string),
            external_id.map(str::to_string),
            body,
        );
        log.append(&record).await.unwrap();
    }

    let records = read_capture_log(log.path()).await.unwrap();
    let report = EventsReport::build(&records);

    assert_eq!(report.total, 4);
    assert_eq!(report.by_event_type["ScoreCreatedIntegrationEvent"], 2);
    assert_eq!(report.by_event_type["unknown"], 1);
    assert_eq!(report.parse_errors, 1);
    assert_eq!(report.subjects, 2);
    assert!(report.first_received <= report.last_received);
}

#[test]
fn test_demo_capture_records() {
    let records = demo_capture_records(3, 9);
    assert_eq!(records.len(), 3 * (SCORE_TYPES.len() + 1));

    let report = EventsReport::build(&records);
    assert_eq!(report.subjects, 3);
    assert_eq!(report.parse_errors, 0);
    assert_eq!(report.by_event_type["ScoreCreatedIntegrationEvent"], 3 * SCORE_TYPES.len());
}
