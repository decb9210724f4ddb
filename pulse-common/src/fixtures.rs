//! Demo fixtures: seeded fake wellbeing data
//!
//! THIS IS TEST DATA. Everything here is pseudo-random output from a seeded
//! generator and has no relation to real signal processing. It feeds tests
//! and `pulse-report --demo`; nothing on the ingestion path calls it.
//!
//! The same seed always yields the same bodies and aggregates.

use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::aggregate::AggregateMap;
use crate::events::{EventKind, WebhookEvent};

pub const SCORE_TYPES: [&str; 5] = [
    "sleep",
    "activity",
    "readiness",
    "wellbeing",
    "mental_wellbeing",
];

/// (archetype name, possible values)
pub const ARCHETYPES: [(&str, &[&str]); 3] = [
    (
        "activity_level",
        &["sedentary", "lightly_active", "moderately_active", "highly_active"],
    ),
    (
        "sleep_pattern",
        &["consistent_early_riser", "consistent_late_sleeper", "inconsistent"],
    ),
    (
        "mental_wellness",
        &["poor_mental_wellness", "fair_mental_wellness", "good_mental_wellness"],
    ),
];

/// (category, type, unit, min, max)
pub const BIOMARKERS: [(&str, &str, &str, f64, f64); 4] = [
    ("activity", "steps", "count", 1_500.0, 14_000.0),
    ("activity", "active_energy_burned", "kcal", 80.0, 900.0),
    ("sleep", "sleep_duration", "minute", 240.0, 560.0),
    ("vitals", "heart_rate_resting", "bpm", 48.0, 85.0),
];

/// Fixed timestamp stamped on generated aggregates
const FIXTURE_EPOCH_SECS: i64 = 1_700_000_000;

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Provider-style state band for a 0..1 score
pub fn state_for(value: f64) -> &'static str {
    if value < 0.35 {
        "low"
    } else if value < 0.7 {
        "medium"
    } else {
        "high"
    }
}

pub fn fixture_timestamp() -> DateTime<Utc> {
    Utc.timestamp_opt(FIXTURE_EPOCH_SECS, 0)
        .single()
        .unwrap_or_default()
}

/// Seeded generator of webhook bodies and aggregates
pub struct FixtureGenerator {
    rng: StdRng,
}

impl FixtureGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn external_id(index: usize) -> String {
        format!("demo-{:04}", index)
    }

    /// A score delivery body in the provider's shape
    pub fn score_body(&mut self, external_id: &str, score_type: &str) -> Value {
        let score = round2(self.rng.gen_range(0.05..0.98));
        let steps_goal = 7_500;
        let steps = self.rng.gen_range(1_000..12_000);
        json!({
            "externalId": external_id,
            "type": score_type,
            "score": score,
            "state": state_for(score),
            "scoreDateTime": fixture_timestamp().to_rfc3339(),
            "factors": [
                {"name": "steps", "value": steps, "goal": steps_goal, "unit": "count"},
                {"name": "sleep_regularity", "value": round2(self.rng.gen_range(0.0..1.0)), "goal": 0.8}
            ]
        })
    }

    /// A batched biomarker delivery body covering every fixture biomarker
    pub fn biomarker_body(&mut self, external_id: &str) -> Value {
        let items: Vec<Value> = BIOMARKERS
            .iter()
            .map(|(category, kind, unit, min, max)| {
                let value = self.rng.gen_range(*min..*max).round();
                json!({
                    "externalId": external_id,
                    "category": category,
                    "type": kind,
                    // Provider sends biomarker values as strings
                    "value": format!("{}", value),
                    "unit": unit,
                })
            })
            .collect();
        json!({ "biomarkers": items })
    }

    pub fn archetype_body(&mut self, external_id: &str, name: &str, values: &[&str]) -> Value {
        let value = values[self.rng.gen_range(0..values.len())];
        json!({
            "externalId": external_id,
            "name": name,
            "value": value,
            "dataType": "ordinal",
            "periodicity": "weekly",
        })
    }

    /// A full store with `subjects` demo subjects
    ///
    /// Bodies go through the real normalizer, so the result has exactly the
    /// shape webhook ingestion would produce.
    pub fn aggregates(&mut self, subjects: usize) -> AggregateMap {
        let stamp = fixture_timestamp();
        let mut map = AggregateMap::new();

        for index in 0..subjects {
            let external_id = Self::external_id(index);
            let mut bodies: Vec<(EventKind, Value)> = Vec::new();

            for score_type in SCORE_TYPES {
                // Not every subject has every score
                if self.rng.gen_bool(0.85) {
                    bodies.push((EventKind::Score, self.score_body(&external_id, score_type)));
                }
            }
            bodies.push((EventKind::Biomarker, self.biomarker_body(&external_id)));
            for (name, values) in ARCHETYPES {
                bodies.push((EventKind::Archetype, self.archetype_body(&external_id, name, values)));
            }

            let record = map.entry(external_id).or_default();
            for (kind, body) in bodies {
                if let Ok(event) = WebhookEvent::decode(kind, kind.provider_event_name(), &body) {
                    record.merge(&event.into_patch(), stamp);
                }
            }
        }
        map
    }
}
