//! pulse-report library - read-only statistics over Pulse data
//!
//! Reports are built from an [`AggregateMap`] (the aggregate file) or from
//! capture log records. Each report serializes to JSON and renders as plain
//! text through `Display`. Nothing here writes to the store.

use chrono::{DateTime, Utc};
use pulse_common::aggregate::{AggregateMap, CategoryCounts};
use pulse_common::capture::WebhookEventRecord;
use pulse_common::events::UNKNOWN_EVENT_TYPE;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub mod stats;

use stats::{bucket_label, unit_histogram, NumericStats, HISTOGRAM_BUCKETS};

// ============================================================================
// Summary
// ============================================================================

/// Subjects having at least one key in each category
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectsWith {
    pub scores: usize,
    pub biomarkers: usize,
    pub factors: usize,
    pub data_logs: usize,
    pub archetypes: usize,
    pub unclassified: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    pub subjects: usize,
    pub subjects_with: SubjectsWith,
    /// Key counts summed over all subjects
    pub totals: CategoryCounts,
    pub last_updated: Option<DateTime<Utc>>,
}

impl SummaryReport {
    pub fn build(aggregates: &AggregateMap) -> Self {
        let mut with = SubjectsWith::default();
        let mut totals = CategoryCounts::default();

        for record in aggregates.values() {
            let counts = record.counts();
            let tally = |n: usize, slot: &mut usize| {
                if n > 0 {
                    *slot += 1;
                }
            };
            tally(counts.scores, &mut with.scores);
            tally(counts.biomarkers, &mut with.biomarkers);
            tally(counts.factors, &mut with.factors);
            tally(counts.data_logs, &mut with.data_logs);
            tally(counts.archetypes, &mut with.archetypes);
            tally(counts.unclassified, &mut with.unclassified);

            totals.scores += counts.scores;
            totals.biomarkers += counts.biomarkers;
            totals.factors += counts.factors;
            totals.data_logs += counts.data_logs;
            totals.archetypes += counts.archetypes;
            totals.unclassified += counts.unclassified;
        }

        Self {
            subjects: aggregates.len(),
            subjects_with: with,
            totals,
            last_updated: aggregates.values().filter_map(|r| r.updated_at).max(),
        }
    }
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Subjects: {}", self.subjects)?;
        if let Some(updated) = self.last_updated {
            writeln!(f, "Last update: {}", updated.to_rfc3339())?;
        }
        writeln!(f)?;
        writeln!(f, "{:<14} {:>10} {:>10}", "category", "subjects", "keys")?;
        let rows = [
            ("scores", self.subjects_with.scores, self.totals.scores),
            ("biomarkers", self.subjects_with.biomarkers, self.totals.biomarkers),
            ("factors", self.subjects_with.factors, self.totals.factors),
            ("dataLogs", self.subjects_with.data_logs, self.totals.data_logs),
            ("archetypes", self.subjects_with.archetypes, self.totals.archetypes),
            ("unclassified", self.subjects_with.unclassified, self.totals.unclassified),
        ];
        for (name, subjects, keys) in rows {
            writeln!(f, "{:<14} {:>10} {:>10}", name, subjects, keys)?;
        }
        Ok(())
    }
}

// ============================================================================
// Scores
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTypeReport {
    pub score_type: String,
    /// Subjects with this score type (valued or not)
    pub subjects: usize,
    pub stats: Option<NumericStats>,
    pub states: BTreeMap<String, usize>,
    pub histogram: [usize; HISTOGRAM_BUCKETS],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub score_types: Vec<ScoreTypeReport>,
}

impl ScoreReport {
    /// Per score type; `only` restricts to one type
    pub fn build(aggregates: &AggregateMap, only: Option<&str>) -> Self {
        let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut subjects: BTreeMap<&str, usize> = BTreeMap::new();
        let mut states: BTreeMap<&str, BTreeMap<String, usize>> = BTreeMap::new();

        for record in aggregates.values() {
            for (score_type, entry) in &record.scores {
                let score_type = score_type.as_str();
                if only.is_some_and(|t| t != score_type) {
                    continue;
                }
                *subjects.entry(score_type).or_default() += 1;
                let type_values = values.entry(score_type).or_default();
                if let Some(value) = entry.value {
                    type_values.push(value);
                }
                if let Some(state) = &entry.state {
                    *states
                        .entry(score_type)
                        .or_default()
                        .entry(state.clone())
                        .or_default() += 1;
                }
            }
        }

        let score_types = values
            .into_iter()
            .map(|(score_type, values)| ScoreTypeReport {
                score_type: score_type.to_string(),
                subjects: subjects.get(score_type).copied().unwrap_or_default(),
                stats: NumericStats::from_values(&values),
                states: states.remove(score_type).unwrap_or_default(),
                histogram: unit_histogram(&values),
            })
            .collect();

        Self { score_types }
    }
}

fn write_stats(f: &mut fmt::Formatter<'_>, stats: &Option<NumericStats>) -> fmt::Result {
    match stats {
        Some(s) => writeln!(
            f,
            "  n={} mean={:.3} median={:.3} min={:.3} max={:.3}",
            s.count, s.mean, s.median, s.min, s.max
        ),
        None => writeln!(f, "  no numeric values"),
    }
}

impl fmt::Display for ScoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.score_types.is_empty() {
            return writeln!(f, "No scores.");
        }
        for report in &self.score_types {
            writeln!(f, "{} ({} subjects)", report.score_type, report.subjects)?;
            write_stats(f, &report.stats)?;
            if !report.states.is_empty() {
                let states: Vec<String> = report
                    .states
                    .iter()
                    .map(|(state, n)| format!("{}={}", state, n))
                    .collect();
                writeln!(f, "  states: {}", states.join(" "))?;
            }
            let peak = report.histogram.iter().copied().max().unwrap_or(0).max(1);
            for (index, count) in report.histogram.iter().enumerate() {
                let bar = "#".repeat((count * 30).div_ceil(peak));
                writeln!(f, "  {} {:>5} {}", bucket_label(index), count, bar)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ============================================================================
// Biomarkers
// ============================================================================

/// Finite numbers and numeric strings as f64
pub fn numeric_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BiomarkerKeyReport {
    pub key: String,
    pub category: Option<String>,
    pub subjects: usize,
    pub stats: Option<NumericStats>,
    pub units: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiomarkerReport {
    pub biomarkers: Vec<BiomarkerKeyReport>,
}

impl BiomarkerReport {
    pub fn build(aggregates: &AggregateMap) -> Self {
        let mut by_key: BTreeMap<&str, (Option<String>, usize, Vec<f64>, BTreeSet<String>)> =
            BTreeMap::new();

        for record in aggregates.values() {
            for (key, entry) in &record.biomarkers {
                let slot = by_key.entry(key.as_str()).or_default();
                if slot.0.is_none() {
                    slot.0 = entry.category.clone();
                }
                slot.1 += 1;
                if let Some(value) = entry.value.as_ref().and_then(numeric_value) {
                    slot.2.push(value);
                }
                if let Some(unit) = &entry.unit {
                    slot.3.insert(unit.clone());
                }
            }
        }

        let biomarkers = by_key
            .into_iter()
            .map(|(key, (category, subjects, values, units))| BiomarkerKeyReport {
                key: key.to_string(),
                category,
                subjects,
                stats: NumericStats::from_values(&values),
                units,
            })
            .collect();

        Self { biomarkers }
    }
}

impl fmt::Display for BiomarkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.biomarkers.is_empty() {
            return writeln!(f, "No biomarkers.");
        }
        for report in &self.biomarkers {
            let units: Vec<&str> = report.units.iter().map(String::as_str).collect();
            writeln!(
                f,
                "{} [{}] ({} subjects{}{})",
                report.key,
                report.category.as_deref().unwrap_or("-"),
                report.subjects,
                if units.is_empty() { "" } else { ", unit " },
                units.join("/")
            )?;
            write_stats(f, &report.stats)?;
        }
        Ok(())
    }
}

// ============================================================================
// Archetypes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchetypeReport {
    /// Archetype name → value → subjects
    pub archetypes: BTreeMap<String, BTreeMap<String, usize>>,
}

fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "(none)".to_string(),
        other => other.to_string(),
    }
}

impl ArchetypeReport {
    pub fn build(aggregates: &AggregateMap) -> Self {
        let mut archetypes: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for record in aggregates.values() {
            for (name, value) in &record.archetypes {
                *archetypes
                    .entry(name.clone())
                    .or_default()
                    .entry(value_label(value))
                    .or_default() += 1;
            }
        }
        Self { archetypes }
    }
}

impl fmt::Display for ArchetypeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.archetypes.is_empty() {
            return writeln!(f, "No archetypes.");
        }
        for (name, values) in &self.archetypes {
            writeln!(f, "{}", name)?;
            for (value, count) in values {
                writeln!(f, "  {:<28} {:>5}", value, count)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Capture log events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsReport {
    pub total: usize,
    pub by_event_type: BTreeMap<String, usize>,
    pub parse_errors: usize,
    pub subjects: usize,
    pub first_received: Option<DateTime<Utc>>,
    pub last_received: Option<DateTime<Utc>>,
}

impl EventsReport {
    pub fn build(records: &[WebhookEventRecord]) -> Self {
        let mut by_event_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut subjects = BTreeSet::new();
        for record in records {
            let event_type = record
                .event_type
                .clone()
                .unwrap_or_else(|| UNKNOWN_EVENT_TYPE.to_string());
            *by_event_type.entry(event_type).or_default() += 1;
            if let Some(id) = &record.external_id {
                subjects.insert(id.as_str());
            }
        }

        Self {
            total: records.len(),
            by_event_type,
            parse_errors: records.iter().filter(|r| r.parse_error.is_some()).count(),
            subjects: subjects.len(),
            first_received: records.iter().map(|r| r.received_at).min(),
            last_received: records.iter().map(|r| r.received_at).max(),
        }
    }
}

impl fmt::Display for EventsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deliveries: {}", self.total)?;
        writeln!(f, "Subjects (from header): {}", self.subjects)?;
        writeln!(f, "Parse errors: {}", self.parse_errors)?;
        if let (Some(first), Some(last)) = (self.first_received, self.last_received) {
            writeln!(f, "Received: {} .. {}", first.to_rfc3339(), last.to_rfc3339())?;
        }
        if !self.by_event_type.is_empty() {
            writeln!(f)?;
            for (event_type, count) in &self.by_event_type {
                writeln!(f, "  {:<40} {:>6}", event_type, count)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Demo data
// ============================================================================

/// Capture records for `subjects` demo subjects (TEST DATA, see `pulse_common::fixtures`)
pub fn demo_capture_records(subjects: usize, seed: u64) -> Vec<WebhookEventRecord> {
    use pulse_common::events::EventKind;
    use pulse_common::fixtures::{FixtureGenerator, SCORE_TYPES};

    let mut generator = FixtureGenerator::new(seed);
    let mut records = Vec::new();
    let score_event = EventKind::Score.provider_event_name().unwrap_or(UNKNOWN_EVENT_TYPE);
    let biomarker_event = EventKind::Biomarker
        .provider_event_name()
        .unwrap_or(UNKNOWN_EVENT_TYPE);

    for index in 0..subjects {
        let external_id = FixtureGenerator::external_id(index);
        let mut deliveries: Vec<(&str, Value)> = SCORE_TYPES
            .iter()
            .map(|score_type| (score_event, generator.score_body(&external_id, score_type)))
            .collect();
        deliveries.push((biomarker_event, generator.biomarker_body(&external_id)));

        for (event_type, body) in deliveries {
            let headers = [
                ("x-event-type".to_string(), event_type.to_string()),
                ("x-external-id".to_string(), external_id.clone()),
            ];
            records.push(WebhookEventRecord::new(
                headers,
                Some(event_type.to_string()),
                Some(external_id.clone()),
                body.to_string().as_bytes(),
            ));
        }
    }
    records
}
