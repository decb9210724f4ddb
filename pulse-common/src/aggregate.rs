//! Subject aggregate model
//!
//! One [`SubjectAggregate`] per external subject id, holding the latest value
//! per provider-defined key in each category. Events are reduced to a
//! [`SubjectPatch`] and merged shallowly: new keys are added, existing keys
//! are replaced by the latest event, nothing is ever removed by a merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Whole store contents, keyed by external subject id
pub type AggregateMap = BTreeMap<String, SubjectAggregate>;

/// Latest score for one score type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Latest reading for one biomarker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiomarkerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Provider sends both numbers and numeric strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// One contributing factor of a score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Factor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<Value>,
}

/// Merged record for one subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAggregate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<String, ScoreEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub biomarkers: BTreeMap<String, BiomarkerEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub factors: BTreeMap<String, Vec<Factor>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_logs: BTreeMap<String, Vec<Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub archetypes: BTreeMap<String, Value>,
    /// Raw bodies of unrecognized event types, keyed by event type
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unclassified: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial record produced from one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectPatch {
    pub scores: BTreeMap<String, ScoreEntry>,
    pub biomarkers: BTreeMap<String, BiomarkerEntry>,
    pub factors: BTreeMap<String, Vec<Factor>>,
    pub data_logs: BTreeMap<String, Vec<Value>>,
    pub archetypes: BTreeMap<String, Value>,
    pub unclassified: BTreeMap<String, Value>,
}

/// Number of keys per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCounts {
    pub scores: usize,
    pub biomarkers: usize,
    pub factors: usize,
    pub data_logs: usize,
    pub archetypes: usize,
    pub unclassified: usize,
}

/// Insert every entry of `source` into `target`, returning true if anything changed
fn merge_category<V: Clone + PartialEq>(
    target: &mut BTreeMap<String, V>,
    source: &BTreeMap<String, V>,
) -> bool {
    let mut changed = false;
    for (key, value) in source {
        if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

impl SubjectPatch {
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
            && self.biomarkers.is_empty()
            && self.factors.is_empty()
            && self.data_logs.is_empty()
            && self.archetypes.is_empty()
            && self.unclassified.is_empty()
    }

    /// Fold a later patch into this one (later entries win)
    pub fn combine(&mut self, later: SubjectPatch) {
        self.scores.extend(later.scores);
        self.biomarkers.extend(later.biomarkers);
        self.factors.extend(later.factors);
        self.data_logs.extend(later.data_logs);
        self.archetypes.extend(later.archetypes);
        self.unclassified.extend(later.unclassified);
    }
}

impl SubjectAggregate {
    /// Shallow, last-write-wins merge
    ///
    /// Returns `true` if the record changed. `updated_at` is only bumped on
    /// change, so replaying an identical event leaves the record untouched.
    pub fn merge(&mut self, patch: &SubjectPatch, now: DateTime<Utc>) -> bool {
        // Non-short-circuiting: every category must be applied
        let changed = merge_category(&mut self.scores, &patch.scores)
            | merge_category(&mut self.biomarkers, &patch.biomarkers)
            | merge_category(&mut self.factors, &patch.factors)
            | merge_category(&mut self.data_logs, &patch.data_logs)
            | merge_category(&mut self.archetypes, &patch.archetypes)
            | merge_category(&mut self.unclassified, &patch.unclassified);

        if changed {
            self.updated_at = Some(now);
        }
        changed
    }

    pub fn counts(&self) -> CategoryCounts {
        CategoryCounts {
            scores: self.scores.len(),
            biomarkers: self.biomarkers.len(),
            factors: self.factors.len(),
            data_logs: self.data_logs.len(),
            archetypes: self.archetypes.len(),
            unclassified: self.unclassified.len(),
        }
    }
}
