//! Payload normalization
//!
//! Decodes a delivery body into a [`WebhookEvent`] using one schema per kind,
//! then reduces it to a [`SubjectPatch`]. Schemas only name the fields we
//! use; extra keys are ignored and optional fields may be absent, because
//! provider payloads are append-only evolving schemas.
//!
//! Accepted body shapes:
//! - a single object
//! - a top-level array of objects
//! - an object wrapping an array under `data`, `items`, `scores`,
//!   `biomarkers` or `archetypes`

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use super::{EventKind, WebhookEvent, UNKNOWN_EVENT_TYPE};
use crate::aggregate::{BiomarkerEntry, Factor, ScoreEntry, SubjectPatch};

const BATCH_KEYS: [&str; 5] = ["data", "items", "scores", "biomarkers", "archetypes"];

/// Keys that mark an object as a single item rather than a batch wrapper
const ITEM_KEYS: [&str; 3] = ["type", "name", "logType"];

/// Normalization error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("payload must be a JSON object or an array of objects")]
    NotAnObject,

    #[error("{kind} payload is missing required field `{field}`")]
    MissingField { kind: EventKind, field: &'static str },

    #[error("invalid {kind} payload: {reason}")]
    Invalid { kind: EventKind, reason: String },
}

/// Accept numbers and numeric strings
///
/// Non-finite values (`"NaN"`, `"inf"`, `"1e999"`) read as absent: JSON has
/// no encoding for them and NaN never compares equal to itself.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let number = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.filter(|v| v.is_finite()))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub goal: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePayload {
    #[serde(rename = "type")]
    pub score_type: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    /// Provider's own field name for the value
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: Option<f64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub score_date_time: Option<String>,
    #[serde(default)]
    pub created_at_utc: Option<String>,
    /// `None` leaves stored factors untouched; `Some(vec![])` clears them
    #[serde(default)]
    pub factors: Option<Vec<FactorPayload>>,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiomarkerPayload {
    #[serde(rename = "type")]
    pub biomarker_type: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLogPayload {
    #[serde(default)]
    pub log_type: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data_logs: Option<Vec<Value>>,
    #[serde(default)]
    pub logs: Option<Vec<Value>>,
    #[serde(default)]
    pub entries: Option<Vec<Value>>,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchetypePayload {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub external_id: Option<String>,
}

impl ScorePayload {
    fn entry(&self) -> ScoreEntry {
        ScoreEntry {
            value: self.value.or(self.score),
            state: self.state.clone(),
            timestamp: self
                .timestamp
                .clone()
                .or_else(|| self.score_date_time.clone())
                .or_else(|| self.created_at_utc.clone()),
        }
    }

    fn factor_list(&self) -> Option<Vec<Factor>> {
        self.factors.as_ref().map(|factors| {
            factors
                .iter()
                .filter(|f| !f.name.trim().is_empty())
                .map(|f| Factor {
                    name: f.name.clone(),
                    value: f.value.clone(),
                    goal: f.goal.clone(),
                })
                .collect()
        })
    }
}

impl DataLogPayload {
    fn resolved_log_type(&self) -> Option<&str> {
        self.log_type
            .as_deref()
            .or(self.kind.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn resolved_entries(&self) -> Vec<Value> {
        self.data_logs
            .clone()
            .or_else(|| self.logs.clone())
            .or_else(|| self.entries.clone())
            .unwrap_or_default()
    }
}

/// Split a body into its items
fn items(body: &Value) -> Result<Vec<&Value>, NormalizeError> {
    let items: Vec<&Value> = match body {
        Value::Array(list) => list.iter().collect(),
        Value::Object(map) => {
            let is_item = ITEM_KEYS.iter().any(|key| map.contains_key(*key));
            let batch = if is_item {
                None
            } else {
                BATCH_KEYS
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_array))
            };
            match batch {
                Some(list) => list.iter().collect(),
                None => vec![body],
            }
        }
        _ => return Err(NormalizeError::NotAnObject),
    };

    if items.iter().any(|item| !item.is_object()) {
        return Err(NormalizeError::NotAnObject);
    }
    Ok(items)
}

fn decode_items<T>(kind: EventKind, body: &Value) -> Result<Vec<T>, NormalizeError>
where
    T: for<'de> Deserialize<'de>,
{
    items(body)?
        .into_iter()
        .map(|item| {
            T::deserialize(item).map_err(|e| NormalizeError::Invalid {
                kind,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Find an `externalId` in the body (first item wins)
pub fn external_id_hint(body: &Value) -> Option<String> {
    let from = |v: &Value| {
        v.get("externalId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    from(body).or_else(|| {
        items(body)
            .ok()?
            .into_iter()
            .find_map(|item| from(item))
    })
}

impl WebhookEvent {
    /// Decode a body according to its classified kind
    ///
    /// Unknown kinds never fail: the raw body is carried through under the
    /// header's event type (or `"unknown"` if there was none).
    pub fn decode(
        kind: EventKind,
        event_type: Option<&str>,
        body: &Value,
    ) -> Result<Self, NormalizeError> {
        let event = match kind {
            EventKind::Score => WebhookEvent::Score(decode_items(kind, body)?),
            EventKind::Biomarker => WebhookEvent::Biomarker(decode_items(kind, body)?),
            EventKind::DataLog => {
                let logs: Vec<DataLogPayload> = decode_items(kind, body)?;
                if logs.iter().any(|log| log.resolved_log_type().is_none()) {
                    return Err(NormalizeError::MissingField {
                        kind,
                        field: "logType",
                    });
                }
                WebhookEvent::DataLog(logs)
            }
            EventKind::Archetype => WebhookEvent::Archetype(decode_items(kind, body)?),
            EventKind::Unknown => WebhookEvent::Unrecognized {
                event_type: event_type
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(UNKNOWN_EVENT_TYPE)
                    .to_string(),
                body: body.clone(),
            },
        };
        Ok(event)
    }

    /// Reduce to the partial record merged into the store
    pub fn into_patch(self) -> SubjectPatch {
        let mut patch = SubjectPatch::default();
        match self {
            WebhookEvent::Score(scores) => {
                for score in scores {
                    if let Some(factors) = score.factor_list() {
                        patch.factors.insert(score.score_type.clone(), factors);
                    }
                    patch.scores.insert(score.score_type.clone(), score.entry());
                }
            }
            WebhookEvent::Biomarker(biomarkers) => {
                for biomarker in biomarkers {
                    patch.biomarkers.insert(
                        biomarker.biomarker_type.clone(),
                        BiomarkerEntry {
                            category: biomarker.category,
                            kind: Some(biomarker.biomarker_type),
                            value: biomarker.value,
                            unit: biomarker.unit,
                        },
                    );
                }
            }
            WebhookEvent::DataLog(logs) => {
                for log in logs {
                    if let Some(log_type) = log.resolved_log_type() {
                        patch
                            .data_logs
                            .insert(log_type.to_string(), log.resolved_entries());
                    }
                }
            }
            WebhookEvent::Archetype(archetypes) => {
                for archetype in archetypes {
                    patch
                        .archetypes
                        .insert(archetype.name, archetype.value.unwrap_or(Value::Null));
                }
            }
            WebhookEvent::Unrecognized { event_type, body } => {
                patch.unclassified.insert(event_type, body);
            }
        }
        patch
    }
}
