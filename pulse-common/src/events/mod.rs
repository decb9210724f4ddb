//! Webhook event kinds
//!
//! The provider names each delivery in the `X-Event-Type` header. The set of
//! kinds we understand is closed; anything else decodes to
//! [`WebhookEvent::Unrecognized`] and is kept verbatim rather than rejected,
//! since the provider's taxonomy grows over time.

pub mod payload;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use payload::{
    ArchetypePayload, BiomarkerPayload, DataLogPayload, FactorPayload, NormalizeError,
    ScorePayload,
};

/// Header naming the event type
pub const EVENT_TYPE_HEADER: &str = "x-event-type";

/// Header carrying the external subject id
pub const EXTERNAL_ID_HEADER: &str = "x-external-id";

/// Bucket name used when an unrecognized delivery has no event type header
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// Event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Score,
    Biomarker,
    DataLog,
    Archetype,
    Unknown,
}

impl EventKind {
    pub const KNOWN: [EventKind; 4] = [
        EventKind::Score,
        EventKind::Biomarker,
        EventKind::DataLog,
        EventKind::Archetype,
    ];

    /// Map an `X-Event-Type` header value to a kind
    ///
    /// Exact provider names are matched first, then a case-insensitive stem
    /// match so that renamed variants (e.g. `ScoreUpdatedIntegrationEvent`)
    /// still land in the right category.
    ///
    /// # Examples
    ///
    /// ```
    /// use pulse_common::events::EventKind;
    ///
    /// assert_eq!(EventKind::classify(Some("ScoreCreatedIntegrationEvent")), EventKind::Score);
    /// assert_eq!(EventKind::classify(Some("data_log")), EventKind::DataLog);
    /// assert_eq!(EventKind::classify(Some("DeviceInfoEvent")), EventKind::Unknown);
    /// assert_eq!(EventKind::classify(None), EventKind::Unknown);
    /// ```
    pub fn classify(event_type: Option<&str>) -> Self {
        let Some(raw) = event_type.map(str::trim).filter(|s| !s.is_empty()) else {
            return EventKind::Unknown;
        };

        if let Some(kind) = Self::KNOWN
            .into_iter()
            .find(|kind| kind.provider_event_name() == Some(raw))
        {
            return kind;
        }

        let folded: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
            .flat_map(char::to_lowercase)
            .collect();

        // "datalog" first: it is the only stem that could contain another
        if folded.contains("datalog") {
            EventKind::DataLog
        } else if folded.contains("biomarker") {
            EventKind::Biomarker
        } else if folded.contains("archetype") {
            EventKind::Archetype
        } else if folded.contains("score") {
            EventKind::Score
        } else {
            EventKind::Unknown
        }
    }

    /// The provider's canonical event name for this kind
    pub fn provider_event_name(&self) -> Option<&'static str> {
        match self {
            EventKind::Score => Some("ScoreCreatedIntegrationEvent"),
            EventKind::Biomarker => Some("BiomarkerCreatedIntegrationEvent"),
            EventKind::DataLog => Some("DataLogReceivedIntegrationEvent"),
            EventKind::Archetype => Some("ArchetypeCreatedIntegrationEvent"),
            EventKind::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Score => "score",
            EventKind::Biomarker => "biomarker",
            EventKind::DataLog => "dataLog",
            EventKind::Archetype => "archetype",
            EventKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded delivery
///
/// Each known kind carries its schema-validated items (deliveries may be
/// batched). Unknown kinds keep the raw body.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Score(Vec<ScorePayload>),
    Biomarker(Vec<BiomarkerPayload>),
    DataLog(Vec<DataLogPayload>),
    Archetype(Vec<ArchetypePayload>),
    Unrecognized { event_type: String, body: Value },
}

impl WebhookEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WebhookEvent::Score(_) => EventKind::Score,
            WebhookEvent::Biomarker(_) => EventKind::Biomarker,
            WebhookEvent::DataLog(_) => EventKind::DataLog,
            WebhookEvent::Archetype(_) => EventKind::Archetype,
            WebhookEvent::Unrecognized { .. } => EventKind::Unknown,
        }
    }

    /// Number of items carried by the delivery
    pub fn item_count(&self) -> usize {
        match self {
            WebhookEvent::Score(items) => items.len(),
            WebhookEvent::Biomarker(items) => items.len(),
            WebhookEvent::DataLog(items) => items.len(),
            WebhookEvent::Archetype(items) => items.len(),
            WebhookEvent::Unrecognized { .. } => 1,
        }
    }
}
