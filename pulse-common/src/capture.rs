//! Webhook capture log
//!
//! Every delivery that passes signature verification is appended as one
//! JSON line to the capture log, including deliveries whose body failed to
//! parse. The log exists for offline inspection by the reporting tool and is
//! never read on the ingestion path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::{Error, Result};

/// Header values never written to the log
const REDACTED_HEADERS: [&str; 3] = ["x-signature", "authorization", "cookie"];

/// One captured delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    /// Parsed body, or the raw text when it was not valid JSON
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl WebhookEventRecord {
    pub fn new<I>(
        headers: I,
        event_type: Option<String>,
        external_id: Option<String>,
        raw_body: &[u8],
    ) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let headers = headers
            .into_iter()
            .map(|(name, value)| {
                let name = name.to_ascii_lowercase();
                if REDACTED_HEADERS.contains(&name.as_str()) {
                    (name, "[redacted]".to_string())
                } else {
                    (name, value)
                }
            })
            .collect();

        let (body, parse_error) = match serde_json::from_slice::<Value>(raw_body) {
            Ok(body) => (body, None),
            Err(e) => (
                Value::String(String::from_utf8_lossy(raw_body).into_owned()),
                Some(e.to_string()),
            ),
        };

        Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            headers,
            event_type,
            external_id,
            body,
            parse_error,
        }
    }
}

/// Append-only JSON lines file
#[derive(Debug)]
pub struct CaptureLog {
    path: PathBuf,
    // Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl CaptureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &WebhookEventRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read every record from a capture log
///
/// Missing file reads as empty. Malformed lines are skipped with a warning.
pub async fn read_capture_log(path: &Path) -> Result<Vec<WebhookEventRecord>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                "Skipping malformed capture line {} in {}: {}",
                index + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(records)
}
