//! Aggregate store
//!
//! The whole store is one JSON document (external subject id → record).
//! Every changing merge rewrites the full document: the new contents go to a
//! sibling `.tmp` file which is then renamed over the target, so a failed
//! write leaves the previous valid JSON in place.
//!
//! # Single writer
//!
//! [`AggregateStore`] owns the in-memory map and the file. In the service it
//! runs as one task fed by an `mpsc` channel ([`AggregateStore::spawn`]);
//! handlers talk to it through a cloneable [`StoreHandle`]. All
//! read-modify-write cycles are therefore serialized, and concurrent
//! deliveries for different subjects cannot drop each other's updates.
//!
//! Reporting tools use [`read_aggregate_file`] and never write.

use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::aggregate::{AggregateMap, CategoryCounts, SubjectAggregate, SubjectPatch};

/// Default command queue depth for the writer task
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Aggregate store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not a valid aggregate document: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode aggregates: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("aggregate store writer is not running")]
    Closed,
}

impl From<StoreError> for crate::Error {
    fn from(err: StoreError) -> Self {
        crate::Error::Storage(err.to_string())
    }
}

/// Result of one merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Subject did not exist before this merge
    pub created: bool,
    /// Record changed (and the file was rewritten)
    pub changed: bool,
    /// Key counts of the subject's record after the merge
    pub counts: CategoryCounts,
}

/// Read the aggregate document without modifying it
///
/// A missing file reads as an empty map.
pub async fn read_aggregate_file(path: &Path) -> Result<AggregateMap, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AggregateMap::new()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    // A zero-length file is what an interrupted first write leaves behind
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(AggregateMap::new());
    }

    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write the full document via temp file + rename
pub async fn write_aggregate_file(path: &Path, aggregates: &AggregateMap) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(aggregates)?;
    let tmp = temp_path(path);

    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    debug!(
        "Wrote {} subjects ({} bytes) to {}",
        aggregates.len(),
        bytes.len(),
        path.display()
    );
    Ok(())
}

/// Owner of the aggregate document
#[derive(Debug)]
pub struct AggregateStore {
    path: PathBuf,
    aggregates: AggregateMap,
}

impl AggregateStore {
    /// Load the store from `path`
    ///
    /// - Missing file: empty store (the file is created on first write)
    /// - Corrupt file: moved aside to `<name>.corrupt-<unix secs>`, empty store
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let aggregates = match read_aggregate_file(&path).await {
            Ok(aggregates) => aggregates,
            Err(StoreError::Corrupt { source, .. }) => {
                let quarantine = quarantine_path(&path);
                warn!(
                    "Aggregate file {} is corrupt ({}); moving it to {} and starting empty",
                    path.display(),
                    source,
                    quarantine.display()
                );
                tokio::fs::rename(&path, &quarantine)
                    .await
                    .map_err(|source| StoreError::Write {
                        path: quarantine.clone(),
                        source,
                    })?;
                AggregateMap::new()
            }
            Err(e) => return Err(e),
        };

        info!(
            "Aggregate store loaded {} subjects from {}",
            aggregates.len(),
            path.display()
        );

        Ok(Self { path, aggregates })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, subject_id: &str) -> Option<&SubjectAggregate> {
        self.aggregates.get(subject_id)
    }

    pub fn aggregates(&self) -> &AggregateMap {
        &self.aggregates
    }

    /// Merge a patch into one subject and persist if anything changed
    ///
    /// On write failure the in-memory change is rolled back, so memory and
    /// disk stay in agreement.
    pub async fn merge(
        &mut self,
        subject_id: &str,
        patch: &SubjectPatch,
    ) -> Result<MergeOutcome, StoreError> {
        let previous = self.aggregates.get(subject_id).cloned();
        let created = previous.is_none();
        let now = Utc::now();

        let record = self.aggregates.entry(subject_id.to_string()).or_default();
        let mut changed = record.merge(patch, now);
        if created && !changed {
            record.updated_at = Some(now);
            changed = true;
        }
        let counts = record.counts();

        if changed {
            if let Err(e) = write_aggregate_file(&self.path, &self.aggregates).await {
                match previous {
                    Some(record) => {
                        self.aggregates.insert(subject_id.to_string(), record);
                    }
                    None => {
                        self.aggregates.remove(subject_id);
                    }
                }
                return Err(e);
            }
        }

        Ok(MergeOutcome {
            created,
            changed,
            counts,
        })
    }

    /// Replace the store with an empty map, returning the number of subjects removed
    pub async fn clear(&mut self) -> Result<usize, StoreError> {
        let previous = std::mem::take(&mut self.aggregates);
        if let Err(e) = write_aggregate_file(&self.path, &self.aggregates).await {
            self.aggregates = previous;
            return Err(e);
        }
        info!("Aggregate store cleared ({} subjects removed)", previous.len());
        Ok(previous.len())
    }

    /// Run as the single writer task
    pub fn spawn(self, capacity: usize) -> StoreHandle {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(self.run(rx));
        StoreHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<StoreCommand>) {
        debug!("Aggregate store writer started for {}", self.path.display());

        while let Some(command) = rx.recv().await {
            // Send failures mean the requester went away; the work is done regardless
            match command {
                StoreCommand::Get { subject_id, reply } => {
                    let _ = reply.send(self.get(&subject_id).cloned());
                }
                StoreCommand::Merge {
                    subject_id,
                    patch,
                    reply,
                } => {
                    let _ = reply.send(self.merge(&subject_id, &patch).await);
                }
                StoreCommand::Clear { reply } => {
                    let _ = reply.send(self.clear().await);
                }
                StoreCommand::Snapshot { reply } => {
                    let _ = reply.send(self.aggregates.clone());
                }
                StoreCommand::SubjectIds { reply } => {
                    let _ = reply.send(self.aggregates.keys().cloned().collect());
                }
            }
        }

        debug!("Aggregate store writer stopped");
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", Utc::now().timestamp()));
    path.with_file_name(name)
}

enum StoreCommand {
    Get {
        subject_id: String,
        reply: oneshot::Sender<Option<SubjectAggregate>>,
    },
    Merge {
        subject_id: String,
        patch: SubjectPatch,
        reply: oneshot::Sender<Result<MergeOutcome, StoreError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
    Snapshot {
        reply: oneshot::Sender<AggregateMap>,
    },
    SubjectIds {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Cloneable handle to the writer task
#[derive(Clone, Debug)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl std::fmt::Debug for StoreCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreCommand::Get { .. } => "Get",
            StoreCommand::Merge { .. } => "Merge",
            StoreCommand::Clear { .. } => "Clear",
            StoreCommand::Snapshot { .. } => "Snapshot",
            StoreCommand::SubjectIds { .. } => "SubjectIds",
        };
        f.write_str(name)
    }
}

impl StoreHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T, StoreError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| StoreError::Closed)?;
        response.await.map_err(|_| StoreError::Closed)
    }

    pub async fn get(&self, subject_id: impl Into<String>) -> Result<Option<SubjectAggregate>, StoreError> {
        let subject_id = subject_id.into();
        self.request(|reply| StoreCommand::Get { subject_id, reply })
            .await
    }

    pub async fn merge(
        &self,
        subject_id: impl Into<String>,
        patch: SubjectPatch,
    ) -> Result<MergeOutcome, StoreError> {
        let subject_id = subject_id.into();
        self.request(|reply| StoreCommand::Merge {
            subject_id,
            patch,
            reply,
        })
        .await?
    }

    pub async fn clear(&self) -> Result<usize, StoreError> {
        self.request(|reply| StoreCommand::Clear { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<AggregateMap, StoreError> {
        self.request(|reply| StoreCommand::Snapshot { reply }).await
    }

    /// Subject ids in sorted order
    pub async fn subject_ids(&self) -> Result<Vec<String>, StoreError> {
        self.request(|reply| StoreCommand::SubjectIds { reply })
            .await
    }
}
