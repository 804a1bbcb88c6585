//! Crash recovery: one JSON record per live session.
//!
//! Actors hand records to a background writer so no session ever waits on disk.
//! Records are written to a temporary file and renamed into place.

use std::path::{Path, PathBuf};

use sagebrush_protocol::{ErrorCode, SessionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed record {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl PersistenceError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Internal
    }
}

/// Everything needed to bring a session back: its state and last sequence number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub state: SessionState,
    pub sequence: u64,
}

enum Request {
    Save(Box<SessionRecord>),
    Delete(SessionId),
    Flush(oneshot::Sender<()>),
}

/// Cheap handle to the writer task.
#[derive(Clone, Debug)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl PersistenceHandle {
    pub fn save(&self, record: SessionRecord) {
        if self.tx.send(Request::Save(Box::new(record))).is_err() {
            debug!("persistence writer gone, dropping record");
        }
    }

    pub fn delete(&self, id: SessionId) {
        if self.tx.send(Request::Delete(id)).is_err() {
            debug!("persistence writer gone, dropping delete");
        }
    }

    /// Resolves once everything queued before it has hit the disk.
    pub async fn flush(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Request::Flush(reply)).is_ok() {
            let _ = done.await;
        }
    }
}

/// Start the writer for `dir`, creating the directory if needed.
pub async fn spawn_writer(
    dir: PathBuf,
) -> Result<(PersistenceHandle, JoinHandle<()>), PersistenceError> {
    fs::create_dir_all(&dir)
        .await
        .map_err(|source| PersistenceError::Io {
            path: dir.clone(),
            source,
        })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match request {
                Request::Save(record) => {
                    if let Err(err) = write_record(&dir, &record).await {
                        warn!(
                            session_id = %record.state.id(),
                            error = %err,
                            "failed to persist session"
                        );
                    }
                }
                Request::Delete(id) => {
                    if let Err(err) = delete_record(&dir, &id).await {
                        warn!(session_id = %id, error = %err, "failed to delete session record");
                    }
                }
                Request::Flush(reply) => {
                    let _ = reply.send(());
                }
            }
        }
        debug!("persistence writer stopped");
    });
    Ok((PersistenceHandle { tx }, task))
}

/// Read every record in `dir`. Unreadable files are skipped with a warning.
pub async fn load_all(dir: &Path) -> Result<Vec<SessionRecord>, PersistenceError> {
    let mut records = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|source| PersistenceError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        let Some(entry) = entry else { break };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_record(&path).await {
            Ok(record) => records.push(record),
            Err(err) => warn!(error = %err, "skipping session record"),
        }
    }
    Ok(records)
}

async fn read_record(path: &Path) -> Result<SessionRecord, PersistenceError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&text).map_err(|source| PersistenceError::Json {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_record(dir: &Path, record: &SessionRecord) -> Result<(), PersistenceError> {
    let Some(path) = record_path(dir, record.state.id()) else {
        warn!(session_id = %record.state.id(), "session id not usable as a file name");
        return Ok(());
    };
    let json = serde_json::to_vec_pretty(record).map_err(|source| PersistenceError::Json {
        path: path.clone(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .await
        .map_err(|source| PersistenceError::Io {
            path: tmp.clone(),
            source,
        })?;
    fs::rename(&tmp, &path)
        .await
        .map_err(|source| PersistenceError::Io { path, source })
}

async fn delete_record(dir: &Path, id: &SessionId) -> Result<(), PersistenceError> {
    let Some(path) = record_path(dir, id) else {
        return Ok(());
    };
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PersistenceError::Io { path, source }),
    }
}

fn record_path(dir: &Path, id: &SessionId) -> Option<PathBuf> {
    let safe = !id.as_str().is_empty()
        && id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    safe.then(|| dir.join(format!("{id}.json")))
}
