use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::models::QueueItem;

/// Current queue and history, as persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    pub queue: Vec<QueueItem>,
    pub history: Vec<QueueItem>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("corrupt queue file {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode queue: {0}")]
    Encode(#[from] serde_json::Error),
}

/// JSON file holding the queue. One writer, any number of readers; writes go
/// to a sibling temp file that is then renamed over the original.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty queue.
    pub async fn load(&self) -> Result<QueueSnapshot, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(QueueSnapshot::default()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(QueueSnapshot::default());
        }

        serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Like `load`, but a corrupt file is moved aside and treated as empty.
    pub async fn load_or_recover(&self) -> Result<QueueSnapshot, StoreError> {
        match self.load().await {
            Err(StoreError::Corrupt { source, .. }) => {
                let aside = self.sibling(".corrupt");
                tracing::error!(
                    "Queue file {} is corrupt ({source}), moving it to {} and starting empty",
                    self.path.display(),
                    aside.display()
                );
                tokio::fs::rename(&self.path, &aside)
                    .await
                    .map_err(|source| StoreError::Write {
                        path: aside,
                        source,
                    })?;
                Ok(QueueSnapshot::default())
            }
            other => other,
        }
    }

    pub async fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.sibling(".tmp");

        let write = async {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir).await?;
            }
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        };

        write.await.map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("queue.json"));
        name.push(suffix);
        self.path.with_file_name(name)
    }
}
