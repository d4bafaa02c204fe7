use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::Profile;

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn get_profile(&self, id: i64) -> Option<Profile>;
}

/// Profiles loaded from a JSON array on disk, kept in memory.
pub struct ProfileStore {
    path: Option<PathBuf>,
    profiles: RwLock<HashMap<i64, Profile>>,
}

impl ProfileStore {
    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            path: None,
            profiles: RwLock::new(profiles.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    /// Load from `path`. A missing file yields an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let profiles = read_profiles(&path).await?;
        tracing::info!("Loaded {} profile(s) from {}", profiles.len(), path.display());
        Ok(Self {
            path: Some(path),
            profiles: RwLock::new(profiles),
        })
    }

    /// Re-read the backing file. Returns the number of profiles loaded.
    pub async fn reload(&self) -> Result<usize, String> {
        let Some(path) = &self.path else {
            return Ok(self.profiles.read().await.len());
        };
        let profiles = read_profiles(path).await?;
        let count = profiles.len();
        *self.profiles.write().await = profiles;
        tracing::info!("Reloaded {count} profile(s) from {}", path.display());
        Ok(count)
    }

    pub async fn list(&self) -> Vec<Profile> {
        let mut out: Vec<Profile> = self.profiles.read().await.values().cloned().collect();
        out.sort_by_key(|p| p.id);
        out
    }
}

#[async_trait]
impl ProfileLookup for ProfileStore {
    async fn get_profile(&self, id: i64) -> Option<Profile> {
        self.profiles.read().await.get(&id).cloned()
    }
}

async fn read_profiles(path: &Path) -> Result<HashMap<i64, Profile>, String> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Profiles file {} not found, starting with none", path.display());
            return Ok(HashMap::new());
        }
        Err(e) => return Err(format!("Failed to read {}: {e}", path.display())),
    };

    let list: Vec<Profile> = serde_json::from_slice(&raw)
        .map_err(|e| format!("Invalid profiles file {}: {e}", path.display()))?;

    let mut profiles = HashMap::with_capacity(list.len());
    for profile in list {
        if let Some(prev) = profiles.insert(profile.id, profile) {
            return Err(format!("Duplicate profile id {} in {}", prev.id, path.display()));
        }
    }
    Ok(profiles)
}
