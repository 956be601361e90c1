use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bastion_application::{BackupArtifact, BackupArtifactStore};
use bastion_core::AppResult;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory backup artifact store.
#[derive(Debug, Default)]
pub struct InMemoryBackupArtifactStore {
    artifacts: RwLock<HashMap<Uuid, BTreeMap<String, BackupArtifact>>>,
}

impl InMemoryBackupArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes one artifact, simulating loss of backup media.
    pub async fn remove_artifact(&self, backup_id: Uuid, name: &str) -> bool {
        self.artifacts
            .write()
            .await
            .get_mut(&backup_id)
            .is_some_and(|artifacts| artifacts.remove(name).is_some())
    }

    /// Returns one stored artifact.
    pub async fn artifact(&self, backup_id: Uuid, name: &str) -> Option<BackupArtifact> {
        self.artifacts
            .read()
            .await
            .get(&backup_id)
            .and_then(|artifacts| artifacts.get(name).cloned())
    }
}

#[async_trait]
impl BackupArtifactStore for InMemoryBackupArtifactStore {
    async fn write_artifact(&self, artifact: &BackupArtifact) -> AppResult<()> {
        self.artifacts
            .write()
            .await
            .entry(artifact.backup_id)
            .or_default()
            .insert(artifact.name.clone(), artifact.clone());
        Ok(())
    }

    async fn list_artifact_names(&self, backup_id: Uuid) -> AppResult<Vec<String>> {
        Ok(self
            .artifacts
            .read()
            .await
            .get(&backup_id)
            .map(|artifacts| artifacts.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn discard_artifacts(&self, backup_id: Uuid) -> AppResult<()> {
        self.artifacts.write().await.remove(&backup_id);
        Ok(())
    }
}
