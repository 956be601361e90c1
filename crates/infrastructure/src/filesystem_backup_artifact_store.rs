use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bastion_application::{BackupArtifact, BackupArtifactStore};
use bastion_core::{AppError, AppResult};
use serde_json::json;
use tokio::fs;
use uuid::Uuid;

const ARTIFACT_EXTENSION: &str = "json";

/// Backup artifact store writing one JSON file per artifact under `<root>/<backup_id>/`.
#[derive(Debug, Clone)]
pub struct FilesystemBackupArtifactStore {
    root: PathBuf,
}

impl FilesystemBackupArtifactStore {
    /// Creates a store rooted at `root`; directories are created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory holding one backup's artifacts.
    #[must_use]
    pub fn backup_dir(&self, backup_id: Uuid) -> PathBuf {
        self.root.join(backup_id.to_string())
    }

    fn artifact_path(&self, backup_id: Uuid, name: &str) -> PathBuf {
        self.backup_dir(backup_id)
            .join(format!("{}.{ARTIFACT_EXTENSION}", encode_name(name)))
    }
}

fn encode_name(name: &str) -> String {
    urlencoding::encode(name).into_owned()
}

fn decode_name(file_name: &Path) -> Option<String> {
    if file_name.extension()?.to_str()? != ARTIFACT_EXTENSION {
        return None;
    }
    urlencoding::decode(file_name.file_stem()?.to_str()?)
        .ok()
        .map(|name| name.into_owned())
}

#[async_trait]
impl BackupArtifactStore for FilesystemBackupArtifactStore {
    async fn write_artifact(&self, artifact: &BackupArtifact) -> AppResult<()> {
        let directory = self.backup_dir(artifact.backup_id);
        fs::create_dir_all(&directory).await.map_err(|error| {
            AppError::Internal(format!(
                "failed to create backup directory '{}': {error}",
                directory.display()
            ))
        })?;

        let body = serde_json::to_vec_pretty(&json!({
            "backup_id": artifact.backup_id,
            "name": artifact.name,
            "item_count": artifact.item_count,
            "payload": artifact.payload,
        }))
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to serialize artifact '{}': {error}",
                artifact.name
            ))
        })?;

        // The rename publishes the artifact in one step.
        let path = self.artifact_path(artifact.backup_id, artifact.name.as_str());
        let partial = path.with_extension("partial");
        fs::write(&partial, body).await.map_err(|error| {
            AppError::Internal(format!(
                "failed to write artifact '{}': {error}",
                partial.display()
            ))
        })?;
        fs::rename(&partial, &path).await.map_err(|error| {
            AppError::Internal(format!(
                "failed to finalize artifact '{}': {error}",
                path.display()
            ))
        })
    }

    async fn list_artifact_names(&self, backup_id: Uuid) -> AppResult<Vec<String>> {
        let directory = self.backup_dir(backup_id);
        let mut entries = match fs::read_dir(&directory).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(AppError::Internal(format!(
                    "failed to read backup directory '{}': {error}",
                    directory.display()
                )));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to list backup directory '{}': {error}",
                directory.display()
            ))
        })? {
            if let Some(name) = decode_name(Path::new(&entry.file_name())) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    async fn discard_artifacts(&self, backup_id: Uuid) -> AppResult<()> {
        let directory = self.backup_dir(backup_id);
        match fs::remove_dir_all(&directory).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(AppError::Internal(format!(
                "failed to discard backup directory '{}': {error}",
                directory.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use bastion_application::{BackupArtifact, BackupArtifactStore};
    use bastion_core::{AppError, AppResult};
    use serde_json::json;
    use uuid::Uuid;

    use super::FilesystemBackupArtifactStore;

    fn artifact(backup_id: Uuid, name: &str) -> BackupArtifact {
        BackupArtifact {
            backup_id,
            name: name.to_owned(),
            item_count: 1,
            payload: json!({"rows": [{"record_id": "c1"}]}),
        }
    }

    #[tokio::test]
    async fn written_artifacts_are_listed_by_manifest_name() -> AppResult<()> {
        let root = tempfile::tempdir().map_err(|error| AppError::Internal(error.to_string()))?;
        let store = FilesystemBackupArtifactStore::new(root.path());
        let backup_id = Uuid::new_v4();

        store
            .write_artifact(&artifact(backup_id, "table:contacts"))
            .await?;
        store
            .write_artifact(&artifact(backup_id, "partition:audit_records_y2025m06"))
            .await?;

        assert_eq!(
            store.list_artifact_names(backup_id).await?,
            vec![
                "partition:audit_records_y2025m06".to_owned(),
                "table:contacts".to_owned()
            ]
        );
        assert!(store.list_artifact_names(Uuid::new_v4()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn names_with_separators_list_back_unchanged() -> AppResult<()> {
        let root = tempfile::tempdir().map_err(|error| AppError::Internal(error.to_string()))?;
        let store = FilesystemBackupArtifactStore::new(root.path());
        let backup_id = Uuid::new_v4();
        let names = ["table:a__b", "table:a:b", "partition:audit_records_y2025m06"];

        for name in names {
            store.write_artifact(&artifact(backup_id, name)).await?;
        }

        let mut expected: Vec<String> = names.iter().map(|name| (*name).to_owned()).collect();
        expected.sort();
        assert_eq!(store.list_artifact_names(backup_id).await?, expected);
        Ok(())
    }

    #[tokio::test]
    async fn discard_removes_every_artifact() -> AppResult<()> {
        let root = tempfile::tempdir().map_err(|error| AppError::Internal(error.to_string()))?;
        let store = FilesystemBackupArtifactStore::new(root.path());
        let backup_id = Uuid::new_v4();
        store
            .write_artifact(&artifact(backup_id, "table:contacts"))
            .await?;

        store.discard_artifacts(backup_id).await?;
        store.discard_artifacts(backup_id).await?;

        assert!(store.list_artifact_names(backup_id).await?.is_empty());
        assert!(!store.backup_dir(backup_id).exists());
        Ok(())
    }
}
