use std::collections::HashMap;

use async_trait::async_trait;
use bastion_application::{EncryptionKeyRepository, StoredEncryptionKey};
use bastion_core::{AppError, AppResult};
use bastion_domain::EncryptionKey;
use tokio::sync::RwLock;

/// In-memory versioned key repository.
#[derive(Debug, Default)]
pub struct InMemoryEncryptionKeyRepository {
    keys: RwLock<HashMap<String, Vec<StoredEncryptionKey>>>,
}

impl InMemoryEncryptionKeyRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EncryptionKeyRepository for InMemoryEncryptionKeyRepository {
    async fn list_key_versions(&self, key_name: &str) -> AppResult<Vec<StoredEncryptionKey>> {
        let mut versions = self
            .keys
            .read()
            .await
            .get(key_name)
            .cloned()
            .unwrap_or_default();
        versions.sort_by_key(|stored| stored.key.version());
        Ok(versions)
    }

    async fn find_active_key(&self, key_name: &str) -> AppResult<Option<StoredEncryptionKey>> {
        Ok(self.keys.read().await.get(key_name).and_then(|versions| {
            versions
                .iter()
                .find(|stored| stored.key.is_active())
                .cloned()
        }))
    }

    async fn find_key_version(
        &self,
        key_name: &str,
        version: u32,
    ) -> AppResult<Option<StoredEncryptionKey>> {
        Ok(self.keys.read().await.get(key_name).and_then(|versions| {
            versions
                .iter()
                .find(|stored| stored.key.version() == version)
                .cloned()
        }))
    }

    async fn insert_initial_key(&self, key: StoredEncryptionKey) -> AppResult<()> {
        let mut keys = self.keys.write().await;
        let key_name = key.key.key_name().to_owned();
        if keys.contains_key(&key_name) {
            return Err(AppError::Conflict(format!(
                "encryption key '{key_name}' already exists"
            )));
        }

        keys.insert(key_name, vec![key]);
        Ok(())
    }

    async fn rotate_key(
        &self,
        retired: &EncryptionKey,
        successor: StoredEncryptionKey,
    ) -> AppResult<()> {
        let mut keys = self.keys.write().await;
        let versions = keys.get_mut(retired.key_name()).ok_or_else(|| {
            AppError::KeyNotFound(format!(
                "encryption key '{}' does not exist",
                retired.key_name()
            ))
        })?;

        let Some(current) = versions.iter_mut().find(|stored| {
            stored.key.key_id() == retired.key_id() && stored.key.is_active()
        }) else {
            return Err(AppError::Conflict(format!(
                "encryption key '{}' version {} is no longer active",
                retired.key_name(),
                retired.version()
            )));
        };

        current.key = retired.clone();
        versions.push(successor);
        Ok(())
    }
}
