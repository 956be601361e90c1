use std::collections::HashMap;
use std::sync::Arc;

use bastion_core::{AppError, AppResult};
use bastion_domain::EncryptionKey;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{DataKey, DataKeyCipher, EncryptionKeyRepository, SecretEncryptor, StoredEncryptionKey};


/// Key version paired with its unwrapped data key.
#[derive(Debug, Clone)]
pub struct UnlockedKey {
    /// Version metadata.
    pub key: EncryptionKey,
    /// Unwrapped data key.
    pub data_key: DataKey,
}

/// Versioned key store with one active version per key name.
pub struct EncryptionKeyRegistry {
    repository: Arc<dyn EncryptionKeyRepository>,
    master_key: Arc<dyn SecretEncryptor>,
    cipher: Arc<dyn DataKeyCipher>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EncryptionKeyRegistry {
    /// Creates a registry over a key repository and the master key wrapper.
    #[must_use]
    pub fn new(
        repository: Arc<dyn EncryptionKeyRepository>,
        master_key: Arc<dyn SecretEncryptor>,
        cipher: Arc<dyn DataKeyCipher>,
    ) -> Self {
        Self {
            repository,
            master_key,
            cipher,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the payload cipher keys from this registry are used with.
    #[must_use]
    pub fn cipher(&self) -> &dyn DataKeyCipher {
        self.cipher.as_ref()
    }

    /// Registers version 1 of a new key name.
    ///
    /// Fails with `AppError::Conflict` when any version of the name exists.
    pub async fn create_key(&self, key_name: &str) -> AppResult<EncryptionKey> {
        let key_lock = self.key_lock(key_name).await;
        let _guard = key_lock.lock().await;

        let (stored, _) = self.new_initial_key(key_name)?;
        let key = stored.key.clone();
        if let Err(error) = self.repository.insert_initial_key(stored).await {
            warn!(key_name = %key_name, error = %error, "encryption key creation failed");
            return Err(error);
        }

        info!(key_name = %key_name, key_id = %key.key_id(), "created encryption key");
        Ok(key)
    }

    /// Returns the active version, creating version 1 when the name is new.
    pub async fn active_or_create(&self, key_name: &str) -> AppResult<UnlockedKey> {
        if let Some(stored) = self.repository.find_active_key(key_name).await? {
            return self.unlock(stored);
        }

        let key_lock = self.key_lock(key_name).await;
        let _guard = key_lock.lock().await;
        if let Some(stored) = self.repository.find_active_key(key_name).await? {
            return self.unlock(stored);
        }

        let (stored, data_key) = self.new_initial_key(key_name)?;
        let key = stored.key.clone();
        match self.repository.insert_initial_key(stored).await {
            Ok(()) => {
                info!(key_name = %key_name, key_id = %key.key_id(), "created encryption key");
                Ok(UnlockedKey { key, data_key })
            }
            Err(AppError::Conflict(_)) => {
                let stored = self.repository.find_active_key(key_name).await?.ok_or_else(|| {
                    AppError::KeyNotFound(format!("key '{key_name}' has no active version"))
                })?;
                self.unlock(stored)
            }
            Err(error) => Err(error),
        }
    }

    /// Returns the active version of an existing key.
    pub async fn active_key(&self, key_name: &str) -> AppResult<UnlockedKey> {
        let stored = self
            .repository
            .find_active_key(key_name)
            .await?
            .ok_or_else(|| {
                AppError::KeyNotFound(format!("key '{key_name}' has no active version"))
            })?;
        self.unlock(stored)
    }

    /// Returns one specific version, active or retired.
    pub async fn key_version(&self, key_name: &str, version: u32) -> AppResult<UnlockedKey> {
        let stored = self
            .repository
            .find_key_version(key_name, version)
            .await?
            .ok_or_else(|| {
                AppError::KeyNotFound(format!("key '{key_name}' version {version} does not exist"))
            })?;
        self.unlock(stored)
    }

    /// Lists every version of a key, oldest first.
    pub async fn list_key_versions(&self, key_name: &str) -> AppResult<Vec<EncryptionKey>> {
        Ok(self
            .repository
            .list_key_versions(key_name)
            .await?
            .into_iter()
            .map(|stored| stored.key)
            .collect())
    }

    /// Retires the active version and activates a new one.
    ///
    /// Rotations of the same key name are serialized; retired versions stay
    /// available for decryption.
    pub async fn rotate_key(&self, key_name: &str) -> AppResult<EncryptionKey> {
        let key_lock = self.key_lock(key_name).await;
        let _guard = key_lock.lock().await;

        let current = self
            .repository
            .find_active_key(key_name)
            .await?
            .ok_or_else(|| {
                AppError::KeyNotFound(format!("key '{key_name}' has no active version"))
            })?
            .key;
        let now = Utc::now();
        let successor = current.successor(now)?;
        let data_key = self.cipher.generate_data_key()?;
        let stored = StoredEncryptionKey {
            key: successor.clone(),
            wrapped_key: self.master_key.encrypt(data_key.as_bytes())?,
        };

        if let Err(error) = self
            .repository
            .rotate_key(&current.retired(now), stored)
            .await
        {
            warn!(key_name = %key_name, error = %error, "encryption key rotation failed");
            return Err(error);
        }

        info!(
            key_name = %key_name,
            retired_version = current.version(),
            active_version = successor.version(),
            "rotated encryption key"
        );
        Ok(successor)
    }

    fn new_initial_key(&self, key_name: &str) -> AppResult<(StoredEncryptionKey, DataKey)> {
        let key = EncryptionKey::initial(key_name, Utc::now())?;
        let data_key = self.cipher.generate_data_key()?;
        let stored = StoredEncryptionKey {
            key,
            wrapped_key: self.master_key.encrypt(data_key.as_bytes())?,
        };
        Ok((stored, data_key))
    }

    fn unlock(&self, stored: StoredEncryptionKey) -> AppResult<UnlockedKey> {
        let raw = self
            .master_key
            .decrypt(stored.wrapped_key.as_slice())
            .map_err(|error| {
                AppError::DecryptionFailed(format!(
                    "failed to unwrap key '{}' version {}: {error}",
                    stored.key.key_name(),
                    stored.key.version()
                ))
            })?;

        Ok(UnlockedKey {
            data_key: DataKey::from_bytes(raw.as_slice())?,
            key: stored.key,
        })
    }

    async fn key_lock(&self, key_name: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .lock()
            .await
            .entry(key_name.to_owned())
            .or_default()
            .clone()
    }
}
