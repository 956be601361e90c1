use std::collections::HashMap;

use async_trait::async_trait;
use bastion_core::{AppError, AppResult};
use bastion_domain::EncryptionKey;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    DataKey, DataKeyCipher, EncryptionKeyRepository, SecretEncryptor,
    StoredEncryptionKey,
};

/// Reversible master key wrapper that tags its output.
pub(crate) struct FakeMasterKey;

impl SecretEncryptor for FakeMasterKey {
    fn encrypt(&self, plaintext: &[u8]) -> AppResult<Vec<u8>> {
        let mut wrapped = b"wrapped:".to_vec();
        wrapped.extend_from_slice(plaintext);
        Ok(wrapped)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> AppResult<Vec<u8>> {
        ciphertext
            .strip_prefix(b"wrapped:".as_slice())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| AppError::DecryptionFailed("not wrapped".to_owned()))
    }
}

/// XOR cipher that checks the key and associated data on open.
pub(crate) struct FakeCipher;

impl DataKeyCipher for FakeCipher {
    fn generate_data_key(&self) -> AppResult<DataKey> {
        let mut bytes = Uuid::new_v4().as_bytes().to_vec();
        bytes.extend_from_slice(Uuid::new_v4().as_bytes());
        DataKey::from_bytes(bytes.as_slice())
    }

    fn seal(
        &self,
        data_key: &DataKey,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> AppResult<Vec<u8>> {
        let mut sealed = data_key.as_bytes().to_vec();
        sealed.extend_from_slice(associated_data);
        sealed.push(b'|');
        sealed.extend(plaintext.iter().map(|byte| byte ^ data_key.as_bytes()[0]));
        Ok(sealed)
    }

    fn open(
        &self,
        data_key: &DataKey,
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> AppResult<Vec<u8>> {
        let mut prefix = data_key.as_bytes().to_vec();
        prefix.extend_from_slice(associated_data);
        prefix.push(b'|');
        let body = ciphertext
            .strip_prefix(prefix.as_slice())
            .ok_or_else(|| AppError::DecryptionFailed("authentication failed".to_owned()))?;
        Ok(body
            .iter()
            .map(|byte| byte ^ data_key.as_bytes()[0])
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeKeyRepository {
    pub(crate) keys: Mutex<HashMap<String, Vec<StoredEncryptionKey>>>,
}

#[async_trait]
impl EncryptionKeyRepository for FakeKeyRepository {
    async fn list_key_versions(&self, key_name: &str) -> AppResult<Vec<StoredEncryptionKey>> {
        Ok(self
            .keys
            .lock()
            .await
            .get(key_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_active_key(&self, key_name: &str) -> AppResult<Option<StoredEncryptionKey>> {
        Ok(self.keys.lock().await.get(key_name).and_then(|versions| {
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
        Ok(self.keys.lock().await.get(key_name).and_then(|versions| {
            versions
                .iter()
                .find(|stored| stored.key.version() == version)
                .cloned()
        }))
    }

    async fn insert_initial_key(&self, key: StoredEncryptionKey) -> AppResult<()> {
        let mut keys = self.keys.lock().await;
        if keys.contains_key(key.key.key_name()) {
            return Err(AppError::Conflict(key.key.key_name().to_owned()));
        }
        keys.insert(key.key.key_name().to_owned(), vec![key]);
        Ok(())
    }

    async fn rotate_key(
        &self,
        retired: &EncryptionKey,
        successor: StoredEncryptionKey,
    ) -> AppResult<()> {
        let mut keys = self.keys.lock().await;
        let versions = keys
            .get_mut(retired.key_name())
            .ok_or_else(|| AppError::KeyNotFound(retired.key_name().to_owned()))?;
        let Some(current) = versions
            .iter_mut()
            .find(|stored| stored.key.key_id() == retired.key_id() && stored.key.is_active())
        else {
            return Err(AppError::Conflict(format!(
                "version {} is no longer active",
                retired.version()
            )));
        };
        current.key = retired.clone();
        versions.push(successor);
        Ok(())
    }
}
