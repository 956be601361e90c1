use async_trait::async_trait;
use bastion_core::{AppError, AppResult};
use bastion_domain::EncryptionKey;

/// Length of a data key in bytes.
pub const DATA_KEY_LEN: usize = 32;

/// Port for wrapping data keys with the process master key.
pub trait SecretEncryptor: Send + Sync {
    /// Encrypts plaintext bytes.
    fn encrypt(&self, plaintext: &[u8]) -> AppResult<Vec<u8>>;

    /// Decrypts ciphertext bytes.
    fn decrypt(&self, ciphertext: &[u8]) -> AppResult<Vec<u8>>;
}

/// Raw symmetric key that seals field payloads.
#[derive(Clone, PartialEq, Eq)]
pub struct DataKey([u8; DATA_KEY_LEN]);

impl DataKey {
    /// Creates a data key from exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        let key: [u8; DATA_KEY_LEN] = bytes.try_into().map_err(|_| {
            AppError::DecryptionFailed(format!(
                "data key must be {DATA_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Returns the key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DATA_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("DataKey(..)")
    }
}

/// Port for authenticated encryption under a data key.
pub trait DataKeyCipher: Send + Sync {
    /// Generates a fresh random data key.
    fn generate_data_key(&self) -> AppResult<DataKey>;

    /// Seals plaintext, binding `associated_data` into the tag.
    fn seal(
        &self,
        data_key: &DataKey,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> AppResult<Vec<u8>>;

    /// Opens a sealed payload; tampering yields `AppError::DecryptionFailed`.
    fn open(
        &self,
        data_key: &DataKey,
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> AppResult<Vec<u8>>;
}

/// Key version metadata together with its master-wrapped data key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEncryptionKey {
    /// Version metadata.
    pub key: EncryptionKey,
    /// Data key encrypted under the master key.
    pub wrapped_key: Vec<u8>,
}

/// Repository port for versioned encryption keys.
#[async_trait]
pub trait EncryptionKeyRepository: Send + Sync {
    /// Lists every version of a key, oldest first.
    async fn list_key_versions(&self, key_name: &str) -> AppResult<Vec<StoredEncryptionKey>>;

    /// Finds the single active version of a key.
    async fn find_active_key(&self, key_name: &str) -> AppResult<Option<StoredEncryptionKey>>;

    /// Finds one specific version of a key.
    async fn find_key_version(
        &self,
        key_name: &str,
        version: u32,
    ) -> AppResult<Option<StoredEncryptionKey>>;

    /// Inserts the first version of a key; conflicts when the name exists.
    async fn insert_initial_key(&self, key: StoredEncryptionKey) -> AppResult<()>;

    /// Retires `retired` and activates `successor` atomically.
    ///
    /// Conflicts when `retired` is no longer the active version.
    async fn rotate_key(
        &self,
        retired: &EncryptionKey,
        successor: StoredEncryptionKey,
    ) -> AppResult<()>;
}
