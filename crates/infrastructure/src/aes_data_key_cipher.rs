use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use bastion_application::{DataKey, DataKeyCipher};
use bastion_core::{AppError, AppResult};

use crate::aes_secret_encryptor::NONCE_LEN;

/// AES-256-GCM payload cipher keyed by per-version data keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesDataKeyCipher;

impl AesDataKeyCipher {
    /// Creates the cipher.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DataKeyCipher for AesDataKeyCipher {
    fn generate_data_key(&self) -> AppResult<DataKey> {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        DataKey::from_bytes(key.as_slice())
    }

    fn seal(
        &self,
        data_key: &DataKey,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> AppResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(data_key.as_bytes().into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|error| AppError::Internal(format!("failed to seal payload: {error}")))?;

        let mut result = Vec::with_capacity(nonce.len() + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn open(
        &self,
        data_key: &DataKey,
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> AppResult<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(AppError::DecryptionFailed(
                "ciphertext too short: missing nonce".to_owned(),
            ));
        }

        let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_LEN);
        let nonce_array: [u8; NONCE_LEN] = nonce_bytes.try_into().map_err(|_| {
            AppError::DecryptionFailed("nonce must be exactly 12 bytes".to_owned())
        })?;
        let cipher = Aes256Gcm::new(data_key.as_bytes().into());

        cipher
            .decrypt(
                &Nonce::from(nonce_array),
                Payload {
                    msg: encrypted,
                    aad: associated_data,
                },
            )
            .map_err(|_| {
                AppError::DecryptionFailed(
                    "ciphertext failed authentication under its key version".to_owned(),
                )
            })
    }
}
