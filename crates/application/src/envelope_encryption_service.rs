use std::sync::Arc;

use bastion_core::{AppError, AppResult};
use bastion_domain::{EncryptedSecret, EncryptionKey, Principal, ResourceType, resource_types};
use tracing::error;

use crate::{AccessPolicyEngine, EncryptionKeyRegistry};

#[cfg(test)]
mod tests;

/// Field-level envelope encryption gated by the `encryption_key` policy.
pub struct EnvelopeEncryptionService {
    registry: Arc<EncryptionKeyRegistry>,
    access_policy: AccessPolicyEngine,
    key_resource: ResourceType,
}

impl EnvelopeEncryptionService {
    /// Creates the service over a key registry.
    pub fn new(
        registry: Arc<EncryptionKeyRegistry>,
        access_policy: AccessPolicyEngine,
    ) -> AppResult<Self> {
        let key_resource = ResourceType::new(resource_types::ENCRYPTION_KEY)?;
        if access_policy.policy(&key_resource).is_none() {
            return Err(AppError::Validation(format!(
                "no access policy is registered for '{key_resource}'"
            )));
        }

        Ok(Self {
            registry,
            access_policy,
            key_resource,
        })
    }

    /// Registers version 1 of `key_name`; an existing name is a conflict.
    pub async fn create_key(
        &self,
        principal: &Principal,
        key_name: &str,
    ) -> AppResult<EncryptionKey> {
        self.authorize(principal)?;
        self.registry.create_key(key_name).await
    }

    /// Encrypts plaintext under the active version of `key_name`.
    pub async fn encrypt(
        &self,
        principal: &Principal,
        key_name: &str,
        plaintext: &[u8],
    ) -> AppResult<EncryptedSecret> {
        self.authorize(principal)?;
        self.seal_with_active(key_name, plaintext).await
    }

    /// Decrypts a secret with the exact key version that sealed it.
    pub async fn decrypt(
        &self,
        principal: &Principal,
        secret: &EncryptedSecret,
    ) -> AppResult<Vec<u8>> {
        self.authorize(principal)?;
        self.open(secret).await
    }

    /// Retires the active version of `key_name` and activates a new one.
    pub async fn rotate_key(
        &self,
        principal: &Principal,
        key_name: &str,
    ) -> AppResult<EncryptionKey> {
        self.authorize(principal)?;
        self.registry.rotate_key(key_name).await
    }

    /// Re-seals a secret under the currently active version.
    ///
    /// Secrets already on the active version are returned unchanged.
    pub async fn reencrypt(
        &self,
        principal: &Principal,
        secret: &EncryptedSecret,
    ) -> AppResult<EncryptedSecret> {
        self.authorize(principal)?;
        let active = self.registry.active_key(secret.key_name()).await?;
        if active.key.key_id() == secret.key_id() {
            return Ok(secret.clone());
        }

        let plaintext = self.open(secret).await?;
        self.seal_with_active(secret.key_name(), plaintext.as_slice())
            .await
    }

    /// Lists every version of a key, oldest first.
    pub async fn list_key_versions(
        &self,
        principal: &Principal,
        key_name: &str,
    ) -> AppResult<Vec<EncryptionKey>> {
        self.authorize(principal)?;
        self.registry.list_key_versions(key_name).await
    }

    fn authorize(&self, principal: &Principal) -> AppResult<()> {
        self.access_policy
            .authorize(principal, &self.key_resource, None)
    }

    async fn seal_with_active(&self, key_name: &str, plaintext: &[u8]) -> AppResult<EncryptedSecret> {
        let active = self.registry.active_or_create(key_name).await?;
        let ciphertext = self.registry.cipher().seal(
            &active.data_key,
            plaintext,
            active.key.associated_data().as_slice(),
        )?;
        Ok(EncryptedSecret::sealed_with(&active.key, ciphertext))
    }

    async fn open(&self, secret: &EncryptedSecret) -> AppResult<Vec<u8>> {
        let unlocked = match self
            .registry
            .key_version(secret.key_name(), secret.key_version())
            .await
        {
            Ok(unlocked) => unlocked,
            Err(AppError::KeyNotFound(detail)) => {
                error!(
                    key_name = %secret.key_name(),
                    key_version = secret.key_version(),
                    "ciphertext references a key version that does not exist"
                );
                return Err(AppError::KeyNotFound(detail));
            }
            Err(other) => return Err(other),
        };

        if unlocked.key.key_id() != secret.key_id() {
            return Err(AppError::DecryptionFailed(format!(
                "key '{}' version {} has id {}, ciphertext names {}",
                secret.key_name(),
                secret.key_version(),
                unlocked.key.key_id(),
                secret.key_id()
            )));
        }

        self.registry.cipher().open(
            &unlocked.data_key,
            secret.ciphertext(),
            secret.associated_data().as_slice(),
        )
    }
}
