use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bastion_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SECRET_ENCODING_PREFIX: &str = "enc";
const SECRET_ENCODING_VERSION: &str = "v1";
const MAX_KEY_NAME_LENGTH: usize = 128;

/// Validates a logical key name.
///
/// Any text is accepted as long as it is non-blank, has no control
/// characters and stays within [`MAX_KEY_NAME_LENGTH`] characters.
fn validate_key_name(key_name: &str) -> AppResult<()> {
    if key_name.trim().is_empty() {
        return Err(AppError::Validation(
            "key name must not be empty or whitespace".to_owned(),
        ));
    }
    if key_name.chars().count() > MAX_KEY_NAME_LENGTH {
        return Err(AppError::Validation(format!(
            "key name '{key_name}' must be at most {MAX_KEY_NAME_LENGTH} characters"
        )));
    }
    if key_name.chars().any(char::is_control) {
        return Err(AppError::Validation(format!(
            "key name {key_name:?} must not contain control characters"
        )));
    }

    Ok(())
}

/// Associated data binding a ciphertext to one key version.
fn key_associated_data(key_name: &str, version: u32, key_id: Uuid) -> Vec<u8> {
    format!("{key_name}:{version}:{key_id}").into_bytes()
}

/// Versioned key metadata tracked by the key registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    key_name: String,
    key_id: Uuid,
    version: u32,
    created_at: DateTime<Utc>,
    rotation_date: Option<DateTime<Utc>>,
    active: bool,
}

impl EncryptionKey {
    /// Creates the first active version for a key name.
    pub fn initial(key_name: &str, created_at: DateTime<Utc>) -> AppResult<Self> {
        validate_key_name(key_name)?;
        Ok(Self {
            key_name: key_name.to_owned(),
            key_id: Uuid::new_v4(),
            version: 1,
            created_at,
            rotation_date: None,
            active: true,
        })
    }

    /// Rehydrates persisted key metadata.
    pub fn restore(
        key_name: String,
        key_id: Uuid,
        version: u32,
        created_at: DateTime<Utc>,
        rotation_date: Option<DateTime<Utc>>,
        active: bool,
    ) -> AppResult<Self> {
        validate_key_name(key_name.as_str())?;
        if version == 0 {
            return Err(AppError::Validation(format!(
                "key '{key_name}' version must start at 1"
            )));
        }

        Ok(Self {
            key_name,
            key_id,
            version,
            created_at,
            rotation_date,
            active,
        })
    }

    /// Returns the next active version for the same key name.
    pub fn successor(&self, created_at: DateTime<Utc>) -> AppResult<Self> {
        let version = self.version.checked_add(1).ok_or_else(|| {
            AppError::Validation(format!("key '{}' exhausted its versions", self.key_name))
        })?;

        Ok(Self {
            key_name: self.key_name.clone(),
            key_id: Uuid::new_v4(),
            version,
            created_at,
            rotation_date: None,
            active: true,
        })
    }

    /// Returns this version marked inactive as of `rotated_at`.
    #[must_use]
    pub fn retired(&self, rotated_at: DateTime<Utc>) -> Self {
        Self {
            rotation_date: Some(rotated_at),
            active: false,
            ..self.clone()
        }
    }

    /// Returns the logical key name.
    #[must_use]
    pub fn key_name(&self) -> &str {
        self.key_name.as_str()
    }

    /// Returns the unique id of this version.
    #[must_use]
    pub fn key_id(&self) -> Uuid {
        self.key_id
    }

    /// Returns the 1-based version number.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns when this version was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when this version was rotated out, if it was.
    #[must_use]
    pub fn rotation_date(&self) -> Option<DateTime<Utc>> {
        self.rotation_date
    }

    /// Returns whether this is the active version.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the AEAD associated data for ciphertexts sealed under this version.
    #[must_use]
    pub fn associated_data(&self) -> Vec<u8> {
        key_associated_data(self.key_name.as_str(), self.version, self.key_id)
    }
}

/// Ciphertext plus the exact key version that sealed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    key_name: String,
    key_id: Uuid,
    key_version: u32,
    ciphertext: Vec<u8>,
}

impl EncryptedSecret {
    /// Creates a secret sealed under `key`.
    #[must_use]
    pub fn sealed_with(key: &EncryptionKey, ciphertext: Vec<u8>) -> Self {
        Self {
            key_name: key.key_name().to_owned(),
            key_id: key.key_id(),
            key_version: key.version(),
            ciphertext,
        }
    }

    /// Parses the stable text encoding `enc:v1:<name>:<version>:<key_id>:<base64>`.
    ///
    /// `<name>` is percent-encoded, so key names may contain `:`.
    pub fn parse(encoded: &str) -> AppResult<Self> {
        let parts: Vec<&str> = encoded.splitn(6, ':').collect();
        let [prefix, encoding_version, key_name, key_version, key_id, payload] = parts.as_slice()
        else {
            return Err(AppError::Validation(
                "encrypted secret must have six ':'-separated segments".to_owned(),
            ));
        };

        if *prefix != SECRET_ENCODING_PREFIX || *encoding_version != SECRET_ENCODING_VERSION {
            return Err(AppError::Validation(format!(
                "unsupported encrypted secret encoding '{prefix}:{encoding_version}'"
            )));
        }

        let key_name = urlencoding::decode(key_name).map_err(|error| {
            AppError::Validation(format!("invalid encrypted secret key name: {error}"))
        })?;
        validate_key_name(key_name.as_ref())?;
        let key_version = key_version.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid encrypted secret key version: {error}"))
        })?;
        let key_id = Uuid::parse_str(key_id).map_err(|error| {
            AppError::Validation(format!("invalid encrypted secret key id: {error}"))
        })?;
        let ciphertext = STANDARD.decode(payload).map_err(|error| {
            AppError::Validation(format!("invalid encrypted secret payload: {error}"))
        })?;

        Ok(Self {
            key_name: key_name.into_owned(),
            key_id,
            key_version,
            ciphertext,
        })
    }

    /// Returns the stable text encoding stored next to the protected field.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{SECRET_ENCODING_PREFIX}:{SECRET_ENCODING_VERSION}:{}:{}:{}:{}",
            urlencoding::encode(self.key_name.as_str()),
            self.key_version,
            self.key_id,
            STANDARD.encode(&self.ciphertext)
        )
    }

    /// Returns the logical key name.
    #[must_use]
    pub fn key_name(&self) -> &str {
        self.key_name.as_str()
    }

    /// Returns the id of the sealing key version.
    #[must_use]
    pub fn key_id(&self) -> Uuid {
        self.key_id
    }

    /// Returns the sealing key version.
    #[must_use]
    pub fn key_version(&self) -> u32 {
        self.key_version
    }

    /// Returns the raw ciphertext.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        self.ciphertext.as_slice()
    }

    /// Returns the AEAD associated data recorded on this secret.
    #[must_use]
    pub fn associated_data(&self) -> Vec<u8> {
        key_associated_data(self.key_name.as_str(), self.key_version, self.key_id)
    }
}
