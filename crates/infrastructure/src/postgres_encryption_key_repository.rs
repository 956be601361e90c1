//! PostgreSQL-backed versioned encryption key repository.

use async_trait::async_trait;
use bastion_application::{EncryptionKeyRepository, StoredEncryptionKey};
use bastion_core::{AppError, AppResult};
use bastion_domain::EncryptionKey;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};


/// PostgreSQL implementation of the encryption key repository port.
#[derive(Clone)]
pub struct PostgresEncryptionKeyRepository {
    pool: PgPool,
}

impl PostgresEncryptionKeyRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct EncryptionKeyRow {
    key_id: uuid::Uuid,
    key_name: String,
    version: i32,
    wrapped_key: Vec<u8>,
    created_at: DateTime<Utc>,
    rotation_date: Option<DateTime<Utc>>,
    active: bool,
}

impl TryFrom<EncryptionKeyRow> for StoredEncryptionKey {
    type Error = AppError;

    fn try_from(row: EncryptionKeyRow) -> Result<Self, Self::Error> {
        let version = u32::try_from(row.version).map_err(|error| {
            AppError::Internal(format!(
                "stored key '{}' has invalid version {}: {error}",
                row.key_name, row.version
            ))
        })?;

        Ok(Self {
            key: EncryptionKey::restore(
                row.key_name,
                row.key_id,
                version,
                row.created_at,
                row.rotation_date,
                row.active,
            )?,
            wrapped_key: row.wrapped_key,
        })
    }
}

fn sql_version(key: &EncryptionKey) -> AppResult<i32> {
    i32::try_from(key.version()).map_err(|error| {
        AppError::Validation(format!(
            "key '{}' version {} does not fit storage: {error}",
            key.key_name(),
            key.version()
        ))
    })
}

async fn lock_key_name(
    transaction: &mut Transaction<'static, Postgres>,
    key_name: &str,
) -> AppResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("encryption_key:{key_name}"))
        .execute(&mut **transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to lock encryption key '{key_name}': {error}"))
        })?;

    Ok(())
}

async fn insert_key_version(
    transaction: &mut Transaction<'static, Postgres>,
    stored: &StoredEncryptionKey,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO encryption_keys (
            key_id, key_name, version, wrapped_key, created_at, rotation_date, active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(stored.key.key_id())
    .bind(stored.key.key_name())
    .bind(sql_version(&stored.key)?)
    .bind(stored.wrapped_key.as_slice())
    .bind(stored.key.created_at())
    .bind(stored.key.rotation_date())
    .bind(stored.key.is_active())
    .execute(&mut **transaction)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to insert encryption key '{}' version {}: {error}",
            stored.key.key_name(),
            stored.key.version()
        ))
    })?;

    Ok(())
}

const KEY_COLUMNS: &str =
    "key_id, key_name, version, wrapped_key, created_at, rotation_date, active";

#[async_trait]
impl EncryptionKeyRepository for PostgresEncryptionKeyRepository {
    async fn list_key_versions(&self, key_name: &str) -> AppResult<Vec<StoredEncryptionKey>> {
        let rows = sqlx::query_as::<_, EncryptionKeyRow>(
            format!(
                "SELECT {KEY_COLUMNS} FROM encryption_keys WHERE key_name = $1 ORDER BY version"
            )
            .as_str(),
        )
        .bind(key_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list versions of encryption key '{key_name}': {error}"
            ))
        })?;

        rows.into_iter().map(StoredEncryptionKey::try_from).collect()
    }

    async fn find_active_key(&self, key_name: &str) -> AppResult<Option<StoredEncryptionKey>> {
        let row = sqlx::query_as::<_, EncryptionKeyRow>(
            format!("SELECT {KEY_COLUMNS} FROM encryption_keys WHERE key_name = $1 AND active")
                .as_str(),
        )
        .bind(key_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to find active encryption key '{key_name}': {error}"
            ))
        })?;

        row.map(StoredEncryptionKey::try_from).transpose()
    }

    async fn find_key_version(
        &self,
        key_name: &str,
        version: u32,
    ) -> AppResult<Option<StoredEncryptionKey>> {
        let Ok(version) = i32::try_from(version) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, EncryptionKeyRow>(
            format!(
                "SELECT {KEY_COLUMNS} FROM encryption_keys WHERE key_name = $1 AND version = $2"
            )
            .as_str(),
        )
        .bind(key_name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to find encryption key '{key_name}' version {version}: {error}"
            ))
        })?;

        row.map(StoredEncryptionKey::try_from).transpose()
    }

    async fn insert_initial_key(&self, key: StoredEncryptionKey) -> AppResult<()> {
        let key_name = key.key.key_name().to_owned();
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;
        lock_key_name(&mut transaction, key_name.as_str()).await?;

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT count(*) FROM encryption_keys WHERE key_name = $1",
        )
        .bind(key_name.as_str())
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to check encryption key '{key_name}': {error}"
            ))
        })?;

        if existing > 0 {
            return Err(AppError::Conflict(format!(
                "encryption key '{key_name}' already exists"
            )));
        }

        insert_key_version(&mut transaction, &key).await?;
        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })
    }

    async fn rotate_key(
        &self,
        retired: &EncryptionKey,
        successor: StoredEncryptionKey,
    ) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;
        lock_key_name(&mut transaction, retired.key_name()).await?;

        let result = sqlx::query(
            r#"
            UPDATE encryption_keys
            SET active = FALSE, rotation_date = $2
            WHERE key_id = $1 AND active
            "#,
        )
        .bind(retired.key_id())
        .bind(retired.rotation_date())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to retire encryption key '{}' version {}: {error}",
                retired.key_name(),
                retired.version()
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "encryption key '{}' version {} is no longer active",
                retired.key_name(),
                retired.version()
            )));
        }

        insert_key_version(&mut transaction, &successor).await?;
        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })
    }
}
