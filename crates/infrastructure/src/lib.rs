//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod aes_data_key_cipher;
mod aes_secret_encryptor;
mod filesystem_backup_artifact_store;
mod in_memory_backup_artifact_store;
mod in_memory_compliance_store;
mod in_memory_encryption_key_repository;
mod in_memory_operations_repository;
mod postgres_compliance_store;
mod postgres_encryption_key_repository;
mod postgres_maintenance_executor;
mod postgres_operations_repository;

pub use aes_data_key_cipher::AesDataKeyCipher;
pub use aes_secret_encryptor::AesSecretEncryptor;
pub use filesystem_backup_artifact_store::FilesystemBackupArtifactStore;
pub use in_memory_backup_artifact_store::InMemoryBackupArtifactStore;
pub use in_memory_compliance_store::InMemoryComplianceStore;
pub use in_memory_encryption_key_repository::InMemoryEncryptionKeyRepository;
pub use in_memory_operations_repository::InMemoryOperationsRepository;
pub use postgres_compliance_store::PostgresComplianceStore;
pub use postgres_encryption_key_repository::PostgresEncryptionKeyRepository;
pub use postgres_maintenance_executor::{DEFAULT_REPORT_VIEWS, PostgresMaintenanceExecutor};
pub use postgres_operations_repository::PostgresOperationsRepository;

/// Embedded schema migrations for the PostgreSQL adapters.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
