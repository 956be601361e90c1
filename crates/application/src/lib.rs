//! Application services and ports.

#![forbid(unsafe_code)]

mod access_policy_engine;
mod audited_mutation_service;
mod backup_orchestrator;
mod change_capture_log;
mod change_capture_ports;
mod encryption_key_registry;
mod encryption_ports;
mod envelope_encryption_service;
mod maintenance_scheduler;
mod operations_ports;
mod partition_manager;
mod run_control;

#[cfg(test)]
mod test_support;

pub use access_policy_engine::AccessPolicyEngine;
pub use audited_mutation_service::AuditedMutationService;
pub use backup_orchestrator::{BackupOrchestrator, partition_artifact_name, table_artifact_name};
pub use change_capture_log::{ChangeCaptureLog, MAX_AUDIT_QUERY_LIMIT};
pub use change_capture_ports::{
    AuditQuery, AuditRecordReader, AuditTransaction, MutationStore, MutationTransaction,
    PartitionCatalog,
};
pub use encryption_key_registry::{EncryptionKeyRegistry, UnlockedKey};
pub use encryption_ports::{
    DATA_KEY_LEN, DataKey, DataKeyCipher, EncryptionKeyRepository, SecretEncryptor,
    StoredEncryptionKey,
};
pub use envelope_encryption_service::EnvelopeEncryptionService;
pub use maintenance_scheduler::MaintenanceScheduler;
pub use operations_ports::{
    BackupArtifact, BackupArtifactStore, BackupRepository, DatasetSnapshot, MaintenanceExecutor,
    MaintenanceRepository, PartitionSnapshot, SnapshotSource, TableSnapshot,
};
pub use partition_manager::{EnsuredPartition, PartitionManager};
pub use run_control::CancellationSignal;
