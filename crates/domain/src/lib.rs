//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod access_policy;
mod audit;
mod encryption;
mod operations;
mod partition;
mod principal;
mod resource;

pub use access_policy::AccessPolicy;
pub use audit::{AuditOperation, AuditRecord, AuditRecordId, ChangeCapture};
pub use encryption::{EncryptedSecret, EncryptionKey};
pub use operations::{
    BackupKind, BackupRecord, ChangeCursor, MaintenanceOperation, MaintenanceRecord, RunStatus,
};
pub use partition::{AUDIT_LOG_TABLE, AuditPartition};
pub use principal::{Principal, Role};
pub use resource::{
    ProtectedRecord, ProtectedResource, ProtectedResourceRegistry, ResourceType,
    resource_types, validate_identifier,
};
