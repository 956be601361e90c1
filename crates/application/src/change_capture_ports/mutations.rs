use async_trait::async_trait;
use bastion_core::AppResult;
use bastion_domain::{ProtectedRecord, ProtectedResource, Role};

use super::AuditTransaction;

/// Unit of work spanning a protected-resource mutation and its audit record.
///
/// Nothing staged through a transaction is observable until `commit`
/// succeeds; `rollback` discards everything.
#[async_trait]
pub trait MutationTransaction: AuditTransaction {
    /// Reads a record as seen by this transaction.
    async fn find_record(
        &mut self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<Option<ProtectedRecord>>;

    /// Inserts a new record; conflicts when the id already exists.
    async fn insert_record(
        &mut self,
        resource: &ProtectedResource,
        record: &ProtectedRecord,
    ) -> AppResult<()>;

    /// Replaces an existing record.
    async fn update_record(
        &mut self,
        resource: &ProtectedResource,
        record: &ProtectedRecord,
    ) -> AppResult<()>;

    /// Removes an existing record.
    async fn delete_record(
        &mut self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<()>;

    /// Reads a principal's stored role and holds it until the transaction ends.
    ///
    /// A concurrent transaction changing the same principal either waits or
    /// fails to commit.
    async fn find_principal_role(&mut self, principal_id: &str) -> AppResult<Option<Role>>;

    /// Stores a principal role assignment.
    async fn save_principal_role(&mut self, principal_id: &str, role: Role) -> AppResult<()>;

    /// Makes every staged write visible atomically.
    async fn commit(self: Box<Self>) -> AppResult<()>;

    /// Discards every staged write.
    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

/// Transactional storage for protected resources.
#[async_trait]
pub trait MutationStore: Send + Sync {
    /// Opens a new unit of work.
    async fn begin(&self) -> AppResult<Box<dyn MutationTransaction>>;

    /// Reads one committed record.
    async fn find_record(
        &self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<Option<ProtectedRecord>>;

    /// Reads one committed principal role assignment.
    async fn find_principal_role(&self, principal_id: &str) -> AppResult<Option<Role>>;
}
