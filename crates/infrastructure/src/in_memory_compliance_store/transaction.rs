use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bastion_application::{AuditTransaction, MutationTransaction};
use bastion_core::{AppError, AppResult};
use bastion_domain::{AuditPartition, AuditRecord, ProtectedRecord, ProtectedResource, Role};
use tokio::sync::RwLock;

use super::{ComplianceState, RowKey, StoredAuditRecord, StoredRow, row_key};

#[derive(Debug)]
enum StagedWrite {
    Upsert(RowKey, ProtectedRecord),
    Remove(RowKey),
    PrincipalRole(String, Role),
    Audit(AuditPartition, AuditRecord),
}

/// Unit of work whose writes stay private until commit.
///
/// Principal roles read through the transaction must be unchanged at commit,
/// otherwise the commit fails with a conflict.
pub(super) struct InMemoryMutationTransaction {
    state: Arc<RwLock<ComplianceState>>,
    staged: Vec<StagedWrite>,
    role_reads: HashMap<String, Option<Role>>,
}

impl InMemoryMutationTransaction {
    pub(super) fn new(state: Arc<RwLock<ComplianceState>>) -> Self {
        Self {
            state,
            staged: Vec::new(),
            role_reads: HashMap::new(),
        }
    }

    async fn visible_record(&self, key: &RowKey) -> Option<ProtectedRecord> {
        for write in self.staged.iter().rev() {
            match write {
                StagedWrite::Upsert(staged_key, record) if staged_key == key => {
                    return Some(record.clone());
                }
                StagedWrite::Remove(staged_key) if staged_key == key => return None,
                _ => {}
            }
        }

        self.state
            .read()
            .await
            .rows
            .get(key)
            .map(|row| row.record.clone())
    }
}

#[async_trait]
impl AuditTransaction for InMemoryMutationTransaction {
    async fn append_audit_record(
        &mut self,
        partition: &AuditPartition,
        record: &AuditRecord,
    ) -> AppResult<()> {
        if !partition.contains(record.occurred_at()) {
            return Err(AppError::Internal(format!(
                "audit record at {} does not belong in partition '{}'",
                record.occurred_at(),
                partition.table_name()
            )));
        }
        if !self.state.read().await.partitions.contains_key(partition) {
            return Err(AppError::Internal(format!(
                "audit partition '{}' does not exist",
                partition.table_name()
            )));
        }

        self.staged
            .push(StagedWrite::Audit(*partition, record.clone()));
        Ok(())
    }
}

#[async_trait]
impl MutationTransaction for InMemoryMutationTransaction {
    async fn find_record(
        &mut self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<Option<ProtectedRecord>> {
        Ok(self.visible_record(&row_key(resource, record_id)).await)
    }

    async fn insert_record(
        &mut self,
        resource: &ProtectedResource,
        record: &ProtectedRecord,
    ) -> AppResult<()> {
        let key = row_key(resource, record.record_id.as_str());
        if self.visible_record(&key).await.is_some() {
            return Err(AppError::Conflict(format!(
                "{} '{}' already exists",
                resource.resource_type(),
                record.record_id
            )));
        }

        self.staged.push(StagedWrite::Upsert(key, record.clone()));
        Ok(())
    }

    async fn update_record(
        &mut self,
        resource: &ProtectedResource,
        record: &ProtectedRecord,
    ) -> AppResult<()> {
        let key = row_key(resource, record.record_id.as_str());
        if self.visible_record(&key).await.is_none() {
            return Err(AppError::NotFound(format!(
                "{} '{}' does not exist",
                resource.resource_type(),
                record.record_id
            )));
        }

        self.staged.push(StagedWrite::Upsert(key, record.clone()));
        Ok(())
    }

    async fn delete_record(
        &mut self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<()> {
        let key = row_key(resource, record_id);
        if self.visible_record(&key).await.is_none() {
            return Err(AppError::NotFound(format!(
                "{} '{record_id}' does not exist",
                resource.resource_type()
            )));
        }

        self.staged.push(StagedWrite::Remove(key));
        Ok(())
    }

    async fn find_principal_role(&mut self, principal_id: &str) -> AppResult<Option<Role>> {
        for write in self.staged.iter().rev() {
            if let StagedWrite::PrincipalRole(staged_id, role) = write
                && staged_id == principal_id
            {
                return Ok(Some(*role));
            }
        }

        let stored = self
            .state
            .read()
            .await
            .principal_roles
            .get(principal_id)
            .copied();
        self.role_reads
            .entry(principal_id.to_owned())
            .or_insert(stored);
        Ok(stored)
    }

    async fn save_principal_role(&mut self, principal_id: &str, role: Role) -> AppResult<()> {
        self.staged
            .push(StagedWrite::PrincipalRole(principal_id.to_owned(), role));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self {
            state: shared,
            staged,
            role_reads,
        } = *self;
        let mut state = shared.write().await;

        for (principal_id, observed) in &role_reads {
            if state.principal_roles.get(principal_id) != observed.as_ref() {
                return Err(AppError::Conflict(format!(
                    "role of principal '{principal_id}' changed concurrently"
                )));
            }
        }

        for write in &staged {
            if let StagedWrite::Audit(partition, _) = write
                && !state.partitions.contains_key(partition)
            {
                return Err(AppError::Internal(format!(
                    "audit partition '{}' disappeared before commit",
                    partition.table_name()
                )));
            }
        }

        state.last_commit_sequence += 1;
        let commit_sequence = state.last_commit_sequence;
        for write in staged {
            match write {
                StagedWrite::Upsert(key, record) => {
                    state.rows.insert(
                        key,
                        StoredRow {
                            record,
                            commit_sequence,
                        },
                    );
                }
                StagedWrite::Remove(key) => {
                    state.rows.remove(&key);
                }
                StagedWrite::PrincipalRole(principal_id, role) => {
                    state.principal_roles.insert(principal_id, role);
                }
                StagedWrite::Audit(partition, record) => {
                    state
                        .partitions
                        .entry(partition)
                        .or_default()
                        .push(StoredAuditRecord {
                            record,
                            commit_sequence,
                        });
                }
            }
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}
