use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bastion_application::{
    AuditQuery, AuditRecordReader, MutationStore, MutationTransaction, PartitionCatalog,
};
use bastion_core::{AppError, AppResult};
use bastion_domain::{AuditPartition, AuditRecord, ProtectedRecord, ProtectedResource, Role};
use tokio::sync::RwLock;

mod maintenance;
mod snapshot;
mod transaction;


use transaction::InMemoryMutationTransaction;

type RowKey = (String, String);

#[derive(Debug, Clone)]
struct StoredRow {
    record: ProtectedRecord,
    commit_sequence: i64,
}

#[derive(Debug, Clone)]
struct StoredAuditRecord {
    record: AuditRecord,
    commit_sequence: i64,
}

#[derive(Debug, Default)]
struct ComplianceState {
    last_commit_sequence: i64,
    rows: HashMap<RowKey, StoredRow>,
    principal_roles: HashMap<String, Role>,
    partitions: BTreeMap<AuditPartition, Vec<StoredAuditRecord>>,
    derived_reports: BTreeMap<String, usize>,
}

/// In-memory store for protected resources and their partitioned audit log.
///
/// Transactions stage writes privately and apply them under one write lock
/// on commit.
#[derive(Debug, Default, Clone)]
pub struct InMemoryComplianceStore {
    state: Arc<RwLock<ComplianceState>>,
}

impl InMemoryComplianceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed audit records across all partitions.
    pub async fn audit_record_count(&self) -> usize {
        self.state
            .read()
            .await
            .partitions
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Returns the row counts computed by the last derived report refresh.
    pub async fn derived_report(&self) -> BTreeMap<String, usize> {
        self.state.read().await.derived_reports.clone()
    }
}

fn row_key(resource: &ProtectedResource, record_id: &str) -> RowKey {
    (resource.storage_table().to_owned(), record_id.to_owned())
}

#[async_trait]
impl MutationStore for InMemoryComplianceStore {
    async fn begin(&self) -> AppResult<Box<dyn MutationTransaction>> {
        Ok(Box::new(InMemoryMutationTransaction::new(self.state.clone())))
    }

    async fn find_record(
        &self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<Option<ProtectedRecord>> {
        Ok(self
            .state
            .read()
            .await
            .rows
            .get(&row_key(resource, record_id))
            .map(|row| row.record.clone()))
    }

    async fn find_principal_role(&self, principal_id: &str) -> AppResult<Option<Role>> {
        Ok(self
            .state
            .read()
            .await
            .principal_roles
            .get(principal_id)
            .copied())
    }
}

#[async_trait]
impl PartitionCatalog for InMemoryComplianceStore {
    async fn list_partitions(&self) -> AppResult<Vec<AuditPartition>> {
        Ok(self.state.read().await.partitions.keys().copied().collect())
    }

    async fn create_partition(&self, partition: AuditPartition) -> AppResult<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .partitions
            .keys()
            .find(|existing| existing.overlaps(&partition))
        {
            return Err(AppError::PartitionConflict(format!(
                "partition '{}' overlaps existing partition '{}'",
                partition.table_name(),
                existing.table_name()
            )));
        }

        state.partitions.insert(partition, Vec::new());
        Ok(())
    }
}

#[async_trait]
impl AuditRecordReader for InMemoryComplianceStore {
    async fn list_records(
        &self,
        partitions: &[AuditPartition],
        query: &AuditQuery,
    ) -> AppResult<Vec<AuditRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<AuditRecord> = partitions
            .iter()
            .filter_map(|partition| state.partitions.get(partition))
            .flatten()
            .filter(|stored| query.matches(&stored.record))
            .map(|stored| stored.record.clone())
            .collect();

        records.sort_by(|left, right| {
            right
                .occurred_at()
                .cmp(&left.occurred_at())
                .then_with(|| right.record_id().cmp(&left.record_id()))
        });

        Ok(records
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}
