use async_trait::async_trait;
use bastion_core::AppResult;
use bastion_domain::{AuditOperation, AuditPartition, AuditRecord, ResourceType};
use chrono::{DateTime, Utc};

/// Open transaction the change-capture log appends through.
#[async_trait]
pub trait AuditTransaction: Send {
    /// Appends one audit record into the given partition.
    async fn append_audit_record(
        &mut self,
        partition: &AuditPartition,
        record: &AuditRecord,
    ) -> AppResult<()>;
}

/// Range-bounded audit query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    /// Inclusive lower bound on `occurred_at`.
    pub from: DateTime<Utc>,
    /// Inclusive upper bound on `occurred_at`.
    pub to: DateTime<Utc>,
    /// Optional resource type filter.
    pub resource_type: Option<ResourceType>,
    /// Optional resource id filter.
    pub resource_id: Option<String>,
    /// Optional actor filter.
    pub actor_id: Option<String>,
    /// Optional operation filter.
    pub operation: Option<AuditOperation>,
    /// Maximum rows returned.
    pub limit: usize,
    /// Number of rows skipped for offset pagination.
    pub offset: usize,
}

impl AuditQuery {
    /// Creates an unfiltered query over `[from, to]` returning the first page.
    #[must_use]
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            resource_type: None,
            resource_id: None,
            actor_id: None,
            operation: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Returns whether a record satisfies every filter.
    #[must_use]
    pub fn matches(&self, record: &AuditRecord) -> bool {
        record.occurred_at() >= self.from
            && record.occurred_at() <= self.to
            && self
                .resource_type
                .as_ref()
                .is_none_or(|value| value == record.resource_type())
            && self
                .resource_id
                .as_deref()
                .is_none_or(|value| value == record.resource_id())
            && self
                .actor_id
                .as_deref()
                .is_none_or(|value| Some(value) == record.actor_id())
            && self
                .operation
                .is_none_or(|value| value == record.operation())
    }
}

/// Port for reading audit records from selected partitions.
#[async_trait]
pub trait AuditRecordReader: Send + Sync {
    /// Lists matching records from `partitions` only, newest first.
    async fn list_records(
        &self,
        partitions: &[AuditPartition],
        query: &AuditQuery,
    ) -> AppResult<Vec<AuditRecord>>;
}
