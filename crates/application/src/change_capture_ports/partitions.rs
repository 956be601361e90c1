use async_trait::async_trait;
use bastion_core::AppResult;
use bastion_domain::AuditPartition;

/// Storage catalog of audit log partitions.
#[async_trait]
pub trait PartitionCatalog: Send + Sync {
    /// Lists every existing partition.
    async fn list_partitions(&self) -> AppResult<Vec<AuditPartition>>;

    /// Creates one partition.
    ///
    /// Returns `AppError::PartitionConflict` when any existing partition
    /// overlaps the requested range, including an identical one.
    async fn create_partition(&self, partition: AuditPartition) -> AppResult<()>;
}
