use async_trait::async_trait;
use bastion_core::AppResult;
use bastion_domain::{
    AuditPartition, AuditRecord, BackupRecord, ChangeCursor, MaintenanceRecord, ProtectedRecord,
    ProtectedResourceRegistry,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Rows of one protected table captured by a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    /// Storage table name.
    pub storage_table: String,
    /// Captured rows.
    pub rows: Vec<ProtectedRecord>,
}

/// Audit records of one partition captured by a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSnapshot {
    /// Captured partition.
    pub partition: AuditPartition,
    /// Captured audit records.
    pub records: Vec<AuditRecord>,
}

/// Point-in-time view of every protected table and audit partition.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSnapshot {
    /// Instant the snapshot is consistent at.
    pub snapshot_at: DateTime<Utc>,
    /// Lowest position a change missing from this snapshot can hold.
    pub change_cursor: ChangeCursor,
    /// One entry per registered table, even when empty.
    pub tables: Vec<TableSnapshot>,
    /// Captured audit partitions.
    pub partitions: Vec<PartitionSnapshot>,
}

/// Port for consistent reads of the protected dataset.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Reads every registered table and audit partition at one consistent point.
    ///
    /// With `since`, only rows and audit records committed at or above that
    /// cursor are returned, and only partitions holding such records are listed.
    /// Filtering follows commit order, never row or record timestamps.
    async fn capture_snapshot(
        &self,
        registry: &ProtectedResourceRegistry,
        since: Option<ChangeCursor>,
    ) -> AppResult<DatasetSnapshot>;
}

/// One named artifact of a backup run.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupArtifact {
    /// Owning backup run.
    pub backup_id: Uuid,
    /// Manifest name, e.g. `table:contacts`.
    pub name: String,
    /// Number of rows or records captured.
    pub item_count: usize,
    /// Serialized content.
    pub payload: Value,
}

/// Port for durable backup artifact storage.
#[async_trait]
pub trait BackupArtifactStore: Send + Sync {
    /// Writes one artifact, replacing a previous one with the same name.
    async fn write_artifact(&self, artifact: &BackupArtifact) -> AppResult<()>;

    /// Lists the names of every artifact written for a backup.
    async fn list_artifact_names(&self, backup_id: Uuid) -> AppResult<Vec<String>>;

    /// Removes every artifact written for a backup.
    async fn discard_artifacts(&self, backup_id: Uuid) -> AppResult<()>;
}

/// Repository port for backup run records.
#[async_trait]
pub trait BackupRepository: Send + Sync {
    /// Inserts or replaces a backup record.
    async fn save_backup(&self, record: &BackupRecord) -> AppResult<()>;

    /// Finds one backup record.
    async fn find_backup(&self, backup_id: Uuid) -> AppResult<Option<BackupRecord>>;

    /// Returns the completed backup with the latest snapshot.
    async fn latest_completed_backup(&self) -> AppResult<Option<BackupRecord>>;

    /// Lists backup records, newest first.
    async fn list_backups(&self, limit: usize) -> AppResult<Vec<BackupRecord>>;
}

/// Repository port for maintenance run records.
#[async_trait]
pub trait MaintenanceRepository: Send + Sync {
    /// Inserts or replaces a maintenance record.
    async fn save_maintenance_run(&self, record: &MaintenanceRecord) -> AppResult<()>;

    /// Lists maintenance records, newest first.
    async fn list_maintenance_runs(&self, limit: usize) -> AppResult<Vec<MaintenanceRecord>>;
}

/// Port executing storage maintenance commands.
///
/// Each method returns a short human-readable summary for the run record.
#[async_trait]
pub trait MaintenanceExecutor: Send + Sync {
    /// Refreshes planner statistics.
    async fn analyze(&self, tables: &[String]) -> AppResult<String>;

    /// Rebuilds indexes.
    async fn reindex(&self, tables: &[String]) -> AppResult<String>;

    /// Reclaims dead storage.
    async fn vacuum(&self, tables: &[String]) -> AppResult<String>;

    /// Recomputes derived reporting views.
    async fn refresh_derived_reports(&self) -> AppResult<String>;
}
