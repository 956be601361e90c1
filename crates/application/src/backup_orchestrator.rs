use std::collections::BTreeSet;
use std::sync::Arc;

use bastion_core::{AppError, AppResult};
use bastion_domain::{
    BackupKind, BackupRecord, ChangeCursor, ProtectedResourceRegistry, RunStatus,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    BackupArtifact, BackupArtifactStore, BackupRepository, CancellationSignal, DatasetSnapshot,
    SnapshotSource,
};


/// Manifest name of a protected table artifact.
#[must_use]
pub fn table_artifact_name(storage_table: &str) -> String {
    format!("table:{storage_table}")
}

/// Manifest name of an audit partition artifact.
#[must_use]
pub fn partition_artifact_name(partition_table: &str) -> String {
    format!("partition:{partition_table}")
}

/// Runs and verifies full and incremental backups.
pub struct BackupOrchestrator {
    registry: ProtectedResourceRegistry,
    snapshots: Arc<dyn SnapshotSource>,
    artifacts: Arc<dyn BackupArtifactStore>,
    repository: Arc<dyn BackupRepository>,
}

impl BackupOrchestrator {
    /// Creates an orchestrator over the protected dataset.
    #[must_use]
    pub fn new(
        registry: ProtectedResourceRegistry,
        snapshots: Arc<dyn SnapshotSource>,
        artifacts: Arc<dyn BackupArtifactStore>,
        repository: Arc<dyn BackupRepository>,
    ) -> Self {
        Self {
            registry,
            snapshots,
            artifacts,
            repository,
        }
    }

    /// Captures every protected table and audit partition.
    ///
    /// Operational failures are recorded on the returned `Failed` record;
    /// `Err` means the record itself could not be persisted.
    pub async fn run_full(&self, cancellation: &CancellationSignal) -> AppResult<BackupRecord> {
        let record = BackupRecord::pending(BackupKind::Full, None, Utc::now());
        self.execute(record, cancellation).await
    }

    /// Captures changes since the latest completed backup.
    ///
    /// Without a completed backup to build on, a full backup is taken instead.
    pub async fn run_incremental(
        &self,
        cancellation: &CancellationSignal,
    ) -> AppResult<BackupRecord> {
        let latest = self.repository.latest_completed_backup().await?;
        let Some(low_water_mark) = latest.and_then(|record| record.change_cursor()) else {
            let mut record = BackupRecord::pending(BackupKind::Full, None, Utc::now());
            record.append_note("incremental requested without a completed backup; ran full");
            info!("no completed backup found, incremental run degrades to full");
            return self.execute(record, cancellation).await;
        };

        let record =
            BackupRecord::pending(BackupKind::Incremental, Some(low_water_mark), Utc::now());
        self.execute(record, cancellation).await
    }

    /// Returns whether a completed backup has every artifact its manifest names.
    pub async fn verify(&self, backup_id: Uuid) -> AppResult<bool> {
        let record = self
            .repository
            .find_backup(backup_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("backup '{backup_id}' does not exist")))?;

        if record.status() != RunStatus::Completed {
            warn!(
                backup_id = %backup_id,
                status = record.status().as_str(),
                "backup is not complete and cannot verify"
            );
            return Ok(false);
        }

        let written: BTreeSet<String> = self
            .artifacts
            .list_artifact_names(backup_id)
            .await?
            .into_iter()
            .collect();
        let mut expected: BTreeSet<String> = record.manifest().iter().cloned().collect();
        expected.extend(
            self.registry
                .storage_tables()
                .iter()
                .map(|table| table_artifact_name(table)),
        );

        let missing: Vec<&String> = expected.difference(&written).collect();
        if missing.is_empty() {
            info!(backup_id = %backup_id, artifacts = expected.len(), "backup verified");
            return Ok(true);
        }

        error!(
            backup_id = %backup_id,
            missing = ?missing,
            "backup verification found missing artifacts"
        );
        Ok(false)
    }

    /// Fails with `AppError::BackupVerificationFailed` unless the backup verifies.
    pub async fn ensure_verified(&self, backup_id: Uuid) -> AppResult<()> {
        if self.verify(backup_id).await? {
            return Ok(());
        }

        Err(AppError::BackupVerificationFailed(format!(
            "backup '{backup_id}' is incomplete"
        )))
    }

    /// Lists backup records, newest first.
    pub async fn list_backups(&self, limit: usize) -> AppResult<Vec<BackupRecord>> {
        self.repository.list_backups(limit).await
    }

    async fn execute(
        &self,
        mut record: BackupRecord,
        cancellation: &CancellationSignal,
    ) -> AppResult<BackupRecord> {
        self.repository.save_backup(&record).await?;
        if let Err(error) = cancellation.check("backup") {
            record.fail(error.to_string(), Utc::now())?;
            self.repository.save_backup(&record).await?;
            return Ok(record);
        }

        record.start()?;
        self.repository.save_backup(&record).await?;
        info!(
            backup_id = %record.backup_id(),
            kind = record.kind().as_str(),
            "backup started"
        );

        let outcome = tokio::select! {
            outcome = self.write_artifacts(record.backup_id(), record.low_water_mark()) => outcome,
            () = cancellation.cancelled() => {
                Err(AppError::Cancelled("backup was cancelled".to_owned()))
            }
        };

        match outcome {
            Ok((snapshot_at, change_cursor, manifest)) => {
                record.complete(snapshot_at, change_cursor, manifest, Utc::now())?;
                info!(
                    backup_id = %record.backup_id(),
                    kind = record.kind().as_str(),
                    artifacts = record.manifest().len(),
                    "backup completed"
                );
            }
            Err(error) => {
                if let Err(discard_error) =
                    self.artifacts.discard_artifacts(record.backup_id()).await
                {
                    warn!(
                        backup_id = %record.backup_id(),
                        error = %discard_error,
                        "failed to discard partial backup artifacts"
                    );
                    record.append_note(format!("partial artifacts left behind: {discard_error}"));
                }
                warn!(
                    backup_id = %record.backup_id(),
                    error = %error,
                    "backup failed"
                );
                record.fail(error.to_string(), Utc::now())?;
            }
        }

        self.repository.save_backup(&record).await?;
        Ok(record)
    }

    async fn write_artifacts(
        &self,
        backup_id: Uuid,
        since: Option<ChangeCursor>,
    ) -> AppResult<(DateTime<Utc>, ChangeCursor, Vec<String>)> {
        let snapshot = self
            .snapshots
            .capture_snapshot(&self.registry, since)
            .await?;
        let manifest = self.write_snapshot(backup_id, &snapshot).await?;
        Ok((snapshot.snapshot_at, snapshot.change_cursor, manifest))
    }

    async fn write_snapshot(
        &self,
        backup_id: Uuid,
        snapshot: &DatasetSnapshot,
    ) -> AppResult<Vec<String>> {
        let mut manifest = Vec::with_capacity(snapshot.tables.len() + snapshot.partitions.len());

        for table in &snapshot.tables {
            let artifact = BackupArtifact {
                backup_id,
                name: table_artifact_name(table.storage_table.as_str()),
                item_count: table.rows.len(),
                payload: json!({
                    "storage_table": table.storage_table,
                    "snapshot_at": snapshot.snapshot_at,
                    "change_cursor": snapshot.change_cursor,
                    "rows": table.rows,
                }),
            };
            self.artifacts.write_artifact(&artifact).await?;
            manifest.push(artifact.name);
        }

        for partition in &snapshot.partitions {
            let artifact = BackupArtifact {
                backup_id,
                name: partition_artifact_name(partition.partition.table_name().as_str()),
                item_count: partition.records.len(),
                payload: json!({
                    "partition": partition.partition,
                    "snapshot_at": snapshot.snapshot_at,
                    "change_cursor": snapshot.change_cursor,
                    "records": partition.records,
                }),
            };
            self.artifacts.write_artifact(&artifact).await?;
            manifest.push(artifact.name);
        }

        Ok(manifest)
    }
}
