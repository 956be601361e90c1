use std::collections::HashMap;

use async_trait::async_trait;
use bastion_application::{BackupRepository, MaintenanceRepository};
use bastion_core::{AppError, AppResult};
use bastion_domain::{BackupRecord, MaintenanceRecord, RunStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory store for backup and maintenance run records.
#[derive(Debug, Default)]
pub struct InMemoryOperationsRepository {
    backups: RwLock<HashMap<Uuid, BackupRecord>>,
    maintenance_runs: RwLock<HashMap<Uuid, MaintenanceRecord>>,
}

impl InMemoryOperationsRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn ensure_not_reopened(id: Uuid, stored: RunStatus, incoming: RunStatus) -> AppResult<()> {
    if stored.is_terminal() && stored != incoming {
        return Err(AppError::Conflict(format!(
            "run '{id}' already finished as '{}'",
            stored.as_str()
        )));
    }
    Ok(())
}

#[async_trait]
impl BackupRepository for InMemoryOperationsRepository {
    async fn save_backup(&self, record: &BackupRecord) -> AppResult<()> {
        let mut backups = self.backups.write().await;
        if let Some(stored) = backups.get(&record.backup_id()) {
            ensure_not_reopened(record.backup_id(), stored.status(), record.status())?;
        }

        backups.insert(record.backup_id(), record.clone());
        Ok(())
    }

    async fn find_backup(&self, backup_id: Uuid) -> AppResult<Option<BackupRecord>> {
        Ok(self.backups.read().await.get(&backup_id).cloned())
    }

    async fn latest_completed_backup(&self) -> AppResult<Option<BackupRecord>> {
        Ok(self
            .backups
            .read()
            .await
            .values()
            .filter(|record| record.status() == RunStatus::Completed)
            .max_by_key(|record| (record.change_cursor(), record.snapshot_at()))
            .cloned())
    }

    async fn list_backups(&self, limit: usize) -> AppResult<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = self.backups.read().await.values().cloned().collect();
        records.sort_by_key(|record| std::cmp::Reverse(record.started_at()));
        records.truncate(limit);
        Ok(records)
    }
}

#[async_trait]
impl MaintenanceRepository for InMemoryOperationsRepository {
    async fn save_maintenance_run(&self, record: &MaintenanceRecord) -> AppResult<()> {
        let mut runs = self.maintenance_runs.write().await;
        if let Some(stored) = runs.get(&record.run_id()) {
            ensure_not_reopened(record.run_id(), stored.status(), record.status())?;
        }

        runs.insert(record.run_id(), record.clone());
        Ok(())
    }

    async fn list_maintenance_runs(&self, limit: usize) -> AppResult<Vec<MaintenanceRecord>> {
        let mut records: Vec<MaintenanceRecord> = self
            .maintenance_runs
            .read()
            .await
            .values()
            .cloned()
            .collect();
        records.sort_by_key(|record| std::cmp::Reverse(record.occurred_at()));
        records.truncate(limit);
        Ok(records)
    }
}
