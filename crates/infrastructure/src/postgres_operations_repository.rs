//! PostgreSQL-backed backup and maintenance run records.

use std::str::FromStr;

use async_trait::async_trait;
use bastion_application::{BackupRepository, MaintenanceRepository};
use bastion_core::{AppError, AppResult};
use bastion_domain::{
    BackupKind, BackupRecord, ChangeCursor, MaintenanceOperation, MaintenanceRecord, RunStatus,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// PostgreSQL implementation of the backup and maintenance repository ports.
#[derive(Clone)]
pub struct PostgresOperationsRepository {
    pool: PgPool,
}

impl PostgresOperationsRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct BackupRow {
    backup_id: Uuid,
    kind: String,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    snapshot_at: Option<DateTime<Utc>>,
    change_cursor: Option<i64>,
    low_water_mark: Option<i64>,
    manifest: Vec<String>,
    notes: Option<String>,
}

impl TryFrom<BackupRow> for BackupRecord {
    type Error = AppError;

    fn try_from(row: BackupRow) -> Result<Self, Self::Error> {
        Ok(BackupRecord::restore(
            row.backup_id,
            BackupKind::from_str(row.kind.as_str())?,
            RunStatus::from_str(row.status.as_str())?,
            row.started_at,
            row.finished_at,
            row.snapshot_at,
            row.change_cursor.map(ChangeCursor::new).transpose()?,
            row.low_water_mark.map(ChangeCursor::new).transpose()?,
            row.manifest,
            row.notes,
        ))
    }
}

#[derive(Debug, FromRow)]
struct MaintenanceRow {
    run_id: Uuid,
    operation: String,
    status: String,
    occurred_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    details: Option<String>,
}

impl TryFrom<MaintenanceRow> for MaintenanceRecord {
    type Error = AppError;

    fn try_from(row: MaintenanceRow) -> Result<Self, Self::Error> {
        Ok(MaintenanceRecord::restore(
            row.run_id,
            MaintenanceOperation::from_str(row.operation.as_str())?,
            RunStatus::from_str(row.status.as_str())?,
            row.occurred_at,
            row.finished_at,
            row.details,
        ))
    }
}

const BACKUP_COLUMNS: &str = "backup_id, kind, status, started_at, finished_at, snapshot_at, \
     change_cursor, low_water_mark, manifest, notes";

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl BackupRepository for PostgresOperationsRepository {
    async fn save_backup(&self, record: &BackupRecord) -> AppResult<()> {
        // Terminal rows only accept a rewrite with the same status.
        let result = sqlx::query(
            r#"
            INSERT INTO backup_records (
                backup_id, kind, status, started_at, finished_at, snapshot_at,
                change_cursor, low_water_mark, manifest, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (backup_id) DO UPDATE SET
                status = EXCLUDED.status,
                finished_at = EXCLUDED.finished_at,
                snapshot_at = EXCLUDED.snapshot_at,
                change_cursor = EXCLUDED.change_cursor,
                manifest = EXCLUDED.manifest,
                notes = EXCLUDED.notes
            WHERE backup_records.status NOT IN ('completed', 'failed')
               OR backup_records.status = EXCLUDED.status
            "#,
        )
        .bind(record.backup_id())
        .bind(record.kind().as_str())
        .bind(record.status().as_str())
        .bind(record.started_at())
        .bind(record.finished_at())
        .bind(record.snapshot_at())
        .bind(record.change_cursor().map(|cursor| cursor.position()))
        .bind(record.low_water_mark().map(|cursor| cursor.position()))
        .bind(record.manifest().to_vec())
        .bind(record.notes())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to save backup '{}': {error}",
                record.backup_id()
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "backup '{}' already finished",
                record.backup_id()
            )));
        }

        Ok(())
    }

    async fn find_backup(&self, backup_id: Uuid) -> AppResult<Option<BackupRecord>> {
        let row = sqlx::query_as::<_, BackupRow>(
            format!("SELECT {BACKUP_COLUMNS} FROM backup_records WHERE backup_id = $1").as_str(),
        )
        .bind(backup_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find backup '{backup_id}': {error}"))
        })?;

        row.map(BackupRecord::try_from).transpose()
    }

    async fn latest_completed_backup(&self) -> AppResult<Option<BackupRecord>> {
        let row = sqlx::query_as::<_, BackupRow>(
            format!(
                "SELECT {BACKUP_COLUMNS} FROM backup_records
                WHERE status = 'completed'
                ORDER BY change_cursor DESC, snapshot_at DESC
                LIMIT 1"
            )
            .as_str(),
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find latest completed backup: {error}"))
        })?;

        row.map(BackupRecord::try_from).transpose()
    }

    async fn list_backups(&self, limit: usize) -> AppResult<Vec<BackupRecord>> {
        let rows = sqlx::query_as::<_, BackupRow>(
            format!(
                "SELECT {BACKUP_COLUMNS} FROM backup_records ORDER BY started_at DESC LIMIT $1"
            )
            .as_str(),
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list backups: {error}")))?;

        rows.into_iter().map(BackupRecord::try_from).collect()
    }
}

#[async_trait]
impl MaintenanceRepository for PostgresOperationsRepository {
    async fn save_maintenance_run(&self, record: &MaintenanceRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO maintenance_runs (
                run_id, operation, status, occurred_at, finished_at, details
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (run_id) DO UPDATE SET
                status = EXCLUDED.status,
                finished_at = EXCLUDED.finished_at,
                details = EXCLUDED.details
            WHERE maintenance_runs.status NOT IN ('completed', 'failed')
               OR maintenance_runs.status = EXCLUDED.status
            "#,
        )
        .bind(record.run_id())
        .bind(record.operation().as_str())
        .bind(record.status().as_str())
        .bind(record.occurred_at())
        .bind(record.finished_at())
        .bind(record.details())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to save maintenance run '{}': {error}",
                record.run_id()
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "maintenance run '{}' already finished",
                record.run_id()
            )));
        }

        Ok(())
    }

    async fn list_maintenance_runs(&self, limit: usize) -> AppResult<Vec<MaintenanceRecord>> {
        let rows = sqlx::query_as::<_, MaintenanceRow>(
            r#"
            SELECT run_id, operation, status, occurred_at, finished_at, details
            FROM maintenance_runs
            ORDER BY occurred_at DESC
            LIMIT $1
            "#,
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list maintenance runs: {error}"))
        })?;

        rows.into_iter().map(MaintenanceRecord::try_from).collect()
    }
}
