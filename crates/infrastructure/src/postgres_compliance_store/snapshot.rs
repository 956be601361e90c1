use async_trait::async_trait;
use bastion_application::{DatasetSnapshot, PartitionSnapshot, SnapshotSource, TableSnapshot};
use bastion_core::{AppError, AppResult};
use bastion_domain::{AuditRecord, ChangeCursor, ProtectedResourceRegistry};
use chrono::{DateTime, Utc};

use super::partitions::attached_partitions;
use super::{AUDIT_COLUMNS, AuditRow, PostgresComplianceStore, ProtectedRow, select_protected_sql};

#[async_trait]
impl SnapshotSource for PostgresComplianceStore {
    async fn capture_snapshot(
        &self,
        registry: &ProtectedResourceRegistry,
        since: Option<ChangeCursor>,
    ) -> AppResult<DatasetSnapshot> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin snapshot transaction: {error}"))
        })?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to set snapshot isolation: {error}"))
            })?;

        // The first statement fixes the snapshot. Every transaction id below its
        // xmin had finished by then, so later commits carry a change_xid >= xmin.
        let (snapshot_at, snapshot_xmin) = sqlx::query_as::<_, (DateTime<Utc>, i64)>(
            "SELECT now(), pg_snapshot_xmin(pg_current_snapshot())::TEXT::BIGINT",
        )
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to read snapshot point: {error}")))?;
        let change_cursor = ChangeCursor::new(snapshot_xmin)?;
        let since = since.map(|cursor| cursor.position());

        let mut tables = Vec::new();
        for resource in registry.iter() {
            let rows = sqlx::query_as::<_, ProtectedRow>(
                select_protected_sql(
                    resource,
                    "WHERE ($1::BIGINT IS NULL OR change_xid >= $1) ORDER BY id",
                )
                .as_str(),
            )
            .bind(since)
            .fetch_all(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to snapshot table '{}': {error}",
                    resource.storage_table()
                ))
            })?;

            tables.push(TableSnapshot {
                storage_table: resource.storage_table().to_owned(),
                rows: rows
                    .into_iter()
                    .map(|row| row.into_record(resource.resource_type()))
                    .collect(),
            });
        }

        let mut partitions = Vec::new();
        for partition in attached_partitions(&mut *transaction).await? {
            let statement = format!(
                r#"SELECT {AUDIT_COLUMNS} FROM "{}"
                WHERE ($1::BIGINT IS NULL OR change_xid >= $1)
                ORDER BY occurred_at, record_id"#,
                partition.table_name()
            );
            let rows = sqlx::query_as::<_, AuditRow>(statement.as_str())
                .bind(since)
                .fetch_all(&mut *transaction)
                .await
                .map_err(|error| {
                    AppError::Internal(format!(
                        "failed to snapshot audit partition '{}': {error}",
                        partition.table_name()
                    ))
                })?;

            if since.is_some() && rows.is_empty() {
                continue;
            }

            partitions.push(PartitionSnapshot {
                partition,
                records: rows
                    .into_iter()
                    .map(AuditRecord::try_from)
                    .collect::<AppResult<Vec<_>>>()?,
            });
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to close snapshot transaction: {error}"))
        })?;

        Ok(DatasetSnapshot {
            snapshot_at,
            change_cursor,
            tables,
            partitions,
        })
    }
}
