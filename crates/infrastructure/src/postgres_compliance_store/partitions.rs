use async_trait::async_trait;
use bastion_application::PartitionCatalog;
use bastion_core::{AppError, AppResult};
use bastion_domain::{AUDIT_LOG_TABLE, AuditPartition};
use sqlx::PgExecutor;
use tracing::warn;

use super::{PostgresComplianceStore, is_database_error};

/// duplicate_table, invalid_object_definition (overlap) and a concurrent
/// catalog insert racing on the same relation name.
const PARTITION_CONFLICT_CODES: [&str; 3] = ["42P07", "42P17", "23505"];

pub(super) async fn attached_partitions<'e, E>(executor: E) -> AppResult<Vec<AuditPartition>>
where
    E: PgExecutor<'e>,
{
    let table_names = sqlx::query_scalar::<_, String>(
        r#"
        SELECT child.relname::TEXT
        FROM pg_inherits
        INNER JOIN pg_class parent ON parent.oid = pg_inherits.inhparent
        INNER JOIN pg_class child ON child.oid = pg_inherits.inhrelid
        WHERE parent.relname = $1
        ORDER BY child.relname
        "#,
    )
    .bind(AUDIT_LOG_TABLE)
    .fetch_all(executor)
    .await
    .map_err(|error| AppError::Internal(format!("failed to list audit partitions: {error}")))?;

    Ok(table_names
        .iter()
        .filter_map(|table_name| match AuditPartition::from_table_name(table_name) {
            Ok(partition) => Some(partition),
            Err(error) => {
                warn!(table_name = %table_name, error = %error, "ignoring unrecognised audit partition");
                None
            }
        })
        .collect())
}

#[async_trait]
impl PartitionCatalog for PostgresComplianceStore {
    async fn list_partitions(&self) -> AppResult<Vec<AuditPartition>> {
        attached_partitions(&self.pool).await
    }

    async fn create_partition(&self, partition: AuditPartition) -> AppResult<()> {
        let statement = format!(
            r#"CREATE TABLE "{}" PARTITION OF "{AUDIT_LOG_TABLE}"
            FOR VALUES FROM ('{}') TO ('{}')"#,
            partition.table_name(),
            partition.range_start().to_rfc3339(),
            partition.range_end().to_rfc3339()
        );

        sqlx::raw_sql(statement.as_str())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                if is_database_error(&error, &PARTITION_CONFLICT_CODES) {
                    return AppError::PartitionConflict(format!(
                        "partition '{}' overlaps an existing partition: {error}",
                        partition.table_name()
                    ));
                }
                AppError::Internal(format!(
                    "failed to create audit partition '{}': {error}",
                    partition.table_name()
                ))
            })?;

        Ok(())
    }
}
