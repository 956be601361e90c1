use async_trait::async_trait;
use bastion_application::{AuditQuery, AuditRecordReader};
use bastion_core::{AppError, AppResult};
use bastion_domain::{AuditPartition, AuditRecord};

use super::{AUDIT_COLUMNS, AuditRow, PostgresComplianceStore};

fn list_records_sql(partitions: &[AuditPartition]) -> String {
    let branches: Vec<String> = partitions
        .iter()
        .map(|partition| {
            format!(
                r#"SELECT {AUDIT_COLUMNS} FROM "{}"
                WHERE occurred_at >= $1 AND occurred_at <= $2
                  AND ($3::TEXT IS NULL OR resource_type = $3)
                  AND ($4::TEXT IS NULL OR resource_id = $4)
                  AND ($5::TEXT IS NULL OR actor_id = $5)
                  AND ($6::TEXT IS NULL OR operation = $6)"#,
                partition.table_name()
            )
        })
        .collect();

    format!(
        "SELECT * FROM ({}) AS selected
        ORDER BY occurred_at DESC, record_id DESC
        LIMIT $7 OFFSET $8",
        branches.join("\nUNION ALL\n")
    )
}

fn as_sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl AuditRecordReader for PostgresComplianceStore {
    async fn list_records(
        &self,
        partitions: &[AuditPartition],
        query: &AuditQuery,
    ) -> AppResult<Vec<AuditRecord>> {
        if partitions.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, AuditRow>(list_records_sql(partitions).as_str())
            .bind(query.from)
            .bind(query.to)
            .bind(query.resource_type.as_ref().map(|value| value.as_str()))
            .bind(query.resource_id.as_deref())
            .bind(query.actor_id.as_deref())
            .bind(query.operation.map(|value| value.as_str()))
            .bind(as_sql_count(query.limit))
            .bind(as_sql_count(query.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to list audit records: {error}"))
            })?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }
}
