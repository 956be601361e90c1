//! PostgreSQL-backed compliance store.

use std::str::FromStr;

use async_trait::async_trait;
use bastion_application::{MutationStore, MutationTransaction};
use bastion_core::{AppError, AppResult};
use bastion_domain::{
    AuditOperation, AuditRecord, AuditRecordId, ProtectedRecord, ProtectedResource, ResourceType,
    Role,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

mod audit;
mod partitions;
mod snapshot;
mod transaction;

#[cfg(test)]
mod tests;

use transaction::PostgresMutationTransaction;

/// PostgreSQL-backed store for protected resources and the partitioned audit log.
#[derive(Clone)]
pub struct PostgresComplianceStore {
    pool: PgPool,
}

impl PostgresComplianceStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ProtectedRow {
    id: String,
    created_by: String,
    data: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProtectedRow {
    fn into_record(self, resource_type: &ResourceType) -> ProtectedRecord {
        ProtectedRecord {
            resource_type: resource_type.clone(),
            record_id: self.id,
            created_by: self.created_by,
            data: self.data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    record_id: uuid::Uuid,
    resource_type: String,
    resource_id: String,
    operation: String,
    before_snapshot: Option<Value>,
    after_snapshot: Option<Value>,
    actor_id: Option<String>,
    occurred_at: DateTime<Utc>,
    origin_ip: Option<String>,
    origin_agent: Option<String>,
    description: Option<String>,
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = AppError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        AuditRecord::restore(
            AuditRecordId::from_uuid(row.record_id),
            ResourceType::new(row.resource_type)?,
            row.resource_id,
            AuditOperation::from_str(row.operation.as_str())?,
            row.before_snapshot,
            row.after_snapshot,
            row.actor_id,
            row.occurred_at,
            row.origin_ip,
            row.origin_agent,
            row.description,
        )
    }
}

const AUDIT_COLUMNS: &str = "record_id, resource_type, resource_id, operation, before_snapshot, \
     after_snapshot, actor_id, occurred_at, origin_ip, origin_agent, description";

fn select_protected_sql(resource: &ProtectedResource, suffix: &str) -> String {
    format!(
        r#"SELECT id, created_by, data, created_at, updated_at FROM "{}" {suffix}"#,
        resource.storage_table()
    )
}

fn is_database_error(error: &sqlx::Error, codes: &[&str]) -> bool {
    match error {
        sqlx::Error::Database(database_error) => database_error
            .code()
            .is_some_and(|code| codes.iter().any(|expected| *expected == code)),
        _ => false,
    }
}

#[async_trait]
impl MutationStore for PostgresComplianceStore {
    async fn begin(&self) -> AppResult<Box<dyn MutationTransaction>> {
        let transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;
        Ok(Box::new(PostgresMutationTransaction::new(transaction)))
    }

    async fn find_record(
        &self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<Option<ProtectedRecord>> {
        let row = sqlx::query_as::<_, ProtectedRow>(
            select_protected_sql(resource, "WHERE id = $1").as_str(),
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to find {} '{record_id}': {error}",
                resource.resource_type()
            ))
        })?;

        Ok(row.map(|row| row.into_record(resource.resource_type())))
    }

    async fn find_principal_role(&self, principal_id: &str) -> AppResult<Option<Role>> {
        let role = sqlx::query_scalar::<_, String>(
            r#"
            SELECT role
            FROM principals
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to find role of principal '{principal_id}': {error}"
            ))
        })?;

        role.as_deref().map(Role::from_str).transpose()
    }
}
