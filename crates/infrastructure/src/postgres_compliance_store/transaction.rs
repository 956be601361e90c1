use std::str::FromStr;

use async_trait::async_trait;
use bastion_application::{AuditTransaction, MutationTransaction};
use bastion_core::{AppError, AppResult};
use bastion_domain::{AuditPartition, AuditRecord, ProtectedRecord, ProtectedResource, Role};
use sqlx::{Postgres, Transaction};

use super::{AUDIT_COLUMNS, ProtectedRow, is_database_error, select_protected_sql};

const UNIQUE_VIOLATION: &str = "23505";

/// Unit of work over one database transaction.
pub(super) struct PostgresMutationTransaction {
    transaction: Transaction<'static, Postgres>,
}

impl PostgresMutationTransaction {
    pub(super) fn new(transaction: Transaction<'static, Postgres>) -> Self {
        Self { transaction }
    }
}

#[async_trait]
impl AuditTransaction for PostgresMutationTransaction {
    async fn append_audit_record(
        &mut self,
        partition: &AuditPartition,
        record: &AuditRecord,
    ) -> AppResult<()> {
        let statement = format!(
            r#"INSERT INTO "{}" ({AUDIT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
            partition.table_name()
        );

        sqlx::query(statement.as_str())
            .bind(record.record_id().as_uuid())
            .bind(record.resource_type().as_str())
            .bind(record.resource_id())
            .bind(record.operation().as_str())
            .bind(record.before_snapshot())
            .bind(record.after_snapshot())
            .bind(record.actor_id())
            .bind(record.occurred_at())
            .bind(record.origin_ip())
            .bind(record.origin_agent())
            .bind(record.description())
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to append audit record into '{}': {error}",
                    partition.table_name()
                ))
            })?;

        Ok(())
    }
}

#[async_trait]
impl MutationTransaction for PostgresMutationTransaction {
    async fn find_record(
        &mut self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<Option<ProtectedRecord>> {
        let row = sqlx::query_as::<_, ProtectedRow>(
            select_protected_sql(resource, "WHERE id = $1 FOR UPDATE").as_str(),
        )
        .bind(record_id)
        .fetch_optional(&mut *self.transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to lock {} '{record_id}': {error}",
                resource.resource_type()
            ))
        })?;

        Ok(row.map(|row| row.into_record(resource.resource_type())))
    }

    async fn insert_record(
        &mut self,
        resource: &ProtectedResource,
        record: &ProtectedRecord,
    ) -> AppResult<()> {
        let statement = format!(
            r#"INSERT INTO "{}" (id, created_by, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)"#,
            resource.storage_table()
        );

        sqlx::query(statement.as_str())
            .bind(record.record_id.as_str())
            .bind(record.created_by.as_str())
            .bind(&record.data)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| {
                if is_database_error(&error, &[UNIQUE_VIOLATION]) {
                    return AppError::Conflict(format!(
                        "{} '{}' already exists",
                        resource.resource_type(),
                        record.record_id
                    ));
                }
                AppError::Internal(format!(
                    "failed to insert {} '{}': {error}",
                    resource.resource_type(),
                    record.record_id
                ))
            })?;

        Ok(())
    }

    async fn update_record(
        &mut self,
        resource: &ProtectedResource,
        record: &ProtectedRecord,
    ) -> AppResult<()> {
        let statement = format!(
            r#"UPDATE "{}"
            SET data = $2, updated_at = $3, change_xid = pg_current_xact_id()::TEXT::BIGINT
            WHERE id = $1"#,
            resource.storage_table()
        );

        let result = sqlx::query(statement.as_str())
            .bind(record.record_id.as_str())
            .bind(&record.data)
            .bind(record.updated_at)
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to update {} '{}': {error}",
                    resource.resource_type(),
                    record.record_id
                ))
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "{} '{}' does not exist",
                resource.resource_type(),
                record.record_id
            )));
        }

        Ok(())
    }

    async fn delete_record(
        &mut self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<()> {
        let statement = format!(
            r#"DELETE FROM "{}" WHERE id = $1"#,
            resource.storage_table()
        );

        let result = sqlx::query(statement.as_str())
            .bind(record_id)
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to delete {} '{record_id}': {error}",
                    resource.resource_type()
                ))
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "{} '{record_id}' does not exist",
                resource.resource_type()
            )));
        }

        Ok(())
    }

    async fn find_principal_role(&mut self, principal_id: &str) -> AppResult<Option<Role>> {
        // The advisory lock also covers principals that have no row yet.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("principal:{principal_id}"))
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to lock principal '{principal_id}': {error}"
                ))
            })?;

        let role = sqlx::query_scalar::<_, String>(
            "SELECT role FROM principals WHERE principal_id = $1 FOR UPDATE",
        )
        .bind(principal_id)
        .fetch_optional(&mut *self.transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to read role of principal '{principal_id}': {error}"
            ))
        })?;

        role.as_deref().map(Role::from_str).transpose()
    }

    async fn save_principal_role(&mut self, principal_id: &str, role: Role) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO principals (principal_id, role, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (principal_id)
            DO UPDATE SET role = EXCLUDED.role, updated_at = now()
            "#,
        )
        .bind(principal_id)
        .bind(role.as_str())
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to save role of principal '{principal_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.transaction
            .commit()
            .await
            .map_err(|error| AppError::Internal(format!("failed to commit transaction: {error}")))
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.transaction.rollback().await.map_err(|error| {
            AppError::Internal(format!("failed to roll back transaction: {error}"))
        })
    }
}
