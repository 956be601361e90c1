//! PostgreSQL maintenance statements.

use async_trait::async_trait;
use bastion_application::MaintenanceExecutor;
use bastion_core::{AppError, AppResult};
use bastion_domain::validate_identifier;
use sqlx::PgPool;
use tracing::debug;

/// Materialized views refreshed by default.
pub const DEFAULT_REPORT_VIEWS: [&str; 2] =
    ["report_record_counts", "report_daily_audit_activity"];

/// Runs ANALYZE, REINDEX, VACUUM and materialized view refreshes.
#[derive(Clone)]
pub struct PostgresMaintenanceExecutor {
    pool: PgPool,
    report_views: Vec<String>,
}

impl PostgresMaintenanceExecutor {
    /// Creates an executor refreshing the given materialized views.
    pub fn new(pool: PgPool, report_views: Vec<String>) -> AppResult<Self> {
        for view in &report_views {
            validate_identifier("report view", view)?;
        }

        Ok(Self { pool, report_views })
    }

    /// Creates an executor refreshing [`DEFAULT_REPORT_VIEWS`].
    #[must_use]
    pub fn with_default_views(pool: PgPool) -> Self {
        Self {
            pool,
            report_views: DEFAULT_REPORT_VIEWS.map(str::to_owned).to_vec(),
        }
    }

    async fn run_per_table(&self, verb: &str, tables: &[String]) -> AppResult<usize> {
        for table in tables {
            validate_identifier("table", table)?;
            let statement = format!(r#"{verb} "{table}""#);
            debug!(statement = %statement, "running maintenance statement");

            sqlx::raw_sql(statement.as_str())
                .execute(&self.pool)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to run {verb} on '{table}': {error}"))
                })?;
        }

        Ok(tables.len())
    }
}

#[async_trait]
impl MaintenanceExecutor for PostgresMaintenanceExecutor {
    async fn analyze(&self, tables: &[String]) -> AppResult<String> {
        let count = self.run_per_table("ANALYZE", tables).await?;
        Ok(format!("analyzed {count} tables"))
    }

    async fn reindex(&self, tables: &[String]) -> AppResult<String> {
        let count = self.run_per_table("REINDEX TABLE", tables).await?;
        Ok(format!("reindexed {count} tables"))
    }

    async fn vacuum(&self, tables: &[String]) -> AppResult<String> {
        let count = self.run_per_table("VACUUM (ANALYZE)", tables).await?;
        Ok(format!("vacuumed {count} tables"))
    }

    async fn refresh_derived_reports(&self) -> AppResult<String> {
        for view in &self.report_views {
            let statement = format!(r#"REFRESH MATERIALIZED VIEW CONCURRENTLY "{view}""#);
            sqlx::raw_sql(statement.as_str())
                .execute(&self.pool)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to refresh report view '{view}': {error}"))
                })?;
        }

        Ok(format!("refreshed {} report views", self.report_views.len()))
    }
}
