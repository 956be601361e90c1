use std::future::Future;
use std::sync::Arc;

use bastion_core::{AppError, AppResult};
use bastion_domain::{
    AUDIT_LOG_TABLE, MaintenanceOperation, MaintenanceRecord, ProtectedResourceRegistry,
};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::{CancellationSignal, MaintenanceExecutor, MaintenanceRepository, PartitionManager};


/// Runs routine storage upkeep and records every run.
pub struct MaintenanceScheduler {
    registry: ProtectedResourceRegistry,
    executor: Arc<dyn MaintenanceExecutor>,
    repository: Arc<dyn MaintenanceRepository>,
    partition_manager: Arc<PartitionManager>,
}

impl MaintenanceScheduler {
    /// Creates a scheduler over the protected dataset.
    #[must_use]
    pub fn new(
        registry: ProtectedResourceRegistry,
        executor: Arc<dyn MaintenanceExecutor>,
        repository: Arc<dyn MaintenanceRepository>,
        partition_manager: Arc<PartitionManager>,
    ) -> Self {
        Self {
            registry,
            executor,
            repository,
            partition_manager,
        }
    }

    /// Refreshes planner statistics on protected tables and the audit log.
    pub async fn run_analyze(
        &self,
        cancellation: &CancellationSignal,
    ) -> AppResult<MaintenanceRecord> {
        let tables = self.maintained_tables();
        self.run_operation(
            MaintenanceOperation::Analyze,
            cancellation,
            self.executor.analyze(tables.as_slice()),
        )
        .await
    }

    /// Rebuilds indexes on protected tables and the audit log.
    pub async fn run_reindex(
        &self,
        cancellation: &CancellationSignal,
    ) -> AppResult<MaintenanceRecord> {
        let tables = self.maintained_tables();
        self.run_operation(
            MaintenanceOperation::Reindex,
            cancellation,
            self.executor.reindex(tables.as_slice()),
        )
        .await
    }

    /// Reclaims dead storage on protected tables and the audit log.
    pub async fn run_vacuum(
        &self,
        cancellation: &CancellationSignal,
    ) -> AppResult<MaintenanceRecord> {
        let tables = self.maintained_tables();
        self.run_operation(
            MaintenanceOperation::Vacuum,
            cancellation,
            self.executor.vacuum(tables.as_slice()),
        )
        .await
    }

    /// Ensures audit partitions exist through `horizon_months` ahead.
    pub async fn run_partition_lookahead(
        &self,
        horizon_months: u32,
        cancellation: &CancellationSignal,
    ) -> AppResult<MaintenanceRecord> {
        self.run_operation(
            MaintenanceOperation::PartitionLookahead,
            cancellation,
            self.ensure_lookahead(horizon_months),
        )
        .await
    }

    /// Recomputes derived reporting views.
    pub async fn refresh_derived_reports(
        &self,
        cancellation: &CancellationSignal,
    ) -> AppResult<MaintenanceRecord> {
        self.run_operation(
            MaintenanceOperation::RefreshDerivedReports,
            cancellation,
            self.executor.refresh_derived_reports(),
        )
        .await
    }

    /// Runs every operation in order, stopping early once cancelled.
    ///
    /// The order is statistics, index maintenance, space reclamation,
    /// partition lookahead, then derived reports. A run whose record cannot
    /// be persisted is logged and skipped; the rest still run.
    pub async fn run_all(
        &self,
        horizon_months: u32,
        cancellation: &CancellationSignal,
    ) -> AppResult<Vec<MaintenanceRecord>> {
        let sequence = [
            MaintenanceOperation::Analyze,
            MaintenanceOperation::Reindex,
            MaintenanceOperation::Vacuum,
            MaintenanceOperation::PartitionLookahead,
            MaintenanceOperation::RefreshDerivedReports,
        ];
        let mut records = Vec::with_capacity(sequence.len());
        for operation in sequence {
            let outcome = match operation {
                MaintenanceOperation::Analyze => self.run_analyze(cancellation).await,
                MaintenanceOperation::Reindex => self.run_reindex(cancellation).await,
                MaintenanceOperation::Vacuum => self.run_vacuum(cancellation).await,
                MaintenanceOperation::PartitionLookahead => {
                    self.run_partition_lookahead(horizon_months, cancellation)
                        .await
                }
                MaintenanceOperation::RefreshDerivedReports => {
                    self.refresh_derived_reports(cancellation).await
                }
            };

            match outcome {
                Ok(record) => records.push(record),
                Err(error) => error!(
                    operation = operation.as_str(),
                    error = %error,
                    "maintenance run could not be recorded"
                ),
            }

            if cancellation.is_cancelled() {
                warn!(
                    completed = records.len(),
                    "maintenance sequence stopped after cancellation"
                );
                break;
            }
        }

        Ok(records)
    }

    /// Lists recorded runs, newest first.
    pub async fn list_runs(&self, limit: usize) -> AppResult<Vec<MaintenanceRecord>> {
        self.repository.list_maintenance_runs(limit).await
    }

    fn maintained_tables(&self) -> Vec<String> {
        let mut tables = self.registry.storage_tables();
        tables.push(AUDIT_LOG_TABLE.to_owned());
        tables
    }

    async fn ensure_lookahead(&self, horizon_months: u32) -> AppResult<String> {
        let ensured = self
            .partition_manager
            .ensure_lookahead(horizon_months)
            .await?;
        let created: Vec<String> = ensured
            .iter()
            .filter(|value| value.created)
            .map(|value| value.partition.table_name())
            .collect();

        if created.is_empty() {
            return Ok(format!("{} partitions already present", ensured.len()));
        }
        Ok(format!(
            "{} partitions ensured, created {}",
            ensured.len(),
            created.join(", ")
        ))
    }

    async fn run_operation<F>(
        &self,
        operation: MaintenanceOperation,
        cancellation: &CancellationSignal,
        job: F,
    ) -> AppResult<MaintenanceRecord>
    where
        F: Future<Output = AppResult<String>> + Send,
    {
        let mut record = MaintenanceRecord::pending(operation, Utc::now());
        self.repository.save_maintenance_run(&record).await?;
        if let Err(error) = cancellation.check(operation.as_str()) {
            record.fail(error.to_string(), Utc::now())?;
            self.repository.save_maintenance_run(&record).await?;
            return Ok(record);
        }

        record.start()?;
        self.repository.save_maintenance_run(&record).await?;

        let outcome = tokio::select! {
            outcome = job => outcome,
            () = cancellation.cancelled() => Err(AppError::Cancelled(format!(
                "{} was cancelled",
                operation.as_str()
            ))),
        };

        match outcome {
            Ok(details) => {
                info!(
                    run_id = %record.run_id(),
                    operation = operation.as_str(),
                    details = %details,
                    "maintenance completed"
                );
                record.complete(details, Utc::now())?;
            }
            Err(error) => {
                warn!(
                    run_id = %record.run_id(),
                    operation = operation.as_str(),
                    error = %error,
                    "maintenance failed"
                );
                record.fail(error.to_string(), Utc::now())?;
            }
        }

        self.repository.save_maintenance_run(&record).await?;
        Ok(record)
    }
}
