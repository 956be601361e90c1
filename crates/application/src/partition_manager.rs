use std::collections::BTreeSet;
use std::sync::Arc;

use bastion_core::{AppError, AppResult};
use bastion_domain::AuditPartition;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::PartitionCatalog;


/// Outcome of ensuring one partition exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsuredPartition {
    /// Partition covering the requested instant.
    pub partition: AuditPartition,
    /// Whether this call created it.
    pub created: bool,
}

/// Keeps the audit log partitioned by calendar month.
pub struct PartitionManager {
    catalog: Arc<dyn PartitionCatalog>,
    known: RwLock<BTreeSet<AuditPartition>>,
}

impl PartitionManager {
    /// Creates a manager over a partition catalog.
    #[must_use]
    pub fn new(catalog: Arc<dyn PartitionCatalog>) -> Self {
        Self {
            catalog,
            known: RwLock::new(BTreeSet::new()),
        }
    }

    /// Ensures the partition covering `at` exists.
    ///
    /// Safe to call concurrently from several processes: losing a creation
    /// race to an identical partition counts as success.
    pub async fn ensure_partition(&self, at: DateTime<Utc>) -> AppResult<EnsuredPartition> {
        let target = AuditPartition::for_timestamp(at)?;
        if self.known.read().await.contains(&target) {
            return Ok(EnsuredPartition {
                partition: target,
                created: false,
            });
        }

        if self.refresh().await?.contains(&target) {
            return Ok(EnsuredPartition {
                partition: target,
                created: false,
            });
        }

        match self.catalog.create_partition(target).await {
            Ok(()) => {
                self.known.write().await.insert(target);
                info!(partition = %target.table_name(), "created audit partition");
                Ok(EnsuredPartition {
                    partition: target,
                    created: true,
                })
            }
            Err(AppError::PartitionConflict(detail)) => {
                let known = self.refresh().await?;
                if known.contains(&target) {
                    debug!(
                        partition = %target.table_name(),
                        "audit partition was created concurrently"
                    );
                    return Ok(EnsuredPartition {
                        partition: target,
                        created: false,
                    });
                }

                Err(AppError::PartitionConflict(format!(
                    "partition '{}' overlaps an existing partition with different bounds: {detail}",
                    target.table_name()
                )))
            }
            Err(error) => Err(error),
        }
    }

    /// Ensures partitions exist from the current month through `horizon_months` ahead.
    pub async fn ensure_lookahead(&self, horizon_months: u32) -> AppResult<Vec<EnsuredPartition>> {
        self.ensure_lookahead_from(Utc::now(), horizon_months).await
    }

    /// Ensures partitions exist from the month of `now` through `horizon_months` ahead.
    pub async fn ensure_lookahead_from(
        &self,
        now: DateTime<Utc>,
        horizon_months: u32,
    ) -> AppResult<Vec<EnsuredPartition>> {
        let mut partition = AuditPartition::for_timestamp(now)?;
        let mut ensured = Vec::with_capacity(horizon_months as usize + 1);
        for step in 0..=horizon_months {
            if step > 0 {
                partition = partition.next()?;
            }
            ensured.push(self.ensure_partition(partition.range_start()).await?);
        }

        Ok(ensured)
    }

    /// Returns the existing partitions intersecting the inclusive range, oldest first.
    pub async fn partitions_for_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<AuditPartition>> {
        if from > to {
            return Err(AppError::Validation(format!(
                "audit range start {from} is after its end {to}"
            )));
        }

        Ok(self
            .refresh()
            .await?
            .into_iter()
            .filter(|partition| partition.intersects(from, to))
            .collect())
    }

    /// Lists every existing partition, oldest first.
    pub async fn list_partitions(&self) -> AppResult<Vec<AuditPartition>> {
        Ok(self.refresh().await?.into_iter().collect())
    }

    async fn refresh(&self) -> AppResult<BTreeSet<AuditPartition>> {
        let listed: BTreeSet<AuditPartition> =
            self.catalog.list_partitions().await?.into_iter().collect();
        let mut known = self.known.write().await;
        known.clone_from(&listed);
        Ok(listed)
    }
}
