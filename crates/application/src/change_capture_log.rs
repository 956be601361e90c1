use std::sync::Arc;

use bastion_core::{AppError, AppResult, RequestContext};
use bastion_domain::{AuditRecord, AuditRecordId, ChangeCapture, ResourceType};
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::{AuditQuery, AuditRecordReader, AuditTransaction, PartitionManager};

#[cfg(test)]
mod tests;

/// Largest page a single audit query may return.
pub const MAX_AUDIT_QUERY_LIMIT: usize = 500;

/// Append-only audit log written inside the caller's transaction.
pub struct ChangeCaptureLog {
    partition_manager: Arc<PartitionManager>,
    reader: Arc<dyn AuditRecordReader>,
}

impl ChangeCaptureLog {
    /// Creates the log over a partition manager and a record reader.
    #[must_use]
    pub fn new(
        partition_manager: Arc<PartitionManager>,
        reader: Arc<dyn AuditRecordReader>,
    ) -> Self {
        Self {
            partition_manager,
            reader,
        }
    }

    /// Records one mutation inside the open transaction.
    ///
    /// Any failure is reported as `AppError::AuditCaptureFailed` so the caller
    /// aborts the surrounding mutation.
    pub async fn record<T>(
        &self,
        transaction: &mut T,
        context: &RequestContext,
        capture: ChangeCapture,
    ) -> AppResult<AuditRecordId>
    where
        T: AuditTransaction + ?Sized,
    {
        let resource_type = capture.resource_type.clone();
        let resource_id = capture.resource_id.clone();
        let capture_failed = |error: AppError| {
            error!(
                resource_type = %resource_type,
                resource_id = %resource_id,
                error = %error,
                "change capture failed"
            );
            AppError::AuditCaptureFailed(format!(
                "failed to capture change of '{resource_type}' '{resource_id}': {error}"
            ))
        };

        let record = AuditRecord::capture(capture, context, Utc::now()).map_err(capture_failed)?;
        let ensured = self
            .partition_manager
            .ensure_partition(record.occurred_at())
            .await
            .map_err(capture_failed)?;
        transaction
            .append_audit_record(&ensured.partition, &record)
            .await
            .map_err(capture_failed)?;

        info!(
            record_id = %record.record_id(),
            resource_type = %record.resource_type(),
            resource_id = %record.resource_id(),
            operation = record.operation().as_str(),
            "captured change"
        );
        Ok(record.record_id())
    }

    /// Runs a range-bounded query touching only intersecting partitions.
    pub async fn query(&self, mut query: AuditQuery) -> AppResult<Vec<AuditRecord>> {
        query.limit = query.limit.clamp(1, MAX_AUDIT_QUERY_LIMIT);
        let partitions = self
            .partition_manager
            .partitions_for_range(query.from, query.to)
            .await?;
        if partitions.is_empty() {
            return Ok(Vec::new());
        }

        self.reader.list_records(&partitions, &query).await
    }

    /// Lists the change history of one resource, newest first.
    pub async fn history_for_resource(
        &self,
        resource_type: &ResourceType,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<AuditRecord>> {
        self.query(AuditQuery {
            resource_type: Some(resource_type.clone()),
            resource_id: Some(resource_id.to_owned()),
            limit,
            ..AuditQuery::between(from, to)
        })
        .await
    }

    /// Lists the changes made by one actor, newest first.
    pub async fn activity_for_actor(
        &self,
        actor_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<AuditRecord>> {
        self.query(AuditQuery {
            actor_id: Some(actor_id.to_owned()),
            limit,
            ..AuditQuery::between(from, to)
        })
        .await
    }
}
