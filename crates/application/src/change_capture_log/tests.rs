use std::sync::Arc;

use async_trait::async_trait;
use bastion_core::{AppError, AppResult, RequestContext};
use bastion_domain::{AuditOperation, AuditPartition, AuditRecord, ChangeCapture, ResourceType};
use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;

use super::ChangeCaptureLog;
use crate::{AuditQuery, AuditRecordReader, AuditTransaction, PartitionCatalog, PartitionManager};

#[derive(Default)]
struct FakePartitionCatalog {
    partitions: Mutex<Vec<AuditPartition>>,
}

#[async_trait]
impl PartitionCatalog for FakePartitionCatalog {
    async fn list_partitions(&self) -> AppResult<Vec<AuditPartition>> {
        Ok(self.partitions.lock().await.clone())
    }

    async fn create_partition(&self, partition: AuditPartition) -> AppResult<()> {
        self.partitions.lock().await.push(partition);
        Ok(())
    }
}

#[derive(Default)]
struct FakeAuditReader {
    queries: Mutex<Vec<(Vec<AuditPartition>, AuditQuery)>>,
}

#[async_trait]
impl AuditRecordReader for FakeAuditReader {
    async fn list_records(
        &self,
        partitions: &[AuditPartition],
        query: &AuditQuery,
    ) -> AppResult<Vec<AuditRecord>> {
        self.queries
            .lock()
            .await
            .push((partitions.to_vec(), query.clone()));
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct FakeTransaction {
    appended: Vec<(AuditPartition, AuditRecord)>,
    fail: bool,
}

#[async_trait]
impl AuditTransaction for FakeTransaction {
    async fn append_audit_record(
        &mut self,
        partition: &AuditPartition,
        record: &AuditRecord,
    ) -> AppResult<()> {
        if self.fail {
            return Err(AppError::Internal("connection reset".to_owned()));
        }
        self.appended.push((*partition, record.clone()));
        Ok(())
    }
}

fn build_log() -> (ChangeCaptureLog, Arc<FakeAuditReader>) {
    let reader = Arc::new(FakeAuditReader::default());
    let manager = Arc::new(PartitionManager::new(Arc::new(
        FakePartitionCatalog::default(),
    )));
    (ChangeCaptureLog::new(manager, reader.clone()), reader)
}

fn create_capture() -> AppResult<ChangeCapture> {
    Ok(ChangeCapture {
        resource_type: ResourceType::new("contact")?,
        resource_id: "c1".to_owned(),
        operation: AuditOperation::Create,
        before: None,
        after: Some(json!({"name": "Ada"})),
        description: Some("created from import".to_owned()),
    })
}

#[tokio::test]
async fn record_appends_into_covering_partition() -> AppResult<()> {
    let (log, _) = build_log();
    let mut transaction = FakeTransaction::default();

    let record_id = log
        .record(
            &mut transaction,
            &RequestContext::for_actor("p1"),
            create_capture()?,
        )
        .await?;

    assert_eq!(transaction.appended.len(), 1);
    let (partition, record) = &transaction.appended[0];
    assert_eq!(record.record_id(), record_id);
    assert!(partition.contains(record.occurred_at()));
    assert_eq!(record.actor_id(), Some("p1"));
    Ok(())
}

#[tokio::test]
async fn append_failure_is_reported_as_capture_failure() -> AppResult<()> {
    let (log, _) = build_log();
    let mut transaction = FakeTransaction {
        fail: true,
        ..FakeTransaction::default()
    };

    let result = log
        .record(
            &mut transaction,
            &RequestContext::for_actor("p1"),
            create_capture()?,
        )
        .await;

    assert!(matches!(result, Err(AppError::AuditCaptureFailed(_))));
    Ok(())
}

#[tokio::test]
async fn malformed_capture_is_reported_as_capture_failure() -> AppResult<()> {
    let (log, _) = build_log();
    let mut transaction = FakeTransaction::default();
    let capture = ChangeCapture {
        before: Some(json!({"name": "Ada"})),
        ..create_capture()?
    };

    let result = log
        .record(&mut transaction, &RequestContext::for_actor("p1"), capture)
        .await;

    assert!(matches!(result, Err(AppError::AuditCaptureFailed(_))));
    assert!(transaction.appended.is_empty());
    Ok(())
}

#[tokio::test]
async fn query_without_partitions_skips_reader() -> AppResult<()> {
    let (log, reader) = build_log();
    let now = Utc::now();

    let records = log
        .query(AuditQuery::between(now - Duration::days(7), now))
        .await?;

    assert!(records.is_empty());
    assert!(reader.queries.lock().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn query_clamps_limit_and_passes_only_intersecting_partitions() -> AppResult<()> {
    let (log, reader) = build_log();
    let mut transaction = FakeTransaction::default();
    log.record(
        &mut transaction,
        &RequestContext::for_actor("p1"),
        create_capture()?,
    )
    .await?;

    let now = Utc::now();
    log.query(AuditQuery {
        limit: 10_000,
        ..AuditQuery::between(now - Duration::hours(1), now + Duration::hours(1))
    })
    .await?;
    log.activity_for_actor("p1", now - Duration::hours(1), now, 0)
        .await?;

    let queries = reader.queries.lock().await;
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].1.limit, 500);
    assert_eq!(queries[1].1.limit, 1);
    assert_eq!(queries[1].1.actor_id.as_deref(), Some("p1"));
    assert!(!queries[0].0.is_empty());
    Ok(())
}
