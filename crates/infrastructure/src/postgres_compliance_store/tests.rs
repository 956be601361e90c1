use bastion_application::{
    AuditQuery, AuditRecordReader, AuditTransaction, DatasetSnapshot, MutationStore,
    MutationTransaction, PartitionCatalog, SnapshotSource,
};
use bastion_core::{AppError, AppResult, RequestContext};
use bastion_domain::{
    AuditOperation, AuditPartition, AuditRecord, ChangeCapture, ProtectedRecord,
    ProtectedResourceRegistry, ResourceType, Role,
};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::PostgresComplianceStore;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres compliance store tests: {error}");
    }

    Some(pool)
}

async fn ensure_partition(
    store: &PostgresComplianceStore,
    partition: AuditPartition,
) -> AppResult<()> {
    match store.create_partition(partition).await {
        Ok(()) | Err(AppError::PartitionConflict(_)) => Ok(()),
        Err(error) => Err(error),
    }
}

fn contact(record_id: &str, owner: &str) -> AppResult<ProtectedRecord> {
    let now = Utc::now();
    Ok(ProtectedRecord {
        resource_type: ResourceType::new("contact")?,
        record_id: record_id.to_owned(),
        created_by: owner.to_owned(),
        data: json!({"name": "Ada Lovelace", "email": "ada@example.com"}),
        created_at: now,
        updated_at: now,
    })
}

fn creation_audit(record: &ProtectedRecord, actor: &str) -> AppResult<AuditRecord> {
    AuditRecord::capture(
        ChangeCapture {
            resource_type: record.resource_type.clone(),
            resource_id: record.record_id.clone(),
            operation: AuditOperation::Create,
            before: None,
            after: Some(record.audit_snapshot()),
            description: None,
        },
        &RequestContext::for_actor(actor),
        Utc::now(),
    )
}

#[tokio::test]
async fn creating_an_existing_partition_conflicts() -> AppResult<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };

    let store = PostgresComplianceStore::new(pool);
    let partition = AuditPartition::for_month(2091, 3)?;
    ensure_partition(&store, partition).await?;

    let second = store.create_partition(partition).await;
    assert!(matches!(second, Err(AppError::PartitionConflict(_))));
    assert!(store.list_partitions().await?.contains(&partition));
    Ok(())
}

#[tokio::test]
async fn committed_mutation_and_audit_record_are_visible() -> AppResult<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };

    let store = PostgresComplianceStore::new(pool);
    let registry = ProtectedResourceRegistry::standard()?;
    let resource = registry.require(&ResourceType::new("contact")?)?.clone();
    let partition = AuditPartition::for_timestamp(Utc::now())?;
    ensure_partition(&store, partition).await?;

    let record_id = format!("contact-{}", uuid::Uuid::new_v4());
    let actor = format!("rep-{}", uuid::Uuid::new_v4());
    let record = contact(record_id.as_str(), actor.as_str())?;
    let audit = creation_audit(&record, actor.as_str())?;

    let mut transaction = store.begin().await?;
    transaction.insert_record(&resource, &record).await?;
    transaction.append_audit_record(&partition, &audit).await?;
    transaction.save_principal_role(actor.as_str(), Role::SalesRep).await?;
    transaction.commit().await?;

    let stored = store.find_record(&resource, record_id.as_str()).await?;
    assert_eq!(stored.map(|value| value.created_by), Some(actor.clone()));
    assert_eq!(
        store.find_principal_role(actor.as_str()).await?,
        Some(Role::SalesRep)
    );

    let mut query = AuditQuery::between(Utc::now() - Duration::hours(1), Utc::now());
    query.actor_id = Some(actor.clone());
    let records = store.list_records(&[partition], &query).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records.first().map(AuditRecord::record_id), Some(audit.record_id()));
    Ok(())
}

#[tokio::test]
async fn rolled_back_mutation_leaves_no_trace() -> AppResult<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };

    let store = PostgresComplianceStore::new(pool);
    let registry = ProtectedResourceRegistry::standard()?;
    let resource = registry.require(&ResourceType::new("contact")?)?.clone();
    let partition = AuditPartition::for_timestamp(Utc::now())?;
    ensure_partition(&store, partition).await?;

    let record_id = format!("contact-{}", uuid::Uuid::new_v4());
    let actor = format!("rep-{}", uuid::Uuid::new_v4());
    let record = contact(record_id.as_str(), actor.as_str())?;

    let mut transaction = store.begin().await?;
    transaction.insert_record(&resource, &record).await?;
    transaction
        .append_audit_record(&partition, &creation_audit(&record, actor.as_str())?)
        .await?;
    transaction.rollback().await?;

    assert!(store.find_record(&resource, record_id.as_str()).await?.is_none());
    let mut query = AuditQuery::between(Utc::now() - Duration::hours(1), Utc::now());
    query.actor_id = Some(actor);
    assert!(store.list_records(&[partition], &query).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn append_outside_partition_range_is_rejected() -> AppResult<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };

    let store = PostgresComplianceStore::new(pool);
    let current = AuditPartition::for_timestamp(Utc::now())?;
    let distant = AuditPartition::for_month(2091, 3)?;
    ensure_partition(&store, current).await?;
    ensure_partition(&store, distant).await?;

    let record = contact("contact-misplaced", "rep-1")?;
    let mut transaction = store.begin().await?;
    let appended = transaction
        .append_audit_record(&distant, &creation_audit(&record, "rep-1")?)
        .await;
    transaction.rollback().await?;

    assert!(appended.is_err());
    Ok(())
}

#[tokio::test]
async fn snapshot_cursor_never_moves_backwards() -> AppResult<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };

    let store = PostgresComplianceStore::new(pool);
    let registry = ProtectedResourceRegistry::standard()?;
    let resource = registry.require(&ResourceType::new("contact")?)?.clone();

    let record_id = format!("contact-{}", uuid::Uuid::new_v4());
    let mut transaction = store.begin().await?;
    transaction
        .insert_record(&resource, &contact(record_id.as_str(), "rep-1")?)
        .await?;
    transaction.commit().await?;

    let full = store.capture_snapshot(&registry, None).await?;
    assert_eq!(full.tables.len(), registry.iter().count());
    let contains = |snapshot: &DatasetSnapshot| {
        snapshot
            .tables
            .iter()
            .flat_map(|table| table.rows.iter())
            .any(|row| row.record_id == record_id)
    };
    assert!(contains(&full));

    let later = store
        .capture_snapshot(&registry, Some(full.change_cursor))
        .await?;
    assert!(later.change_cursor >= full.change_cursor);
    assert_eq!(later.tables.len(), full.tables.len());
    Ok(())
}

#[tokio::test]
async fn change_committed_after_snapshot_lands_in_next_incremental() -> AppResult<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };

    let store = PostgresComplianceStore::new(pool);
    let registry = ProtectedResourceRegistry::standard()?;
    let resource = registry.require(&ResourceType::new("contact")?)?.clone();
    let june = AuditPartition::for_month(2025, 6)?;
    ensure_partition(&store, june).await?;

    let record_id = format!("contact-{}", uuid::Uuid::new_v4());
    let record = contact(record_id.as_str(), "rep-1")?;
    let late_audit = AuditRecord::capture(
        ChangeCapture {
            resource_type: record.resource_type.clone(),
            resource_id: record.record_id.clone(),
            operation: AuditOperation::Create,
            before: None,
            after: Some(record.audit_snapshot()),
            description: None,
        },
        &RequestContext::for_actor("rep-1"),
        june.range_end() - Duration::seconds(1),
    )?;

    let mut transaction = store.begin().await?;
    transaction.insert_record(&resource, &record).await?;
    transaction.append_audit_record(&june, &late_audit).await?;
    let full = store.capture_snapshot(&registry, None).await?;
    transaction.commit().await?;
    let incremental = store
        .capture_snapshot(&registry, Some(full.change_cursor))
        .await?;

    let has_row = |snapshot: &DatasetSnapshot| {
        snapshot
            .tables
            .iter()
            .flat_map(|table| table.rows.iter())
            .any(|row| row.record_id == record_id)
    };
    let has_audit = |snapshot: &DatasetSnapshot| {
        snapshot
            .partitions
            .iter()
            .filter(|captured| captured.partition == june)
            .flat_map(|captured| captured.records.iter())
            .any(|audit| audit.record_id() == late_audit.record_id())
    };
    assert!(!has_row(&full));
    assert!(!has_audit(&full));
    assert!(has_row(&incremental));
    assert!(has_audit(&incremental));
    Ok(())
}

#[tokio::test]
async fn role_read_waits_for_concurrent_role_change() -> AppResult<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };

    let store = PostgresComplianceStore::new(pool);
    let principal_id = format!("principal-{}", uuid::Uuid::new_v4());

    let mut first = store.begin().await?;
    assert_eq!(first.find_principal_role(principal_id.as_str()).await?, None);

    let contender = store.clone();
    let contended_id = principal_id.clone();
    let waiter = tokio::spawn(async move {
        let mut second = contender.begin().await?;
        let seen = second.find_principal_role(contended_id.as_str()).await?;
        second.rollback().await?;
        AppResult::Ok(seen)
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    first
        .save_principal_role(principal_id.as_str(), Role::Analyst)
        .await?;
    first.commit().await?;

    let seen = waiter
        .await
        .map_err(|error| AppError::Internal(format!("role reader panicked: {error}")))??;
    assert_eq!(seen, Some(Role::Analyst));
    Ok(())
}
