use bastion_application::{BackupRepository, MaintenanceRepository};
use bastion_core::{AppError, AppResult};
use bastion_domain::{
    BackupKind, BackupRecord, ChangeCursor, MaintenanceOperation, MaintenanceRecord, RunStatus,
};
use chrono::Utc;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::PostgresOperationsRepository;

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
        panic!("failed to run migrations for postgres operations tests: {error}");
    }

    Some(pool)
}

#[tokio::test]
async fn finished_backup_cannot_be_reopened() -> AppResult<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };

    let repository = PostgresOperationsRepository::new(pool);
    let mut record = BackupRecord::pending(BackupKind::Full, None, Utc::now());
    repository.save_backup(&record).await?;
    record.start()?;
    repository.save_backup(&record).await?;
    record.complete(
        Utc::now(),
        ChangeCursor::new(1_024)?,
        vec![
            "table:contacts".to_owned(),
            "partition:audit_records_y2025m06".to_owned(),
        ],
        Utc::now(),
    )?;
    repository.save_backup(&record).await?;

    let stored = repository.find_backup(record.backup_id()).await?;
    assert_eq!(stored.as_ref().map(BackupRecord::status), Some(RunStatus::Completed));
    assert_eq!(
        stored.as_ref().and_then(BackupRecord::change_cursor),
        Some(ChangeCursor::new(1_024)?)
    );
    assert_eq!(
        stored.map(|value| value.manifest().to_vec()).unwrap_or_default().len(),
        2
    );

    let reopened = BackupRecord::restore(
        record.backup_id(),
        BackupKind::Full,
        RunStatus::InProgress,
        record.started_at(),
        None,
        None,
        None,
        None,
        Vec::new(),
        None,
    );
    let result = repository.save_backup(&reopened).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
    Ok(())
}

#[tokio::test]
async fn maintenance_runs_are_listed_newest_first() -> AppResult<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };

    let repository = PostgresOperationsRepository::new(pool);
    let mut older = MaintenanceRecord::pending(
        MaintenanceOperation::Analyze,
        Utc::now() - chrono::Duration::minutes(5),
    );
    older.start()?;
    older.complete("analyzed 6 tables", Utc::now())?;
    repository.save_maintenance_run(&older).await?;

    let newer = MaintenanceRecord::pending(MaintenanceOperation::Vacuum, Utc::now());
    repository.save_maintenance_run(&newer).await?;

    let runs = repository.list_maintenance_runs(500).await?;
    let newer_position = runs.iter().position(|run| run.run_id() == newer.run_id());
    let older_position = runs.iter().position(|run| run.run_id() == older.run_id());
    assert!(newer_position.is_some());
    assert!(newer_position < older_position);
    Ok(())
}
