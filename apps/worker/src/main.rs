//! Bastion operations worker: backups, maintenance and key rotation jobs.

#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bastion_application::{
    BackupOrchestrator, CancellationSignal, EncryptionKeyRegistry, MaintenanceScheduler,
    PartitionManager,
};
use bastion_core::{AppError, AppResult};
use bastion_domain::{BackupRecord, MaintenanceRecord, ProtectedResourceRegistry, RunStatus};
use bastion_infrastructure::{
    AesDataKeyCipher, AesSecretEncryptor, DEFAULT_REPORT_VIEWS, FilesystemBackupArtifactStore,
    MIGRATOR, PostgresComplianceStore, PostgresEncryptionKeyRepository,
    PostgresMaintenanceExecutor, PostgresOperationsRepository,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const USAGE: &str = "usage: bastion-worker <migrate | backup-full | backup-incremental | \
     backup-verify <backup_id> | analyze | reindex | vacuum | partition-lookahead [months] | \
     refresh-reports | maintenance | create-key <key_name> | rotate-key <key_name>>";

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    database_max_connections: u32,
    master_key_hex: Option<String>,
    backup_artifact_dir: PathBuf,
    partition_lookahead_months: u32,
    job_max_attempts: u32,
    job_retry_delay_ms: u64,
    derived_report_views: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkerJob {
    Migrate,
    BackupFull,
    BackupIncremental,
    BackupVerify(Uuid),
    Analyze,
    Reindex,
    Vacuum,
    PartitionLookahead(Option<u32>),
    RefreshReports,
    Maintenance,
    CreateKey(String),
    RotateKey(String),
}

/// Result of one attempt that did not error out.
#[derive(Debug, Clone, PartialEq, Eq)]
enum JobOutcome {
    Succeeded(String),
    RunFailed(String),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let arguments: Vec<String> = env::args().skip(1).collect();
    let job = WorkerJob::parse(arguments.as_slice())?;
    let config = WorkerConfig::load()?;
    let pool = connect_pool(
        config.database_url.as_str(),
        config.database_max_connections,
    )
    .await?;

    let cancellation = CancellationSignal::new();
    spawn_shutdown_listener(cancellation.clone());

    info!(
        job = job.name(),
        max_attempts = config.job_max_attempts,
        "bastion-worker started"
    );

    let mut attempt = 1_u32;
    loop {
        let result = run_job(&job, &config, &pool, &cancellation).await;
        let retry = should_retry(&result, &cancellation, attempt, config.job_max_attempts);

        match &result {
            Ok(JobOutcome::Succeeded(summary)) => {
                info!(job = job.name(), attempt, summary = %summary, "job succeeded");
                return Ok(());
            }
            Ok(JobOutcome::RunFailed(reason)) => {
                warn!(job = job.name(), attempt, reason = %reason, retry, "job run failed");
            }
            Err(error) => {
                warn!(job = job.name(), attempt, error = %error, retry, "job errored");
            }
        }

        if !retry {
            error!(job = job.name(), attempts = attempt, "job gave up");
            return match result {
                Err(error) => Err(error),
                Ok(outcome) => Err(AppError::Internal(format!(
                    "job '{}' failed after {attempt} attempts: {outcome:?}",
                    job.name()
                ))),
            };
        }

        attempt = attempt.saturating_add(1);
        tokio::time::sleep(Duration::from_millis(config.job_retry_delay_ms)).await;
    }
}

fn should_retry(
    result: &AppResult<JobOutcome>,
    cancellation: &CancellationSignal,
    attempt: u32,
    max_attempts: u32,
) -> bool {
    if cancellation.is_cancelled() || attempt >= max_attempts {
        return false;
    }

    match result {
        Ok(JobOutcome::Succeeded(_)) => false,
        Ok(JobOutcome::RunFailed(_)) => true,
        Err(error) => error.is_retryable(),
    }
}

fn spawn_shutdown_listener(cancellation: CancellationSignal) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("shutdown requested, cancelling running job");
                cancellation.cancel();
            }
            Err(error) => {
                warn!(error = %error, "failed to listen for shutdown signal");
            }
        }
    });
}

async fn run_job(
    job: &WorkerJob,
    config: &WorkerConfig,
    pool: &PgPool,
    cancellation: &CancellationSignal,
) -> AppResult<JobOutcome> {
    match job {
        WorkerJob::Migrate => {
            MIGRATOR
                .run(pool)
                .await
                .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;
            Ok(JobOutcome::Succeeded("migrations applied".to_owned()))
        }
        WorkerJob::BackupFull => {
            let record = build_backup_orchestrator(config, pool)?
                .run_full(cancellation)
                .await?;
            Ok(backup_outcome(&record))
        }
        WorkerJob::BackupIncremental => {
            let record = build_backup_orchestrator(config, pool)?
                .run_incremental(cancellation)
                .await?;
            Ok(backup_outcome(&record))
        }
        WorkerJob::BackupVerify(backup_id) => {
            build_backup_orchestrator(config, pool)?
                .ensure_verified(*backup_id)
                .await?;
            Ok(JobOutcome::Succeeded(format!("backup '{backup_id}' verified")))
        }
        WorkerJob::Analyze => {
            let record = build_maintenance_scheduler(config, pool)?
                .run_analyze(cancellation)
                .await?;
            Ok(maintenance_outcome(&[record]))
        }
        WorkerJob::Reindex => {
            let record = build_maintenance_scheduler(config, pool)?
                .run_reindex(cancellation)
                .await?;
            Ok(maintenance_outcome(&[record]))
        }
        WorkerJob::Vacuum => {
            let record = build_maintenance_scheduler(config, pool)?
                .run_vacuum(cancellation)
                .await?;
            Ok(maintenance_outcome(&[record]))
        }
        WorkerJob::PartitionLookahead(months) => {
            let horizon = months.unwrap_or(config.partition_lookahead_months);
            let record = build_maintenance_scheduler(config, pool)?
                .run_partition_lookahead(horizon, cancellation)
                .await?;
            Ok(maintenance_outcome(&[record]))
        }
        WorkerJob::RefreshReports => {
            let record = build_maintenance_scheduler(config, pool)?
                .refresh_derived_reports(cancellation)
                .await?;
            Ok(maintenance_outcome(&[record]))
        }
        WorkerJob::Maintenance => {
            let records = build_maintenance_scheduler(config, pool)?
                .run_all(config.partition_lookahead_months, cancellation)
                .await?;
            Ok(maintenance_outcome(records.as_slice()))
        }
        WorkerJob::CreateKey(key_name) => {
            let created = build_key_registry(config, pool)?
                .create_key(key_name.as_str())
                .await?;
            Ok(JobOutcome::Succeeded(format!(
                "key '{}' created at version {}",
                created.key_name(),
                created.version()
            )))
        }
        WorkerJob::RotateKey(key_name) => {
            let rotated = build_key_registry(config, pool)?
                .rotate_key(key_name.as_str())
                .await?;
            Ok(JobOutcome::Succeeded(format!(
                "key '{}' now active at version {}",
                rotated.key_name(),
                rotated.version()
            )))
        }
    }
}

fn backup_outcome(record: &BackupRecord) -> JobOutcome {
    let summary = format!(
        "backup '{}' ({}) {} with {} artifacts",
        record.backup_id(),
        record.kind().as_str(),
        record.status().as_str(),
        record.manifest().len()
    );

    if record.status() == RunStatus::Completed {
        JobOutcome::Succeeded(summary)
    } else {
        JobOutcome::RunFailed(format!(
            "{summary}: {}",
            record.notes().unwrap_or("no details")
        ))
    }
}

fn maintenance_outcome(records: &[MaintenanceRecord]) -> JobOutcome {
    let summary = records
        .iter()
        .map(|record| {
            format!(
                "{} {}: {}",
                record.operation().as_str(),
                record.status().as_str(),
                record.details().unwrap_or("no details")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");

    if records
        .iter()
        .all(|record| record.status() == RunStatus::Completed)
    {
        JobOutcome::Succeeded(summary)
    } else {
        JobOutcome::RunFailed(summary)
    }
}

async fn connect_pool(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_backup_orchestrator(config: &WorkerConfig, pool: &PgPool) -> AppResult<BackupOrchestrator> {
    let store = Arc::new(PostgresComplianceStore::new(pool.clone()));

    Ok(BackupOrchestrator::new(
        ProtectedResourceRegistry::standard()?,
        store,
        Arc::new(FilesystemBackupArtifactStore::new(
            config.backup_artifact_dir.clone(),
        )),
        Arc::new(PostgresOperationsRepository::new(pool.clone())),
    ))
}

fn build_maintenance_scheduler(
    config: &WorkerConfig,
    pool: &PgPool,
) -> AppResult<MaintenanceScheduler> {
    let store = Arc::new(PostgresComplianceStore::new(pool.clone()));
    let executor =
        PostgresMaintenanceExecutor::new(pool.clone(), config.derived_report_views.clone())?;

    Ok(MaintenanceScheduler::new(
        ProtectedResourceRegistry::standard()?,
        Arc::new(executor),
        Arc::new(PostgresOperationsRepository::new(pool.clone())),
        Arc::new(PartitionManager::new(store)),
    ))
}

fn build_key_registry(config: &WorkerConfig, pool: &PgPool) -> AppResult<EncryptionKeyRegistry> {
    let master_key_hex = config.master_key_hex.as_deref().ok_or_else(|| {
        AppError::Validation("BASTION_MASTER_KEY is required for key jobs".to_owned())
    })?;

    Ok(EncryptionKeyRegistry::new(
        Arc::new(PostgresEncryptionKeyRepository::new(pool.clone())),
        Arc::new(AesSecretEncryptor::from_hex(master_key_hex)?),
        Arc::new(AesDataKeyCipher::new()),
    ))
}

impl WorkerJob {
    fn parse(arguments: &[String]) -> AppResult<Self> {
        let usage = || AppError::Validation(USAGE.to_owned());
        let (name, rest) = arguments.split_first().ok_or_else(usage)?;
        let argument = rest.first().map(String::as_str);

        let job = match (name.as_str(), argument) {
            ("migrate", None) => Self::Migrate,
            ("backup-full", None) => Self::BackupFull,
            ("backup-incremental", None) => Self::BackupIncremental,
            ("backup-verify", Some(value)) => {
                Self::BackupVerify(Uuid::parse_str(value).map_err(|error| {
                    AppError::Validation(format!("invalid backup id '{value}': {error}"))
                })?)
            }
            ("analyze", None) => Self::Analyze,
            ("reindex", None) => Self::Reindex,
            ("vacuum", None) => Self::Vacuum,
            ("partition-lookahead", months) => Self::PartitionLookahead(
                months
                    .map(|value| {
                        value.parse::<u32>().map_err(|error| {
                            AppError::Validation(format!(
                                "invalid lookahead months '{value}': {error}"
                            ))
                        })
                    })
                    .transpose()?,
            ),
            ("refresh-reports", None) => Self::RefreshReports,
            ("maintenance", None) => Self::Maintenance,
            ("create-key", Some(value)) => Self::CreateKey(value.to_owned()),
            ("rotate-key", Some(value)) => Self::RotateKey(value.to_owned()),
            _ => return Err(usage()),
        };

        if rest.len() > 1 {
            return Err(usage());
        }

        Ok(job)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Migrate => "migrate",
            Self::BackupFull => "backup-full",
            Self::BackupIncremental => "backup-incremental",
            Self::BackupVerify(_) => "backup-verify",
            Self::Analyze => "analyze",
            Self::Reindex => "reindex",
            Self::Vacuum => "vacuum",
            Self::PartitionLookahead(_) => "partition-lookahead",
            Self::RefreshReports => "refresh-reports",
            Self::Maintenance => "maintenance",
            Self::CreateKey(_) => "create-key",
            Self::RotateKey(_) => "rotate-key",
        }
    }
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let database_max_connections = parse_env_u32("DATABASE_MAX_CONNECTIONS", 5)?;
        let master_key_hex = env::var("BASTION_MASTER_KEY")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        let backup_artifact_dir = env::var("BACKUP_ARTIFACT_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| PathBuf::from("./backups"), PathBuf::from);
        let partition_lookahead_months = parse_env_u32("PARTITION_LOOKAHEAD_MONTHS", 2)?;
        let job_max_attempts = parse_env_u32("JOB_MAX_ATTEMPTS", 3)?;
        let job_retry_delay_ms = parse_env_u64("JOB_RETRY_DELAY_MS", 2000)?;
        let derived_report_views = env::var("DERIVED_REPORT_VIEWS")
            .map(|value| parse_view_list(value.as_str()))
            .unwrap_or_else(|_| DEFAULT_REPORT_VIEWS.map(str::to_owned).to_vec());

        if database_max_connections == 0 {
            return Err(AppError::Validation(
                "DATABASE_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        if job_max_attempts == 0 {
            return Err(AppError::Validation(
                "JOB_MAX_ATTEMPTS must be greater than zero".to_owned(),
            ));
        }

        if let Some(master_key_hex) = master_key_hex.as_deref() {
            AesSecretEncryptor::from_hex(master_key_hex)?;
        }

        Ok(Self {
            database_url,
            database_max_connections,
            master_key_hex,
            backup_artifact_dir,
            partition_lookahead_months,
            job_max_attempts,
            job_retry_delay_ms,
            derived_report_views,
        })
    }
}

fn parse_view_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|view| !view.is_empty())
        .map(str::to_owned)
        .collect()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
