use std::str::FromStr;

use bastion_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle shared by backup and maintenance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is recorded but has not started.
    Pending,
    /// Run is executing.
    InProgress,
    /// Run finished successfully.
    Completed,
    /// Run failed or was cancelled.
    Failed,
}

impl RunStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns whether the status can never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Validates a lifecycle transition and returns the new status.
    pub fn transition_to(self, next: Self) -> AppResult<Self> {
        let allowed = matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        );

        if !allowed {
            return Err(AppError::Conflict(format!(
                "run status cannot move from '{}' to '{}'",
                self.as_str(),
                next.as_str()
            )));
        }

        Ok(next)
    }
}

impl FromStr for RunStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!("unknown run status '{value}'"))),
        }
    }
}

/// Backup scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Every protected table and audit partition.
    Full,
    /// Changes since the last completed backup.
    Incremental,
}

impl BackupKind {
    /// Returns a stable storage value for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl FromStr for BackupKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            _ => Err(AppError::Validation(format!("unknown backup kind '{value}'"))),
        }
    }
}

/// Commit-ordered position in the protected dataset.
///
/// Every change committed after a snapshot was taken sits at or above the
/// cursor that snapshot reports, whatever timestamp the change carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeCursor(i64);

impl ChangeCursor {
    /// Wraps a stored position.
    pub fn new(position: i64) -> AppResult<Self> {
        if position < 0 {
            return Err(AppError::Validation(format!(
                "change cursor {position} must not be negative"
            )));
        }

        Ok(Self(position))
    }

    /// Returns the raw position.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.0
    }
}

/// One backup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    backup_id: Uuid,
    kind: BackupKind,
    status: RunStatus,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    snapshot_at: Option<DateTime<Utc>>,
    change_cursor: Option<ChangeCursor>,
    low_water_mark: Option<ChangeCursor>,
    manifest: Vec<String>,
    notes: Option<String>,
}

impl BackupRecord {
    /// Creates a pending run.
    #[must_use]
    pub fn pending(
        kind: BackupKind,
        low_water_mark: Option<ChangeCursor>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            backup_id: Uuid::new_v4(),
            kind,
            status: RunStatus::Pending,
            started_at,
            finished_at: None,
            snapshot_at: None,
            change_cursor: None,
            low_water_mark,
            manifest: Vec::new(),
            notes: None,
        }
    }

    /// Rehydrates a persisted run.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn restore(
        backup_id: Uuid,
        kind: BackupKind,
        status: RunStatus,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        snapshot_at: Option<DateTime<Utc>>,
        change_cursor: Option<ChangeCursor>,
        low_water_mark: Option<ChangeCursor>,
        manifest: Vec<String>,
        notes: Option<String>,
    ) -> Self {
        Self {
            backup_id,
            kind,
            status,
            started_at,
            finished_at,
            snapshot_at,
            change_cursor,
            low_water_mark,
            manifest,
            notes,
        }
    }

    /// Moves the run to in progress.
    pub fn start(&mut self) -> AppResult<()> {
        self.status = self.status.transition_to(RunStatus::InProgress)?;
        Ok(())
    }

    /// Marks the run completed with its snapshot point and artifact manifest.
    pub fn complete(
        &mut self,
        snapshot_at: DateTime<Utc>,
        change_cursor: ChangeCursor,
        manifest: Vec<String>,
        finished_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.status = self.status.transition_to(RunStatus::Completed)?;
        self.snapshot_at = Some(snapshot_at);
        self.change_cursor = Some(change_cursor);
        self.manifest = manifest;
        self.finished_at = Some(finished_at);
        Ok(())
    }

    /// Marks the run failed with a reason.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        finished_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.status = self.status.transition_to(RunStatus::Failed)?;
        self.append_note(reason);
        self.finished_at = Some(finished_at);
        Ok(())
    }

    /// Appends an operator-facing note.
    pub fn append_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        self.notes = Some(match self.notes.take() {
            Some(existing) => format!("{existing}; {note}"),
            None => note,
        });
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn backup_id(&self) -> Uuid {
        self.backup_id
    }

    /// Returns the backup scope.
    #[must_use]
    pub fn kind(&self) -> BackupKind {
        self.kind
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns when the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns when the run reached a terminal status.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Returns the consistent snapshot point of a completed run.
    #[must_use]
    pub fn snapshot_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot_at
    }

    /// Returns the cursor the next incremental run starts from.
    #[must_use]
    pub fn change_cursor(&self) -> Option<ChangeCursor> {
        self.change_cursor
    }

    /// Returns the cursor an incremental run started from.
    #[must_use]
    pub fn low_water_mark(&self) -> Option<ChangeCursor> {
        self.low_water_mark
    }

    /// Returns the artifact names a completed run must have produced.
    #[must_use]
    pub fn manifest(&self) -> &[String] {
        self.manifest.as_slice()
    }

    /// Returns operator notes.
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}

/// Maintenance operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOperation {
    /// Planner statistics refresh.
    Analyze,
    /// Index rebuild.
    Reindex,
    /// Dead tuple space reclamation.
    Vacuum,
    /// Audit partition lookahead creation.
    PartitionLookahead,
    /// Derived report refresh.
    RefreshDerivedReports,
}

impl MaintenanceOperation {
    /// Returns a stable storage value for this operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Reindex => "reindex",
            Self::Vacuum => "vacuum",
            Self::PartitionLookahead => "partition_lookahead",
            Self::RefreshDerivedReports => "refresh_derived_reports",
        }
    }
}

impl FromStr for MaintenanceOperation {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "analyze" => Ok(Self::Analyze),
            "reindex" => Ok(Self::Reindex),
            "vacuum" => Ok(Self::Vacuum),
            "partition_lookahead" => Ok(Self::PartitionLookahead),
            "refresh_derived_reports" => Ok(Self::RefreshDerivedReports),
            _ => Err(AppError::Validation(format!(
                "unknown maintenance operation '{value}'"
            ))),
        }
    }
}

/// One maintenance run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    run_id: Uuid,
    operation: MaintenanceOperation,
    status: RunStatus,
    occurred_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    details: Option<String>,
}

impl MaintenanceRecord {
    /// Creates a pending run.
    #[must_use]
    pub fn pending(operation: MaintenanceOperation, occurred_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            operation,
            status: RunStatus::Pending,
            occurred_at,
            finished_at: None,
            details: None,
        }
    }

    /// Rehydrates a persisted run.
    #[must_use]
    pub fn restore(
        run_id: Uuid,
        operation: MaintenanceOperation,
        status: RunStatus,
        occurred_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        details: Option<String>,
    ) -> Self {
        Self {
            run_id,
            operation,
            status,
            occurred_at,
            finished_at,
            details,
        }
    }

    /// Moves the run to in progress.
    pub fn start(&mut self) -> AppResult<()> {
        self.status = self.status.transition_to(RunStatus::InProgress)?;
        Ok(())
    }

    /// Marks the run completed with a detail summary.
    pub fn complete(
        &mut self,
        details: impl Into<String>,
        finished_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.status = self.status.transition_to(RunStatus::Completed)?;
        self.details = Some(details.into());
        self.finished_at = Some(finished_at);
        Ok(())
    }

    /// Marks the run failed with a reason.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        finished_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.status = self.status.transition_to(RunStatus::Failed)?;
        self.details = Some(reason.into());
        self.finished_at = Some(finished_at);
        Ok(())
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the maintenance operation.
    #[must_use]
    pub fn operation(&self) -> MaintenanceOperation {
        self.operation
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns when the run was recorded.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Returns when the run reached a terminal status.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Returns the outcome details.
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use bastion_core::AppResult;
    use chrono::Utc;

    use super::{
        BackupKind, BackupRecord, ChangeCursor, MaintenanceOperation, MaintenanceRecord,
        RunStatus,
    };

    #[test]
    fn terminal_states_are_never_left() {
        for terminal in [RunStatus::Completed, RunStatus::Failed] {
            for next in [
                RunStatus::Pending,
                RunStatus::InProgress,
                RunStatus::Completed,
                RunStatus::Failed,
            ] {
                assert!(terminal.transition_to(next).is_err());
            }
        }
    }

    #[test]
    fn pending_run_cannot_complete_without_starting() {
        assert!(RunStatus::Pending.transition_to(RunStatus::Completed).is_err());
        assert!(RunStatus::Pending.transition_to(RunStatus::Failed).is_ok());
    }

    #[test]
    fn backup_notes_accumulate() -> AppResult<()> {
        let mut record = BackupRecord::pending(BackupKind::Full, None, Utc::now());
        record.append_note("no completed backup found");
        record.start()?;
        record.fail("cancelled", Utc::now())?;

        assert_eq!(record.status(), RunStatus::Failed);
        assert_eq!(record.notes(), Some("no completed backup found; cancelled"));
        Ok(())
    }

    #[test]
    fn completed_backup_keeps_its_change_cursor() -> AppResult<()> {
        let mut record = BackupRecord::pending(BackupKind::Full, None, Utc::now());
        record.start()?;
        record.complete(Utc::now(), ChangeCursor::new(42)?, vec![], Utc::now())?;

        assert_eq!(record.change_cursor(), Some(ChangeCursor::new(42)?));
        assert!(ChangeCursor::new(-1).is_err());
        Ok(())
    }

    #[test]
    fn completed_maintenance_run_rejects_second_outcome() -> AppResult<()> {
        let mut record = MaintenanceRecord::pending(MaintenanceOperation::Vacuum, Utc::now());
        record.start()?;
        record.complete("vacuumed 5 tables", Utc::now())?;

        assert!(record.fail("late failure", Utc::now()).is_err());
        assert_eq!(record.details(), Some("vacuumed 5 tables"));
        Ok(())
    }
}
