use crate::Result;
use crate::db::{DbManager, StatusRecord};

/// 任务状态
///
/// 状态转移由 JobRunner 和 RestoreEngine 写入，状态/日志协作方只读。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Started,
    Running,
    WaitingConflict,
    ConflictResolved,
    Completed,
    CompletedDryRun,
    Error,
    ErrorDryRun,
    Restoring,
    RestoreCompleted,
    RestoreFailed,
}

impl JobState {
    /// 持久化使用的状态名
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Started => "started",
            JobState::Running => "running",
            JobState::WaitingConflict => "waiting_conflict",
            JobState::ConflictResolved => "conflict_resolved",
            JobState::Completed => "completed",
            JobState::CompletedDryRun => "completed_dry_run",
            JobState::Error => "error",
            JobState::ErrorDryRun => "error_dry_run",
            JobState::Restoring => "restoring",
            JobState::RestoreCompleted => "restore_completed",
            JobState::RestoreFailed => "restore_failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务状态流水的写入/查询入口
#[derive(Debug, Clone)]
pub struct StatusLog {
    db: DbManager,
}

impl StatusLog {
    pub fn new(db: DbManager) -> Self {
        Self { db }
    }

    /// 记录一次状态转移
    pub async fn set(&self, job_id: &str, state: JobState, message: Option<String>) -> Result<()> {
        tracing::debug!("任务 {} 状态转移: {}", job_id, state);
        self.db.append_status(job_id, state.as_str(), message).await
    }

    /// 任务最新状态
    pub async fn last(&self, job_id: &str) -> Result<Option<StatusRecord>> {
        self.db.get_last_status(job_id).await
    }

    /// 任务状态历史（按时间升序）
    pub async fn history(&self, job_id: &str) -> Result<Vec<StatusRecord>> {
        self.db.get_status_history(job_id, None).await
    }
}
