use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 正在运行的任务登记记录
#[derive(Debug, Clone)]
pub struct RunningJobRecord {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    /// 任务占用的远程资源（主机名，小写）
    pub resources: Vec<String>,
}

/// 任务状态流水记录
#[derive(Debug, Clone)]
pub struct StatusRecord {
    pub job_id: String,
    pub state: String,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 单条执行记录（命令已脱敏）
#[derive(Debug, Clone)]
pub struct RunLogRecord {
    pub run_id: String,
    pub job_id: String,
    pub operation: String,
    pub command: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub duration_ms: i64,
    pub output_tail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 排队等待批量发送的通知消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedNotification {
    /// 消息类别（success / failure / maintenance_failure / delay）
    pub kind: String,
    pub job_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// 通知提供方的节流状态
#[derive(Debug, Clone)]
pub struct QueueStateRecord {
    pub provider: String,
    pub last_sent: DateTime<Utc>,
    pub pending: Vec<QueuedNotification>,
}

/// 恢复历史记录
#[derive(Debug, Clone)]
pub struct RestoreHistoryRecord {
    pub job_id: String,
    pub snapshot_id: String,
    pub target: String,
    pub success: bool,
    pub message: Option<String>,
    pub files_restored: Option<i64>,
    pub bytes_restored: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
