use crate::Result;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::models::{
    QueueStateRecord, QueuedNotification, RestoreHistoryRecord, RunLogRecord, RunningJobRecord,
    StatusRecord,
};

/// DuckDB数据库操作消息
///
/// 所有对持久化状态的读写都通过消息进入 Actor，Actor 内对单条消息的处理
/// 天然串行，复合读改写操作必须设计成单条消息。
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 运行中任务登记 ==========
    /// 登记运行中的任务（幂等）
    RegisterRunning {
        job_id: String,
        resources: Vec<String>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 移除运行中任务登记（幂等）
    UnregisterRunning {
        job_id: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 列出当前登记的运行中任务
    ListRunning {
        respond_to: oneshot::Sender<Result<Vec<RunningJobRecord>>>,
    },

    // ========== 任务状态流水 ==========
    /// 追加一条状态记录
    AppendStatus {
        job_id: String,
        state: String,
        message: Option<String>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 获取任务最新状态
    GetLastStatus {
        job_id: String,
        respond_to: oneshot::Sender<Result<Option<StatusRecord>>>,
    },
    /// 获取任务状态历史（按时间升序）
    GetStatusHistory {
        job_id: String,
        limit: Option<u32>,
        respond_to: oneshot::Sender<Result<Vec<StatusRecord>>>,
    },

    // ========== 执行记录 ==========
    /// 追加一条执行记录
    AppendRunLog {
        record: RunLogRecord,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 获取任务执行记录（按时间升序）
    GetRunLog {
        job_id: String,
        limit: Option<u32>,
        respond_to: oneshot::Sender<Result<Vec<RunLogRecord>>>,
    },

    // ========== 通知节流状态 ==========
    /// 获取提供方节流状态，不存在时以 now 为 last_sent 创建
    EnsureQueueState {
        provider: String,
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<QueueStateRecord>>,
    },
    /// 追加待发送消息
    AppendPending {
        provider: String,
        message: QueuedNotification,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 原子地清空待发送列表并更新 last_sent（发送成功后调用）
    FlushQueue {
        provider: String,
        sent_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 只更新 last_sent（立即发送成功后调用）
    MarkSent {
        provider: String,
        sent_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 恢复历史 ==========
    /// 写入一条恢复历史
    InsertRestoreHistory {
        record: RestoreHistoryRecord,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 查询恢复历史（按结束时间倒序）
    ListRestoreHistory {
        job_id: Option<String>,
        limit: Option<u32>,
        respond_to: oneshot::Sender<Result<Vec<RestoreHistoryRecord>>>,
    },
}
