use crate::{HeronError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DbActor;
use super::messages::DbMessage;
use super::models::{
    QueueStateRecord, QueuedNotification, RestoreHistoryRecord, RunLogRecord, RunningJobRecord,
    StatusRecord,
};

/// DuckDB数据库管理器
///
/// 可克隆的 Actor 句柄，所有方法把消息发给 Actor 并等待应答。
#[derive(Debug, Clone)]
pub struct DbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DbManager {
    /// 创建新的DuckDB管理器
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let (sender, receiver) = mpsc::channel(100);

        // 启动DuckDB Actor
        let actor = DbActor::new(db_path)?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };

        // 初始化数据库表
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 创建内存数据库管理器
    pub async fn new_memory() -> Result<Self> {
        let (sender, receiver) = mpsc::channel(100);

        // 启动DuckDB Actor（内存模式）
        let actor = DbActor::new_memory()?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };

        // 初始化数据库表
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 发送消息并等待应答
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| HeronError::custom("数据库Actor已关闭"))?;

        receiver
            .await
            .map_err(|_| HeronError::custom("等待数据库响应失败"))?
    }

    /// 初始化数据库表
    async fn init_tables(&self) -> Result<()> {
        self.request(|respond_to| DbMessage::InitTables { respond_to })
            .await
    }

    /// 登记运行中任务（幂等）
    pub async fn register_running(&self, job_id: &str, resources: Vec<String>) -> Result<()> {
        let job_id = job_id.to_string();
        self.request(move |respond_to| DbMessage::RegisterRunning {
            job_id,
            resources,
            respond_to,
        })
        .await
    }

    /// 移除运行中任务登记（幂等）
    pub async fn unregister_running(&self, job_id: &str) -> Result<()> {
        let job_id = job_id.to_string();
        self.request(move |respond_to| DbMessage::UnregisterRunning { job_id, respond_to })
            .await
    }

    /// 列出当前登记的运行中任务
    pub async fn list_running(&self) -> Result<Vec<RunningJobRecord>> {
        self.request(|respond_to| DbMessage::ListRunning { respond_to })
            .await
    }

    /// 追加状态记录
    pub async fn append_status(
        &self,
        job_id: &str,
        state: &str,
        message: Option<String>,
    ) -> Result<()> {
        let job_id = job_id.to_string();
        let state = state.to_string();
        self.request(move |respond_to| DbMessage::AppendStatus {
            job_id,
            state,
            message,
            respond_to,
        })
        .await
    }

    /// 获取任务最新状态
    pub async fn get_last_status(&self, job_id: &str) -> Result<Option<StatusRecord>> {
        let job_id = job_id.to_string();
        self.request(move |respond_to| DbMessage::GetLastStatus { job_id, respond_to })
            .await
    }

    /// 获取任务状态历史
    pub async fn get_status_history(
        &self,
        job_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<StatusRecord>> {
        let job_id = job_id.to_string();
        self.request(move |respond_to| DbMessage::GetStatusHistory {
            job_id,
            limit,
            respond_to,
        })
        .await
    }

    /// 追加执行记录
    pub async fn append_run_log(&self, record: RunLogRecord) -> Result<()> {
        self.request(move |respond_to| DbMessage::AppendRunLog { record, respond_to })
            .await
    }

    /// 获取任务执行记录
    pub async fn get_run_log(&self, job_id: &str, limit: Option<u32>) -> Result<Vec<RunLogRecord>> {
        let job_id = job_id.to_string();
        self.request(move |respond_to| DbMessage::GetRunLog {
            job_id,
            limit,
            respond_to,
        })
        .await
    }

    /// 获取提供方节流状态，不存在时创建
    pub async fn ensure_queue_state(
        &self,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueStateRecord> {
        let provider = provider.to_string();
        self.request(move |respond_to| DbMessage::EnsureQueueState {
            provider,
            now,
            respond_to,
        })
        .await
    }

    /// 追加待发送消息
    pub async fn append_pending(&self, provider: &str, message: QueuedNotification) -> Result<()> {
        let provider = provider.to_string();
        self.request(move |respond_to| DbMessage::AppendPending {
            provider,
            message,
            respond_to,
        })
        .await
    }

    /// 原子地清空待发送列表并更新 last_sent
    pub async fn flush_queue(&self, provider: &str, sent_at: DateTime<Utc>) -> Result<()> {
        let provider = provider.to_string();
        self.request(move |respond_to| DbMessage::FlushQueue {
            provider,
            sent_at,
            respond_to,
        })
        .await
    }

    /// 只更新 last_sent
    pub async fn mark_sent(&self, provider: &str, sent_at: DateTime<Utc>) -> Result<()> {
        let provider = provider.to_string();
        self.request(move |respond_to| DbMessage::MarkSent {
            provider,
            sent_at,
            respond_to,
        })
        .await
    }

    /// 写入恢复历史
    pub async fn insert_restore_history(&self, record: RestoreHistoryRecord) -> Result<()> {
        self.request(move |respond_to| DbMessage::InsertRestoreHistory { record, respond_to })
            .await
    }

    /// 查询恢复历史
    pub async fn list_restore_history(
        &self,
        job_id: Option<String>,
        limit: Option<u32>,
    ) -> Result<Vec<RestoreHistoryRecord>> {
        self.request(move |respond_to| DbMessage::ListRestoreHistory {
            job_id,
            limit,
            respond_to,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_unregister_running() {
        let manager = DbManager::new_memory().await.unwrap();

        manager
            .register_running("job-a", vec!["nas.local".to_string()])
            .await
            .unwrap();
        // 重复登记保持幂等，job_id 只出现一次
        manager
            .register_running("job-a", vec!["nas.local".to_string()])
            .await
            .unwrap();

        let running = manager.list_running().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].job_id, "job-a");
        assert_eq!(running[0].resources, vec!["nas.local"]);

        manager.unregister_running("job-a").await.unwrap();
        // 重复移除同样幂等
        manager.unregister_running("job-a").await.unwrap();
        assert!(manager.list_running().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_history_order() {
        let manager = DbManager::new_memory().await.unwrap();

        manager
            .append_status("job-a", "started", None)
            .await
            .unwrap();
        manager
            .append_status("job-a", "completed_dry_run", Some("预演完成".to_string()))
            .await
            .unwrap();

        let history = manager.get_status_history("job-a", None).await.unwrap();
        let states: Vec<&str> = history.iter().map(|r| r.state.as_str()).collect();
        assert_eq!(states, vec!["started", "completed_dry_run"]);

        let last = manager.get_last_status("job-a").await.unwrap().unwrap();
        assert_eq!(last.state, "completed_dry_run");
    }

    #[tokio::test]
    async fn test_queue_state_flush_clears_pending() {
        let manager = DbManager::new_memory().await.unwrap();
        let now = Utc::now();

        let state = manager.ensure_queue_state("hook", now).await.unwrap();
        assert!(state.pending.is_empty());

        manager
            .append_pending(
                "hook",
                QueuedNotification {
                    kind: "failure".to_string(),
                    job_id: "job-a".to_string(),
                    body: "失败".to_string(),
                    created_at: now,
                },
            )
            .await
            .unwrap();

        let state = manager.ensure_queue_state("hook", now).await.unwrap();
        assert_eq!(state.pending.len(), 1);

        let sent_at = Utc::now();
        manager.flush_queue("hook", sent_at).await.unwrap();

        let state = manager.ensure_queue_state("hook", now).await.unwrap();
        assert!(state.pending.is_empty());
    }
}
