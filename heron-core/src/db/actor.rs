use crate::Result;
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::DbMessage;
use super::models::{
    QueueStateRecord, QueuedNotification, RestoreHistoryRecord, RunLogRecord, RunningJobRecord,
    StatusRecord,
};

/// DuckDB Actor - 确保单线程访问DuckDB
///
/// 运行中任务登记表和通知节流状态都是多写方共享的持久化状态，
/// 全部读改写都经由本 Actor 串行执行。
pub struct DbActor {
    connection: Connection,
}

impl DbActor {
    /// 创建新的DuckDB Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        info!("DuckDB Actor 已启动");

        while let Some(message) = receiver.recv().await {
            self.handle_message(message);
        }

        info!("DuckDB Actor 已关闭");
    }

    /// 处理数据库消息
    fn handle_message(&mut self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let result = self.init_tables();
                let _ = respond_to.send(result);
            }
            DbMessage::RegisterRunning {
                job_id,
                resources,
                respond_to,
            } => {
                let result = self.register_running(&job_id, &resources);
                let _ = respond_to.send(result);
            }
            DbMessage::UnregisterRunning { job_id, respond_to } => {
                let result = self.unregister_running(&job_id);
                let _ = respond_to.send(result);
            }
            DbMessage::ListRunning { respond_to } => {
                let result = self.list_running();
                let _ = respond_to.send(result);
            }
            DbMessage::AppendStatus {
                job_id,
                state,
                message,
                respond_to,
            } => {
                let result = self.append_status(&job_id, &state, message.as_deref());
                let _ = respond_to.send(result);
            }
            DbMessage::GetLastStatus { job_id, respond_to } => {
                let result = self.get_last_status(&job_id);
                let _ = respond_to.send(result);
            }
            DbMessage::GetStatusHistory {
                job_id,
                limit,
                respond_to,
            } => {
                let result = self.get_status_history(&job_id, limit);
                let _ = respond_to.send(result);
            }
            DbMessage::AppendRunLog { record, respond_to } => {
                let result = self.append_run_log(&record);
                let _ = respond_to.send(result);
            }
            DbMessage::GetRunLog {
                job_id,
                limit,
                respond_to,
            } => {
                let result = self.get_run_log(&job_id, limit);
                let _ = respond_to.send(result);
            }
            DbMessage::EnsureQueueState {
                provider,
                now,
                respond_to,
            } => {
                let result = self.ensure_queue_state(&provider, now);
                let _ = respond_to.send(result);
            }
            DbMessage::AppendPending {
                provider,
                message,
                respond_to,
            } => {
                let result = self.append_pending(&provider, message);
                let _ = respond_to.send(result);
            }
            DbMessage::FlushQueue {
                provider,
                sent_at,
                respond_to,
            } => {
                let result = self.flush_queue(&provider, sent_at);
                let _ = respond_to.send(result);
            }
            DbMessage::MarkSent {
                provider,
                sent_at,
                respond_to,
            } => {
                let result = self.mark_sent(&provider, sent_at);
                let _ = respond_to.send(result);
            }
            DbMessage::InsertRestoreHistory { record, respond_to } => {
                let result = self.insert_restore_history(&record);
                let _ = respond_to.send(result);
            }
            DbMessage::ListRestoreHistory {
                job_id,
                limit,
                respond_to,
            } => {
                let result = self.list_restore_history(job_id.as_deref(), limit);
                let _ = respond_to.send(result);
            }
        }
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化DuckDB表...");

        // 读取并执行SQL初始化脚本
        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';').filter(|s| !s.trim().is_empty()) {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                self.connection.execute(trimmed, [])?;
            }
        }

        info!("DuckDB表初始化完成");
        Ok(())
    }

    /// 登记运行中任务，已存在时刷新登记内容
    fn register_running(&mut self, job_id: &str, resources: &[String]) -> Result<()> {
        let resources_json = serde_json::to_string(resources)?;
        let updated = self.connection.execute(
            "UPDATE running_jobs SET started_at = CURRENT_TIMESTAMP, resources = ? WHERE job_id = ?",
            params![resources_json, job_id],
        )?;

        if updated == 0 {
            self.connection.execute(
                "INSERT INTO running_jobs (job_id, resources) VALUES (?, ?)",
                params![job_id, resources_json],
            )?;
        }
        Ok(())
    }

    /// 移除运行中任务登记
    fn unregister_running(&mut self, job_id: &str) -> Result<()> {
        self.connection
            .execute("DELETE FROM running_jobs WHERE job_id = ?", params![job_id])?;
        Ok(())
    }

    /// 列出当前登记的运行中任务
    fn list_running(&mut self) -> Result<Vec<RunningJobRecord>> {
        let mut stmt = self
            .connection
            .prepare("SELECT job_id, started_at, resources FROM running_jobs ORDER BY started_at")?;

        let record_iter = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, DateTime<Utc>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for record in record_iter {
            let (job_id, started_at, resources_json) = record?;
            let resources: Vec<String> = serde_json::from_str(&resources_json)?;
            records.push(RunningJobRecord {
                job_id,
                started_at,
                resources,
            });
        }

        Ok(records)
    }

    /// 追加状态记录
    fn append_status(&mut self, job_id: &str, state: &str, message: Option<&str>) -> Result<()> {
        self.connection.execute(
            "INSERT INTO job_status (job_id, state, message) VALUES (?, ?, ?)",
            params![job_id, state, message],
        )?;
        Ok(())
    }

    /// 获取任务最新状态
    fn get_last_status(&mut self, job_id: &str) -> Result<Option<StatusRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT job_id, state, message, created_at FROM job_status
             WHERE job_id = ? ORDER BY id DESC LIMIT 1",
        )?;

        let mut rows = stmt.query(params![job_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(StatusRecord {
                job_id: row.get(0)?,
                state: row.get(1)?,
                message: row.get(2)?,
                created_at: row.get(3)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// 获取任务状态历史
    fn get_status_history(&mut self, job_id: &str, limit: Option<u32>) -> Result<Vec<StatusRecord>> {
        let sql = match limit {
            Some(n) => format!(
                "SELECT job_id, state, message, created_at FROM job_status
                 WHERE job_id = ? ORDER BY id ASC LIMIT {n}"
            ),
            None => "SELECT job_id, state, message, created_at FROM job_status
                 WHERE job_id = ? ORDER BY id ASC"
                .to_string(),
        };
        let mut stmt = self.connection.prepare(&sql)?;

        let record_iter = stmt.query_map(params![job_id], |row| {
            Ok(StatusRecord {
                job_id: row.get(0)?,
                state: row.get(1)?,
                message: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut records = Vec::new();
        for record in record_iter {
            records.push(record?);
        }
        Ok(records)
    }

    /// 追加执行记录
    fn append_run_log(&mut self, record: &RunLogRecord) -> Result<()> {
        self.connection.execute(
            "INSERT INTO run_log (run_id, job_id, operation, command, exit_code, success, duration_ms, output_tail)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.run_id,
                record.job_id,
                record.operation,
                record.command,
                record.exit_code,
                record.success,
                record.duration_ms,
                record.output_tail,
            ],
        )?;
        Ok(())
    }

    /// 获取任务执行记录
    fn get_run_log(&mut self, job_id: &str, limit: Option<u32>) -> Result<Vec<RunLogRecord>> {
        let sql = match limit {
            Some(n) => format!(
                "SELECT run_id, job_id, operation, command, exit_code, success, duration_ms, output_tail, created_at
                 FROM run_log WHERE job_id = ? ORDER BY id ASC LIMIT {n}"
            ),
            None => "SELECT run_id, job_id, operation, command, exit_code, success, duration_ms, output_tail, created_at
                 FROM run_log WHERE job_id = ? ORDER BY id ASC"
                .to_string(),
        };
        let mut stmt = self.connection.prepare(&sql)?;

        let record_iter = stmt.query_map(params![job_id], |row| {
            Ok(RunLogRecord {
                run_id: row.get(0)?,
                job_id: row.get(1)?,
                operation: row.get(2)?,
                command: row.get(3)?,
                exit_code: row.get(4)?,
                success: row.get(5)?,
                duration_ms: row.get(6)?,
                output_tail: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;

        let mut records = Vec::new();
        for record in record_iter {
            records.push(record?);
        }
        Ok(records)
    }

    /// 获取提供方节流状态，不存在时创建
    ///
    /// 新提供方的 last_sent 初始化为创建时刻，这样首批消息会合并成
    /// 一次批量通知而不是逐条发送。
    fn ensure_queue_state(
        &mut self,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueStateRecord> {
        if let Some(state) = self.get_queue_state(provider)? {
            return Ok(state);
        }

        self.connection.execute(
            "INSERT INTO notify_queue (provider, last_sent, pending) VALUES (?, ?, '[]')",
            params![provider, now],
        )?;

        Ok(QueueStateRecord {
            provider: provider.to_string(),
            last_sent: now,
            pending: Vec::new(),
        })
    }

    fn get_queue_state(&mut self, provider: &str) -> Result<Option<QueueStateRecord>> {
        let mut stmt = self
            .connection
            .prepare("SELECT provider, last_sent, pending FROM notify_queue WHERE provider = ?")?;

        let mut rows = stmt.query(params![provider])?;
        if let Some(row) = rows.next()? {
            let provider: String = row.get(0)?;
            let last_sent: DateTime<Utc> = row.get(1)?;
            let pending_json: String = row.get(2)?;
            let pending: Vec<QueuedNotification> = serde_json::from_str(&pending_json)?;
            Ok(Some(QueueStateRecord {
                provider,
                last_sent,
                pending,
            }))
        } else {
            Ok(None)
        }
    }

    /// 追加待发送消息
    fn append_pending(&mut self, provider: &str, message: QueuedNotification) -> Result<()> {
        let mut state = self.ensure_queue_state(provider, message.created_at)?;
        state.pending.push(message);
        let pending_json = serde_json::to_string(&state.pending)?;

        self.connection.execute(
            "UPDATE notify_queue SET pending = ? WHERE provider = ?",
            params![pending_json, provider],
        )?;
        Ok(())
    }

    /// 原子地清空待发送列表并更新 last_sent
    fn flush_queue(&mut self, provider: &str, sent_at: DateTime<Utc>) -> Result<()> {
        self.connection.execute(
            "UPDATE notify_queue SET pending = '[]', last_sent = ? WHERE provider = ?",
            params![sent_at, provider],
        )?;
        Ok(())
    }

    /// 只更新 last_sent
    fn mark_sent(&mut self, provider: &str, sent_at: DateTime<Utc>) -> Result<()> {
        self.connection.execute(
            "UPDATE notify_queue SET last_sent = ? WHERE provider = ?",
            params![sent_at, provider],
        )?;
        Ok(())
    }

    /// 写入恢复历史
    fn insert_restore_history(&mut self, record: &RestoreHistoryRecord) -> Result<()> {
        self.connection.execute(
            "INSERT INTO restore_history
             (job_id, snapshot_id, target, success, message, files_restored, bytes_restored, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.job_id,
                record.snapshot_id,
                record.target,
                record.success,
                record.message,
                record.files_restored,
                record.bytes_restored,
                record.started_at,
                record.finished_at,
            ],
        )?;
        Ok(())
    }

    /// 查询恢复历史
    fn list_restore_history(
        &mut self,
        job_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<RestoreHistoryRecord>> {
        let limit_clause = match limit {
            Some(n) => format!(" LIMIT {n}"),
            None => String::new(),
        };

        let map_row = |row: &duckdb::Row<'_>| -> duckdb::Result<RestoreHistoryRecord> {
            Ok(RestoreHistoryRecord {
                job_id: row.get(0)?,
                snapshot_id: row.get(1)?,
                target: row.get(2)?,
                success: row.get(3)?,
                message: row.get(4)?,
                files_restored: row.get(5)?,
                bytes_restored: row.get(6)?,
                started_at: row.get(7)?,
                finished_at: row.get(8)?,
            })
        };

        let mut records = Vec::new();
        if let Some(job_id) = job_id {
            let sql = format!(
                "SELECT job_id, snapshot_id, target, success, message, files_restored, bytes_restored, started_at, finished_at
                 FROM restore_history WHERE job_id = ? ORDER BY id DESC{limit_clause}"
            );
            let mut stmt = self.connection.prepare(&sql)?;
            let record_iter = stmt.query_map(params![job_id], map_row)?;
            for record in record_iter {
                records.push(record?);
            }
        } else {
            let sql = format!(
                "SELECT job_id, snapshot_id, target, success, message, files_restored, bytes_restored, started_at, finished_at
                 FROM restore_history ORDER BY id DESC{limit_clause}"
            );
            let mut stmt = self.connection.prepare(&sql)?;
            let record_iter = stmt.query_map([], map_row)?;
            for record in record_iter {
                records.push(record?);
            }
        }

        Ok(records)
    }
}
