// 恢复引擎模块
//
// 预演恢复走同步路径、有界超时；真实恢复在后台任务中执行，
// 通过共享的进度记录对外提供查询，并带两阶段停滞检测。
//
// 主要组件：
// - RestoreEngine: 恢复入口与后台工作流
// - OverwriteChecker: 恢复前的覆盖检测（仅供上游确认步骤参考）

mod overwrite;

pub use overwrite::{OverwriteChecker, OverwriteReport};

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use std::sync::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{error, info, warn};

use crate::config::{AppConfig, JobDefinition, RestoreConfig};
use crate::db::{DbManager, RestoreHistoryRecord};
use crate::error::{HeronError, Result};
use crate::exec::{ExecutionResult, ExecutionService, materialize};
use crate::notify::classify;
use crate::plan::{Planner, RestoreRequest, Transport, restore_destinations};
use crate::status::{JobState, StatusLog};

/// 进行中恢复的实时进度
#[derive(Debug, Clone)]
pub struct ActiveRestoreStatus {
    pub job_id: String,
    pub snapshot_id: String,
    pub files_restored: u64,
    pub total_files: u64,
    pub bytes_restored: u64,
    pub total_bytes: u64,
    pub percent: f64,
    pub started_at: DateTime<Utc>,
}

impl ActiveRestoreStatus {
    fn new(job_id: &str, snapshot_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            snapshot_id: snapshot_id.to_string(),
            files_restored: 0,
            total_files: 0,
            bytes_restored: 0,
            total_bytes: 0,
            percent: 0.0,
            started_at: Utc::now(),
        }
    }
}

/// 工具输出里的一条结构化进度
#[derive(Debug, Clone, PartialEq)]
struct ProgressUpdate {
    percent: f64,
    files_restored: u64,
    total_files: u64,
    bytes_restored: u64,
    total_bytes: u64,
}

/// 输出监控的结束方式
#[derive(Debug, PartialEq, Eq)]
enum MonitorEnd {
    /// 输出正常结束
    Eof,
    /// 停滞（附检测阶段说明）
    Stalled(&'static str),
}

/// 一次真实恢复的进程结果
#[derive(Debug)]
struct RestoreRun {
    code: Option<i32>,
    stderr: String,
    stalled: Option<&'static str>,
}

/// 恢复引擎
pub struct RestoreEngine {
    db: DbManager,
    status: StatusLog,
    planner: Planner,
    exec: ExecutionService,
    checker: OverwriteChecker,
    restore_config: RestoreConfig,
    active: RwLock<HashMap<String, ActiveRestoreStatus>>,
}

impl RestoreEngine {
    pub fn new(db: DbManager, config: AppConfig) -> Arc<Self> {
        let exec = ExecutionService::new(config.execution.clone());
        Arc::new(Self {
            status: StatusLog::new(db.clone()),
            db,
            checker: OverwriteChecker::new(exec.clone()),
            exec,
            restore_config: config.restore.clone(),
            planner: Planner::new(config),
            active: RwLock::new(HashMap::new()),
        })
    }

    /// 预演恢复：同步执行，有界超时，直接返回执行结果
    pub async fn dry_run(&self, job: &JobDefinition, request: &RestoreRequest) -> Result<ExecutionResult> {
        let mut request = request.clone();
        request.dry_run = true;

        let plan = self.planner.plan_restore(job, &request)?;
        let step = plan
            .steps
            .first()
            .ok_or_else(|| HeronError::custom("恢复计划为空"))?;
        self.exec.execute(step).await
    }

    /// 恢复前的覆盖检测（仅供上游确认步骤参考，不阻止恢复）
    pub async fn check_overwrite(
        &self,
        job: &JobDefinition,
        request: &RestoreRequest,
    ) -> Result<OverwriteReport> {
        let paths = restore_destinations(job, request, &self.restore_config.staging_dir);
        self.checker.check(job, &paths).await
    }

    /// 查询进行中恢复的实时进度
    pub fn active_status(&self, job_id: &str) -> Option<ActiveRestoreStatus> {
        self.active
            .read()
            .ok()
            .and_then(|active| active.get(job_id).cloned())
    }

    /// 查询恢复历史
    pub async fn history(
        &self,
        job_id: Option<String>,
        limit: Option<u32>,
    ) -> Result<Vec<RestoreHistoryRecord>> {
        self.db.list_restore_history(job_id, limit).await
    }

    /// 启动一次真实恢复（后台执行）
    ///
    /// 配置错误在这里同步失败；进程启动之后通过 active_status 查询进度。
    pub async fn start(self: &Arc<Self>, job: JobDefinition, request: RestoreRequest) -> Result<()> {
        // 规划先行，配置缺陷不进入后台
        self.planner.plan_restore(&job, &request)?;

        {
            let mut active = self
                .active
                .write()
                .map_err(|_| HeronError::custom("恢复进度表不可用"))?;
            if active.contains_key(&job.id) {
                return Err(HeronError::custom(format!(
                    "任务 {} 已有恢复在进行中",
                    job.id
                )));
            }
            active.insert(
                job.id.clone(),
                ActiveRestoreStatus::new(&job.id, &request.snapshot_id),
            );
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.worker(job, request).await;
        });
        Ok(())
    }

    /// 后台恢复工作流：执行、监控、终态转移
    async fn worker(self: Arc<Self>, job: JobDefinition, request: RestoreRequest) {
        let started_at = Utc::now();
        if let Err(e) = self
            .status
            .set(
                &job.id,
                JobState::Restoring,
                Some(format!("恢复快照 {}", request.snapshot_id)),
            )
            .await
        {
            warn!("写入任务 {} 的恢复状态失败: {}", job.id, e);
        }

        let run = self.run_restore(&job, &request).await;

        // 终态转移：移除实时进度记录，换成持久化的历史记录
        let final_progress = self
            .active
            .write()
            .ok()
            .and_then(|mut active| active.remove(&job.id));

        let (success, message) = match &run {
            Ok(run) if run.stalled.is_some() => {
                let phase = run.stalled.unwrap_or("输出停滞");
                (false, format!("恢复输出停滞（{phase}）"))
            }
            Ok(run) if run.code == Some(0) => {
                let restored = final_progress
                    .as_ref()
                    .map(|p| p.files_restored)
                    .unwrap_or(0);
                (true, format!("已恢复 {restored} 个文件"))
            }
            Ok(run) => {
                let classified = classify(&run.stderr, run.code);
                (
                    false,
                    format!("{}（建议: {}）", classified.summary, classified.remediation),
                )
            }
            Err(e) => (false, e.to_string()),
        };

        let record = RestoreHistoryRecord {
            job_id: job.id.clone(),
            snapshot_id: request.snapshot_id.clone(),
            target: restore_destinations(&job, &request, &self.restore_config.staging_dir)
                .join(", "),
            success,
            message: Some(message.clone()),
            files_restored: final_progress.as_ref().map(|p| p.files_restored as i64),
            bytes_restored: final_progress.as_ref().map(|p| p.bytes_restored as i64),
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.db.insert_restore_history(record).await {
            warn!("写入任务 {} 的恢复历史失败: {}", job.id, e);
        }

        let state = if success {
            info!("任务 {} 恢复完成: {}", job.id, message);
            JobState::RestoreCompleted
        } else {
            error!("任务 {} 恢复失败: {}", job.id, message);
            JobState::RestoreFailed
        };
        if let Err(e) = self.status.set(&job.id, state, Some(message)).await {
            warn!("写入任务 {} 的恢复终态失败: {}", job.id, e);
        }
    }

    /// 启动恢复进程并监控输出
    async fn run_restore(&self, job: &JobDefinition, request: &RestoreRequest) -> Result<RestoreRun> {
        let plan = self.planner.plan_restore(job, request)?;
        let step = plan
            .steps
            .first()
            .ok_or_else(|| HeronError::custom("恢复计划为空"))?;

        let (program, args) = materialize(step);
        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if matches!(step.transport, Transport::Local) {
            cmd.envs(&step.env);
        }

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HeronError::custom("无法获取恢复进程的标准输出"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HeronError::custom("无法获取恢复进程的标准错误"))?;

        // 并行收集 stderr，失败分类时使用
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut reader = BufReader::new(stderr);
            let _ = reader.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        });

        let initial = Duration::from_secs(self.restore_config.initial_response_timeout_secs);
        let ongoing = Duration::from_secs(self.restore_config.ongoing_timeout_secs);

        let end = monitor_lines(stdout, initial, ongoing, |line| {
            if let Some(update) = parse_progress(line) {
                if let Ok(mut active) = self.active.write() {
                    if let Some(entry) = active.get_mut(&job.id) {
                        entry.percent = update.percent;
                        entry.files_restored = update.files_restored;
                        entry.total_files = update.total_files;
                        entry.bytes_restored = update.bytes_restored;
                        entry.total_bytes = update.total_bytes;
                    }
                }
            }
        })
        .await;

        if let MonitorEnd::Stalled(phase) = end {
            warn!("任务 {} 的恢复输出停滞（{}），终止进程", job.id, phase);
            let _ = child.kill().await;
            let _ = child.wait().await;
            stderr_task.abort();
            return Ok(RestoreRun {
                code: None,
                stderr: String::new(),
                stalled: Some(phase),
            });
        }

        let status = child.wait().await?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        Ok(RestoreRun {
            code: status.code(),
            stderr: stderr_text,
            stalled: None,
        })
    }
}

/// 两阶段停滞检测的输出监控
///
/// 首行输出之前允许较长的静默（initial）；出现首行之后静默超过
/// ongoing 即判定停滞。
async fn monitor_lines<R: AsyncRead + Unpin>(
    reader: R,
    initial: Duration,
    ongoing: Duration,
    mut on_line: impl FnMut(&str),
) -> MonitorEnd {
    let mut lines = BufReader::new(reader).lines();
    let mut saw_first_line = false;

    loop {
        let limit = if saw_first_line { ongoing } else { initial };
        match tokio::time::timeout(limit, lines.next_line()).await {
            Err(_) => {
                return if saw_first_line {
                    MonitorEnd::Stalled("输出中断")
                } else {
                    MonitorEnd::Stalled("首行输出超时")
                };
            }
            Ok(Ok(Some(line))) => {
                saw_first_line = true;
                on_line(&line);
            }
            Ok(Ok(None)) => return MonitorEnd::Eof,
            Ok(Err(_)) => return MonitorEnd::Eof,
        }
    }
}

/// 解析工具输出的结构化进度行
fn parse_progress(line: &str) -> Option<ProgressUpdate> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    let message_type = value.get("message_type")?.as_str()?;

    match message_type {
        "status" => Some(ProgressUpdate {
            percent: value.get("percent_done")?.as_f64().unwrap_or(0.0),
            files_restored: value
                .get("files_restored")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            total_files: value.get("total_files").and_then(|v| v.as_u64()).unwrap_or(0),
            bytes_restored: value
                .get("bytes_restored")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            total_bytes: value.get("total_bytes").and_then(|v| v.as_u64()).unwrap_or(0),
        }),
        "summary" => Some(ProgressUpdate {
            percent: 1.0,
            files_restored: value
                .get("files_restored")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            total_files: value.get("total_files").and_then(|v| v.as_u64()).unwrap_or(0),
            bytes_restored: value
                .get("bytes_restored")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            total_bytes: value.get("total_bytes").and_then(|v| v.as_u64()).unwrap_or(0),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationSpec, SnapshotBackend, SnapshotDestination, SourcePath, SourceSpec};
    use crate::plan::RestoreTarget;

    #[test]
    fn test_parse_status_progress_line() {
        let line = r#"{"message_type":"status","percent_done":0.55,"total_files":100,"files_restored":55,"total_bytes":2048,"bytes_restored":1126}"#;
        let update = parse_progress(line).unwrap();
        assert_eq!(update.percent, 0.55);
        assert_eq!(update.files_restored, 55);
        assert_eq!(update.total_files, 100);
        assert_eq!(update.bytes_restored, 1126);
    }

    #[test]
    fn test_parse_summary_line_is_complete() {
        let line = r#"{"message_type":"summary","total_files":100,"files_restored":100,"total_bytes":2048,"bytes_restored":2048}"#;
        let update = parse_progress(line).unwrap();
        assert_eq!(update.percent, 1.0);
        assert_eq!(update.files_restored, 100);
    }

    #[test]
    fn test_parse_ignores_plain_text() {
        assert!(parse_progress("restoring /srv/data").is_none());
        assert!(parse_progress(r#"{"message_type":"verbose_status"}"#).is_none());
    }

    fn spawn_shell(script: &str) -> tokio::process::Child {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd.spawn().unwrap()
    }

    #[tokio::test]
    async fn test_monitor_reads_until_eof() {
        let mut child = spawn_shell("echo one; echo two");
        let stdout = child.stdout.take().unwrap();

        let mut lines = Vec::new();
        let end = monitor_lines(
            stdout,
            Duration::from_secs(5),
            Duration::from_secs(5),
            |line| lines.push(line.to_string()),
        )
        .await;

        assert_eq!(end, MonitorEnd::Eof);
        assert_eq!(lines, vec!["one", "two"]);
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn test_monitor_detects_initial_stall() {
        let mut child = spawn_shell("sleep 5");
        let stdout = child.stdout.take().unwrap();

        let end = monitor_lines(
            stdout,
            Duration::from_millis(300),
            Duration::from_secs(5),
            |_| {},
        )
        .await;

        assert_eq!(end, MonitorEnd::Stalled("首行输出超时"));
        let _ = child.kill().await;
    }

    #[tokio::test]
    async fn test_monitor_detects_ongoing_stall() {
        let mut child = spawn_shell("echo first; sleep 5");
        let stdout = child.stdout.take().unwrap();

        let end = monitor_lines(
            stdout,
            Duration::from_secs(5),
            Duration::from_millis(300),
            |_| {},
        )
        .await;

        assert_eq!(end, MonitorEnd::Stalled("输出中断"));
        let _ = child.kill().await;
    }

    fn snapshot_job(id: &str) -> JobDefinition {
        JobDefinition {
            id: id.to_string(),
            name: None,
            enabled: true,
            schedule: crate::config::ScheduleKind::Manual,
            source: SourceSpec::Local {
                paths: vec![SourcePath {
                    path: "/srv/data".to_string(),
                    include: vec![],
                    exclude: vec![],
                }],
            },
            destination: DestinationSpec::Snapshot(SnapshotDestination {
                password: "repo-pass".to_string(),
                backend: SnapshotBackend::LocalPath {
                    path: "/repo".to_string(),
                },
                auto_init: true,
                exec_host: None,
                sandbox_image: None,
            }),
            respect_conflicts: true,
            sync_options: None,
            notifications: vec![],
            maintenance: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_start_rejects_config_errors_synchronously() {
        let db = DbManager::new_memory().await.unwrap();
        let engine = RestoreEngine::new(db, AppConfig::default());

        // 同步目的地不支持恢复，属于配置错误
        let mut job = snapshot_job("bad");
        job.destination = DestinationSpec::Local {
            path: "/backups".to_string(),
        };
        let request = RestoreRequest {
            job_id: "bad".to_string(),
            snapshot_id: "latest".to_string(),
            target: RestoreTarget::Staging,
            paths: vec![],
            dry_run: false,
        };

        let err = engine.start(job, request).await.unwrap_err();
        assert!(matches!(err, HeronError::Config(_)));
        assert!(engine.active_status("bad").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected() {
        let db = DbManager::new_memory().await.unwrap();
        let engine = RestoreEngine::new(db, AppConfig::default());
        let job = snapshot_job("dup");
        let request = RestoreRequest {
            job_id: "dup".to_string(),
            snapshot_id: "latest".to_string(),
            target: RestoreTarget::Staging,
            paths: vec![],
            dry_run: false,
        };

        // 手工占位模拟进行中的恢复
        engine
            .active
            .write()
            .unwrap()
            .insert("dup".to_string(), ActiveRestoreStatus::new("dup", "latest"));

        let err = engine.start(job, request).await.unwrap_err();
        assert!(err.to_string().contains("已有恢复在进行中"));
    }
}
