use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, JobDefinition};
use crate::conflict::ConflictManager;
use crate::db::{DbManager, RunLogRecord};
use crate::error::{HeronError, Result};
use crate::exec::{ExecutionResult, ExecutionService, invocation_line};
use crate::maintenance::MaintenanceOp;
use crate::notify::{Notifier, NotifyEvent, classify};
use crate::plan::{ExecutionPlan, Planner};
use crate::status::{JobState, StatusLog};

/// 一份计划的执行结果
#[derive(Debug)]
pub enum PlanOutcome {
    Success,
    /// 首个导致中断的步骤（操作名 + 结果）
    Failed {
        operation: String,
        result: ExecutionResult,
    },
}

impl PlanOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PlanOutcome::Success)
    }
}

/// 任务运行器
///
/// 串起一次任务运行的完整控制流：等待冲突、登记、规划、执行、
/// 反登记、状态转移、结果通知。运行中任务登记的移除在所有退出
/// 路径上执行。
#[derive(Clone)]
pub struct JobRunner {
    db: DbManager,
    status: StatusLog,
    planner: Planner,
    exec: ExecutionService,
    conflicts: ConflictManager,
    notifier: Notifier,
}

impl JobRunner {
    pub fn new(db: DbManager, config: AppConfig, notifier: Notifier) -> Self {
        let status = StatusLog::new(db.clone());
        let exec = ExecutionService::new(config.execution.clone());
        let conflicts = ConflictManager::new(db.clone(), &config.conflict);
        let planner = Planner::new(config);

        Self {
            db,
            status,
            planner,
            exec,
            conflicts,
            notifier,
        }
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    pub fn conflicts(&self) -> &ConflictManager {
        &self.conflicts
    }

    pub fn db(&self) -> &DbManager {
        &self.db
    }

    /// 派生一次后台运行（调度器触发使用）
    ///
    /// 运行器内部的任何异常都在这里收口成失败状态与通知，
    /// 一个任务的失败不会影响其他任务。
    pub fn spawn_run(self: &Arc<Self>, job: JobDefinition, dry_run: bool) {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = runner.run(&job, dry_run).await {
                error!("任务 {} 运行失败: {}", job.id, e);
            }
        });
    }

    /// 运行一次任务（手动触发与调度触发共用）
    pub async fn run(&self, job: &JobDefinition, dry_run: bool) -> Result<()> {
        let started = Instant::now();
        self.status.set(&job.id, JobState::Started, None).await?;

        // 1. 等待共享资源上的其他任务结束
        if job.respect_conflicts {
            let conflicting = self.current_conflicts(job).await?;
            if !conflicting.is_empty() {
                self.status
                    .set(
                        &job.id,
                        JobState::WaitingConflict,
                        Some(format!("等待冲突任务: {}", conflicting.join(", "))),
                    )
                    .await?;

                let outcome = self.conflicts.wait_until_clear(job).await?;

                self.status
                    .set(
                        &job.id,
                        JobState::ConflictResolved,
                        Some(format!("等待 {:?} 后恢复", outcome.waited)),
                    )
                    .await?;
                self.notifier
                    .dispatch(
                        job,
                        &NotifyEvent::Delayed {
                            waited: outcome.waited,
                            conflicting: outcome.conflicting_jobs,
                        },
                    )
                    .await;
            }
        }

        // 2. 登记运行中任务
        self.conflicts.register(job).await?;

        // 3. 规划并执行，无论成败都移除登记
        let run_result = self.plan_and_execute(job, dry_run).await;

        if let Err(e) = self.conflicts.unregister(&job.id).await {
            warn!("移除任务 {} 的运行登记失败: {}", job.id, e);
        }

        // 4. 状态转移与结果通知
        match run_result {
            Ok(PlanOutcome::Success) => {
                let duration = started.elapsed();
                let state = if dry_run {
                    JobState::CompletedDryRun
                } else {
                    JobState::Completed
                };
                self.status.set(&job.id, state, None).await?;
                self.notifier
                    .dispatch(job, &NotifyEvent::Succeeded { duration })
                    .await;
                info!("任务 {} 完成，耗时 {:?}", job.id, duration);
                Ok(())
            }
            Ok(PlanOutcome::Failed { operation, result }) => {
                let classified = classify(&result.stderr, result.code);
                let message = format!("{operation} 失败: {}", classified.summary);

                let state = if dry_run {
                    JobState::ErrorDryRun
                } else {
                    JobState::Error
                };
                self.status.set(&job.id, state, Some(message.clone())).await?;
                self.notifier
                    .dispatch(job, &NotifyEvent::Failed { error: classified })
                    .await;
                Err(HeronError::execution(message))
            }
            Err(e) => {
                // 规划阶段的配置错误等，同样收口成失败状态与通知
                let state = if dry_run {
                    JobState::ErrorDryRun
                } else {
                    JobState::Error
                };
                self.status
                    .set(&job.id, state, Some(e.to_string()))
                    .await?;
                self.notifier
                    .dispatch(
                        job,
                        &NotifyEvent::Failed {
                            error: classify(&e.to_string(), None),
                        },
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// 运行一次仓库维护操作（维护调度器触发）
    pub async fn run_maintenance(&self, job: &JobDefinition, op: MaintenanceOp) -> Result<()> {
        let plan = match op {
            MaintenanceOp::Discard => self.planner.plan_discard(job)?,
            MaintenanceOp::Check => self.planner.plan_check(job)?,
        };

        match self.execute_plan_steps(&plan).await? {
            PlanOutcome::Success => {
                info!("任务 {} 的{}维护完成", job.id, op);
                Ok(())
            }
            PlanOutcome::Failed { operation, result } => {
                let classified = classify(&result.stderr, result.code);
                warn!(
                    "任务 {} 的{}维护失败: {}",
                    job.id, op, classified.summary
                );
                self.notifier
                    .dispatch(
                        job,
                        &NotifyEvent::MaintenanceFailed {
                            operation,
                            error: classified.clone(),
                        },
                    )
                    .await;
                Err(HeronError::execution(classified.summary))
            }
        }
    }

    async fn plan_and_execute(&self, job: &JobDefinition, dry_run: bool) -> Result<PlanOutcome> {
        let plan = self.planner.plan_backup(job, dry_run)?;

        if !dry_run {
            self.status.set(&job.id, JobState::Running, None).await?;
        }

        self.execute_plan_steps(&plan).await
    }

    /// 顺序执行计划步骤，每一步都写入执行记录
    ///
    /// 步骤失败时中断后续步骤（标记了 allow_failure 的除外）。
    pub async fn execute_plan_steps(&self, plan: &ExecutionPlan) -> Result<PlanOutcome> {
        let run_id = Uuid::new_v4().to_string();

        for step in &plan.steps {
            let result = self.exec.execute(step).await?;

            self.record_step(&run_id, &plan.job_id, step.operation.as_str(), step, &result)
                .await;

            if !result.success && !step.allow_failure {
                return Ok(PlanOutcome::Failed {
                    operation: step.operation.to_string(),
                    result,
                });
            }
        }

        Ok(PlanOutcome::Success)
    }

    /// 把一步执行写进任务执行记录（命令行已脱敏）
    async fn record_step(
        &self,
        run_id: &str,
        job_id: &str,
        operation: &str,
        step: &crate::plan::CommandStep,
        result: &ExecutionResult,
    ) {
        let record = RunLogRecord {
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            command: invocation_line(step),
            exit_code: result.code,
            success: result.success,
            duration_ms: result.elapsed.as_millis() as i64,
            output_tail: output_tail(&result.stdout, &result.stderr),
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.db.append_run_log(record).await {
            warn!("写入任务 {} 的执行记录失败: {}", job_id, e);
        }
    }

    /// 任务当前面对的冲突任务 id（单次检查，不等待）
    async fn current_conflicts(&self, job: &JobDefinition) -> Result<Vec<String>> {
        let resources = crate::conflict::job_resources(job);
        if resources.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .db
            .list_running()
            .await?
            .into_iter()
            .filter(|record| record.job_id != job.id)
            .filter(|record| {
                record
                    .resources
                    .iter()
                    .any(|resource| resources.contains(resource))
            })
            .map(|record| record.job_id)
            .collect())
    }
}

/// 输出摘要：保留 stdout/stderr 的末尾片段
fn output_tail(stdout: &str, stderr: &str) -> Option<String> {
    const MAX_TAIL: usize = 4000;

    let mut combined = String::new();
    if !stdout.trim().is_empty() {
        combined.push_str(stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str("[stderr]\n");
        combined.push_str(stderr.trim_end());
    }

    if combined.is_empty() {
        return None;
    }
    if combined.len() > MAX_TAIL {
        let cut = combined.len() - MAX_TAIL;
        // 从字符边界截断
        let start = combined
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| i >= cut)
            .unwrap_or(0);
        combined = combined[start..].to_string();
    }
    Some(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationSpec, SourcePath, SourceSpec};
    use crate::notify::{NotificationQueue, SenderFn};

    fn test_notifier(db: DbManager) -> Notifier {
        let sender: SenderFn = Arc::new(|_provider, _body| Box::pin(async { Ok(()) }));
        Notifier::with_queue(NotificationQueue::with_sender(db, vec![], sender))
    }

    /// 本地来源 + 本地目的地的同步任务，外部工具可替换
    fn local_job(id: &str, src: &str, dst: &str) -> JobDefinition {
        JobDefinition {
            id: id.to_string(),
            name: None,
            enabled: true,
            schedule: crate::config::ScheduleKind::Cron("0 3 * * *".to_string()),
            source: SourceSpec::Local {
                paths: vec![SourcePath {
                    path: src.to_string(),
                    include: vec![],
                    exclude: vec![],
                }],
            },
            destination: DestinationSpec::Local {
                path: dst.to_string(),
            },
            respect_conflicts: true,
            sync_options: None,
            notifications: vec![],
            maintenance: Default::default(),
        }
    }

    async fn test_runner() -> (JobRunner, DbManager) {
        let db = DbManager::new_memory().await.unwrap();
        let notifier = test_notifier(db.clone());
        let runner = JobRunner::new(db.clone(), AppConfig::default(), notifier);
        (runner, db)
    }

    #[tokio::test]
    async fn test_dry_run_status_sequence() {
        let (runner, db) = test_runner().await;

        let job = local_job("e2e", "/tmp", "/tmp");

        // 预演运行：外部工具以 0 退出时状态序列为 [started, completed_dry_run]
        let result = runner.run(&job, true).await;

        let history = db.get_status_history("e2e", None).await.unwrap();
        let states: Vec<&str> = history.iter().map(|r| r.state.as_str()).collect();

        if result.is_ok() {
            assert_eq!(states, vec!["started", "completed_dry_run"]);
        } else {
            // 环境缺少 rsync 时走失败路径，状态同样收口
            assert_eq!(states, vec!["started", "error_dry_run"]);
        }
    }

    #[tokio::test]
    async fn test_unregister_runs_even_when_execution_fails() {
        let (runner, db) = test_runner().await;

        // 目的地缺少必填字段，规划阶段就失败
        let mut job = local_job("broken", "/tmp", "/tmp");
        job.destination = DestinationSpec::Ssh {
            host: "".to_string(),
            user: "backup".to_string(),
            port: None,
            path: "/backups".to_string(),
        };

        let result = runner.run(&job, false).await;
        assert!(result.is_err());

        // 登记必然被移除
        assert!(db.list_running().await.unwrap().is_empty());

        let last = db.get_last_status("broken").await.unwrap().unwrap();
        assert_eq!(last.state, "error");
    }

    #[tokio::test]
    async fn test_execute_plan_records_transcript() {
        let (runner, db) = test_runner().await;

        let mut step = crate::plan::CommandStep::new(crate::plan::OperationKind::Backup, "echo");
        step.args = vec!["transcript-line".to_string()];
        let plan = ExecutionPlan {
            job_id: "logged".to_string(),
            steps: vec![step],
        };

        let outcome = runner.execute_plan_steps(&plan).await.unwrap();
        assert!(outcome.is_success());

        let log = db.get_run_log("logged", None).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].operation, "backup");
        assert!(log[0].command.contains("echo transcript-line"));
        assert!(log[0].output_tail.as_ref().unwrap().contains("transcript-line"));
    }

    #[tokio::test]
    async fn test_failed_step_interrupts_plan() {
        let (runner, _db) = test_runner().await;

        let mut failing = crate::plan::CommandStep::new(crate::plan::OperationKind::Forget, "sh");
        failing.args = vec!["-c".to_string(), "exit 7".to_string()];
        let mut never_runs = crate::plan::CommandStep::new(crate::plan::OperationKind::Prune, "echo");
        never_runs.args = vec!["unreachable".to_string()];

        let plan = ExecutionPlan {
            job_id: "fails".to_string(),
            steps: vec![failing, never_runs],
        };

        let outcome = runner.execute_plan_steps(&plan).await.unwrap();
        match outcome {
            PlanOutcome::Failed { operation, result } => {
                assert_eq!(operation, "forget");
                assert_eq!(result.code, Some(7));
            }
            PlanOutcome::Success => panic!("计划应当在 forget 步骤中断"),
        }
    }

    #[tokio::test]
    async fn test_allow_failure_step_does_not_interrupt() {
        let (runner, _db) = test_runner().await;

        let mut tolerated = crate::plan::CommandStep::new(crate::plan::OperationKind::Init, "sh");
        tolerated.args = vec!["-c".to_string(), "exit 1".to_string()];
        tolerated.allow_failure = true;
        let mut runs = crate::plan::CommandStep::new(crate::plan::OperationKind::Backup, "echo");
        runs.args = vec!["ran".to_string()];

        let plan = ExecutionPlan {
            job_id: "tolerant".to_string(),
            steps: vec![tolerated, runs],
        };

        let outcome = runner.execute_plan_steps(&plan).await.unwrap();
        assert!(outcome.is_success());
    }
}
