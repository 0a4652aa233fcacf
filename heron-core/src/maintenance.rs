use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{AppConfig, DestinationSpec, JobDefinition, MaintenanceConfig, MaintenanceMode};
use crate::error::{HeronError, Result};
use crate::runner::JobRunner;
use crate::scheduler::parse_cron;

/// 仓库维护操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceOp {
    /// 保留清理（forget + prune）
    Discard,
    /// 完整性检查
    Check,
}

impl std::fmt::Display for MaintenanceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaintenanceOp::Discard => f.write_str("保留清理"),
            MaintenanceOp::Check => f.write_str("完整性检查"),
        }
    }
}

/// 仓库维护调度器
///
/// 为每个维护模式为 auto/user 的快照任务注册两个独立触发器：
/// 保留清理与完整性检查。任务保存时总是整体反注册后按当前设置
/// 重建，从不做增量修补；模式 off 或任务删除时反注册（幂等）。
pub struct MaintenanceScheduler {
    timezone: Tz,
    defaults: MaintenanceConfig,
    runner: Arc<JobRunner>,
    triggers: std::sync::Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl MaintenanceScheduler {
    pub fn new(config: &AppConfig, runner: Arc<JobRunner>) -> Result<Arc<Self>> {
        let timezone: Tz = config
            .scheduler
            .timezone
            .parse()
            .map_err(|_| HeronError::config(format!("未知时区: {}", config.scheduler.timezone)))?;

        Ok(Arc::new(Self {
            timezone,
            defaults: config.maintenance.clone(),
            runner,
            triggers: std::sync::Mutex::new(HashMap::new()),
        }))
    }

    /// 按任务当前设置注册维护触发器
    pub fn schedule_job(self: &Arc<Self>, job: &JobDefinition) -> Result<()> {
        self.unschedule_job(&job.id);

        if !job.enabled || !matches!(job.destination, DestinationSpec::Snapshot(_)) {
            return Ok(());
        }
        if job.maintenance.mode == MaintenanceMode::Off {
            return Ok(());
        }

        let discard_expr = self.resolve_expression(job, MaintenanceOp::Discard);
        let check_expr = self.resolve_expression(job, MaintenanceOp::Check);

        let discard_schedule = parse_cron(&discard_expr)?;
        let check_schedule = parse_cron(&check_expr)?;

        info!(
            "注册任务 {} 的维护触发器: 保留清理={} 完整性检查={}",
            job.id, discard_expr, check_expr
        );

        let handles = vec![
            self.spawn_trigger(job.clone(), MaintenanceOp::Discard, discard_schedule),
            self.spawn_trigger(job.clone(), MaintenanceOp::Check, check_schedule),
        ];

        if let Ok(mut triggers) = self.triggers.lock() {
            triggers.insert(job.id.clone(), handles);
        }
        Ok(())
    }

    /// 反注册任务的两个维护触发器（幂等）
    pub fn unschedule_job(&self, job_id: &str) {
        if let Ok(mut triggers) = self.triggers.lock() {
            if let Some(handles) = triggers.remove(job_id) {
                for handle in handles {
                    handle.abort();
                }
                info!("移除任务 {} 的维护触发器", job_id);
            }
        }
    }

    /// 停止所有维护触发器
    pub fn shutdown(&self) {
        if let Ok(mut triggers) = self.triggers.lock() {
            for (_, handles) in triggers.drain() {
                for handle in handles {
                    handle.abort();
                }
            }
        }
    }

    /// 当前注册了维护触发器的任务 id
    pub fn scheduled_jobs(&self) -> Vec<String> {
        self.triggers
            .lock()
            .map(|triggers| triggers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 解析维护操作的 cron 表达式：user 模式优先任务覆盖，其余用全局默认
    fn resolve_expression(&self, job: &JobDefinition, op: MaintenanceOp) -> String {
        let override_expr = match op {
            MaintenanceOp::Discard => job.maintenance.discard_schedule.as_ref(),
            MaintenanceOp::Check => job.maintenance.check_schedule.as_ref(),
        };

        if job.maintenance.mode == MaintenanceMode::User {
            if let Some(expr) = override_expr {
                return expr.clone();
            }
        }

        match op {
            MaintenanceOp::Discard => self.defaults.discard_schedule.clone(),
            MaintenanceOp::Check => self.defaults.check_schedule.clone(),
        }
    }

    fn spawn_trigger(
        self: &Arc<Self>,
        job: JobDefinition,
        op: MaintenanceOp,
        schedule: Schedule,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = Utc::now().with_timezone(&scheduler.timezone);
                let Some(next) = schedule.after(&now).next() else {
                    warn!("任务 {} 的{}触发器没有未来的触发时间，退出", job.id, op);
                    return;
                };

                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;

                info!("触发任务 {} 的{}", job.id, op);
                if let Err(e) = scheduler.runner.run_maintenance(&job, op).await {
                    warn!("任务 {} 的{}执行失败: {}", job.id, op, e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SnapshotBackend, SnapshotDestination, SourcePath, SourceSpec};
    use crate::db::DbManager;
    use crate::notify::{Notifier, NotificationQueue, SenderFn};

    fn snapshot_job(id: &str, mode: MaintenanceMode) -> JobDefinition {
        JobDefinition {
            id: id.to_string(),
            name: None,
            enabled: true,
            schedule: crate::config::ScheduleKind::Manual,
            source: SourceSpec::Local {
                paths: vec![SourcePath {
                    path: "/srv".to_string(),
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
            maintenance: crate::config::MaintenanceSettings {
                mode,
                ..Default::default()
            },
        }
    }

    async fn test_scheduler() -> Arc<MaintenanceScheduler> {
        let db = DbManager::new_memory().await.unwrap();
        let sender: SenderFn = Arc::new(|_provider, _body| Box::pin(async { Ok(()) }));
        let notifier = Notifier::with_queue(NotificationQueue::with_sender(db.clone(), vec![], sender));
        let runner = Arc::new(JobRunner::new(db, AppConfig::default(), notifier));
        MaintenanceScheduler::new(&AppConfig::default(), runner).unwrap()
    }

    #[tokio::test]
    async fn test_auto_mode_registers_both_triggers() {
        let scheduler = test_scheduler().await;
        scheduler
            .schedule_job(&snapshot_job("snap", MaintenanceMode::Auto))
            .unwrap();
        assert_eq!(scheduler.scheduled_jobs(), vec!["snap".to_string()]);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_off_mode_unschedules() {
        let scheduler = test_scheduler().await;
        scheduler
            .schedule_job(&snapshot_job("snap", MaintenanceMode::Auto))
            .unwrap();

        // 保存为 off 模式后整体反注册
        scheduler
            .schedule_job(&snapshot_job("snap", MaintenanceMode::Off))
            .unwrap();
        assert!(scheduler.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_sync_destination_not_scheduled() {
        let scheduler = test_scheduler().await;
        let mut job = snapshot_job("sync", MaintenanceMode::Auto);
        job.destination = DestinationSpec::Local {
            path: "/backups".to_string(),
        };

        scheduler.schedule_job(&job).unwrap();
        assert!(scheduler.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_user_mode_prefers_job_overrides() {
        let scheduler = test_scheduler().await;
        let mut job = snapshot_job("snap", MaintenanceMode::User);
        job.maintenance.discard_schedule = Some("0 5 * * 1".to_string());

        assert_eq!(
            scheduler.resolve_expression(&job, MaintenanceOp::Discard),
            "0 5 * * 1"
        );
        // 未覆盖的操作回落到全局默认
        assert_eq!(
            scheduler.resolve_expression(&job, MaintenanceOp::Check),
            "30 4 1 * *"
        );
    }

    #[tokio::test]
    async fn test_auto_mode_ignores_job_overrides() {
        let scheduler = test_scheduler().await;
        let mut job = snapshot_job("snap", MaintenanceMode::Auto);
        job.maintenance.discard_schedule = Some("0 5 * * 1".to_string());

        assert_eq!(
            scheduler.resolve_expression(&job, MaintenanceOp::Discard),
            "0 4 * * 0"
        );
    }

    #[tokio::test]
    async fn test_unschedule_is_idempotent() {
        let scheduler = test_scheduler().await;
        scheduler.unschedule_job("missing");
        scheduler.unschedule_job("missing");
    }
}
