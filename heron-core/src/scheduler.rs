use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{JobDefinition, ScheduleKind, SchedulePreset, SchedulerConfig};
use crate::error::{HeronError, Result};

/// 触发回调：负责自行派生后台任务，调度器不等待其完成
pub type RunCallback = Arc<dyn Fn(JobDefinition) + Send + Sync>;

/// 把 5 字段 cron 表达式解析成触发计划
///
/// cron 库要求 7 字段（秒 分 时 日 月 星期 年），用户通常提供
/// 5 字段（分 时 日 月 星期），补上秒与年。
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    expr.parse()
        .or_else(|_| {
            let padded = format!("0 {expr} *");
            padded.parse::<Schedule>()
        })
        .map_err(|e| HeronError::Cron(format!("无效的 cron 表达式 '{expr}': {e}")))
}

/// 任务调度器
///
/// 维护任务 id 到 cron 触发器的映射。触发时派生运行回调，不阻塞等待
/// 完成；同一任务跨触发周期的重入不在这里防护，跨任务的资源互斥由
/// 冲突管理器提供。
pub struct Scheduler {
    timezone: Tz,
    config: SchedulerConfig,
    callback: RunCallback,
    triggers: std::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, callback: RunCallback) -> Result<Arc<Self>> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|_| HeronError::config(format!("未知时区: {}", config.timezone)))?;

        Ok(Arc::new(Self {
            timezone,
            config,
            callback,
            triggers: std::sync::Mutex::new(HashMap::new()),
        }))
    }

    /// 命名预设解析成配置的 cron 表达式；manual 不注册任何触发器
    pub fn resolve_expression(&self, kind: &ScheduleKind) -> Option<String> {
        match kind {
            ScheduleKind::Manual => None,
            ScheduleKind::Preset(SchedulePreset::Hourly) => Some(self.config.hourly.clone()),
            ScheduleKind::Preset(SchedulePreset::Daily) => Some(self.config.daily.clone()),
            ScheduleKind::Preset(SchedulePreset::Weekly) => Some(self.config.weekly.clone()),
            ScheduleKind::Preset(SchedulePreset::Monthly) => Some(self.config.monthly.clone()),
            ScheduleKind::Cron(expr) => Some(expr.clone()),
        }
    }

    /// 注册任务触发器（幂等：先移除旧触发器再安装）
    pub fn schedule(self: &Arc<Self>, job: &JobDefinition) -> Result<()> {
        self.unschedule(&job.id);

        if !job.enabled {
            return Ok(());
        }
        let Some(expr) = self.resolve_expression(&job.schedule) else {
            return Ok(());
        };
        let schedule = parse_cron(&expr)?;

        info!("注册任务触发器: {} ({})", job.id, expr);
        let scheduler = Arc::clone(self);
        let job = job.clone();
        let job_id = job.id.clone();
        let handle = tokio::spawn(async move {
            scheduler.trigger_loop(job, schedule).await;
        });

        if let Ok(mut triggers) = self.triggers.lock() {
            triggers.insert(job_id, handle);
        }
        Ok(())
    }

    /// 移除任务触发器（幂等）
    pub fn unschedule(&self, job_id: &str) {
        if let Ok(mut triggers) = self.triggers.lock() {
            if let Some(handle) = triggers.remove(job_id) {
                handle.abort();
                info!("移除任务触发器: {}", job_id);
            }
        }
    }

    /// 停止所有触发器
    pub fn shutdown(&self) {
        if let Ok(mut triggers) = self.triggers.lock() {
            for (_, handle) in triggers.drain() {
                handle.abort();
            }
        }
    }

    /// 当前注册了触发器的任务 id
    pub fn scheduled_jobs(&self) -> Vec<String> {
        self.triggers
            .lock()
            .map(|triggers| triggers.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn trigger_loop(self: Arc<Self>, job: JobDefinition, schedule: Schedule) {
        loop {
            let now = Utc::now().with_timezone(&self.timezone);
            let Some(next) = schedule.after(&now).next() else {
                warn!("任务 {} 没有未来的触发时间，触发器退出", job.id);
                return;
            };

            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;

            info!("触发任务: {}", job.id);
            (self.callback)(job.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manual_job(id: &str, schedule: ScheduleKind) -> JobDefinition {
        JobDefinition {
            id: id.to_string(),
            name: None,
            enabled: true,
            schedule,
            source: crate::config::SourceSpec::Local {
                paths: vec![crate::config::SourcePath {
                    path: "/data".to_string(),
                    include: vec![],
                    exclude: vec![],
                }],
            },
            destination: crate::config::DestinationSpec::Local {
                path: "/backups".to_string(),
            },
            respect_conflicts: true,
            sync_options: None,
            notifications: vec![],
            maintenance: Default::default(),
        }
    }

    fn noop_callback() -> RunCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn test_parse_five_field_cron() {
        let schedule = parse_cron("0 3 * * *").unwrap();
        let next = schedule.upcoming(chrono_tz::UTC).next().unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "03:00");
    }

    #[test]
    fn test_parse_invalid_cron_is_error() {
        assert!(matches!(parse_cron("not a cron"), Err(HeronError::Cron(_))));
    }

    #[tokio::test]
    async fn test_manual_schedule_registers_nothing() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), noop_callback()).unwrap();
        scheduler
            .schedule(&manual_job("manual-job", ScheduleKind::Manual))
            .unwrap();
        assert!(scheduler.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), noop_callback()).unwrap();
        let job = manual_job("daily-job", ScheduleKind::Cron("0 3 * * *".to_string()));

        scheduler.schedule(&job).unwrap();
        scheduler.schedule(&job).unwrap();
        assert_eq!(scheduler.scheduled_jobs(), vec!["daily-job".to_string()]);

        scheduler.unschedule("daily-job");
        assert!(scheduler.scheduled_jobs().is_empty());
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_disabled_job_not_scheduled() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), noop_callback()).unwrap();
        let mut job = manual_job("off-job", ScheduleKind::Cron("0 3 * * *".to_string()));
        job.enabled = false;

        scheduler.schedule(&job).unwrap();
        assert!(scheduler.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_fires_callback_without_blocking() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_callback = Arc::clone(&fired);
        let callback: RunCallback = Arc::new(move |_| {
            fired_in_callback.fetch_add(1, Ordering::SeqCst);
        });

        let scheduler = Scheduler::new(SchedulerConfig::default(), callback).unwrap();
        // 7 字段表达式，每秒触发
        let job = manual_job("fast-job", ScheduleKind::Cron("* * * * * * *".to_string()));
        scheduler.schedule(&job).unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown();

        assert!(fired.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_unknown_timezone_is_config_error() {
        let config = SchedulerConfig {
            timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        assert!(Scheduler::new(config, noop_callback()).is_err());
    }

    #[tokio::test]
    async fn test_preset_resolves_to_configured_expression() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), noop_callback()).unwrap();
        assert_eq!(
            scheduler.resolve_expression(&ScheduleKind::Preset(SchedulePreset::Daily)),
            Some("0 2 * * *".to_string())
        );
        assert_eq!(scheduler.resolve_expression(&ScheduleKind::Manual), None);
    }
}
