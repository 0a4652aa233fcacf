// 通知模块
//
// 把任务生命周期事件格式化成每个提供方的通知正文，并按提供方节流
// 批量发送，避免告警刷屏。
//
// 主要组件：
// - Notifier: 事件入口，按任务通知规则路由
// - NotificationQueue: 按提供方节流的持久化队列
// - classify: 失败文本的粗分类与处理建议
// - template: 模板变量替换

mod classify;
mod queue;
mod template;

pub use classify::{ClassifiedError, ErrorCategory, classify};
pub use queue::{NotificationQueue, SenderFn};
pub use template::{TemplateVars, format_duration, render};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::config::{AppConfig, JobDefinition, NotificationRule};
use crate::constants::notify as notify_consts;
use crate::db::{DbManager, QueuedNotification};
use crate::error::Result;

/// 任务生命周期事件
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    /// 备份成功
    Succeeded { duration: Duration },
    /// 备份失败
    Failed { error: ClassifiedError },
    /// 仓库维护失败
    MaintenanceFailed {
        operation: String,
        error: ClassifiedError,
    },
    /// 因资源冲突等待
    Delayed {
        waited: Duration,
        conflicting: Vec<String>,
    },
}

/// 通知调度器
///
/// 成功通知按任务+提供方显式开启；失败通知默认开启，可显式关闭；
/// 维护失败通知显式开启。任务自定义模板优先于提供方默认模板。
#[derive(Clone)]
pub struct Notifier {
    queue: Arc<NotificationQueue>,
}

impl Notifier {
    pub fn new(db: DbManager, config: &AppConfig) -> Self {
        Self {
            queue: NotificationQueue::new(db, config.providers.clone()),
        }
    }

    /// 注入自定义投递回调（测试使用）
    pub fn with_queue(queue: Arc<NotificationQueue>) -> Self {
        Self { queue }
    }

    /// 分发一个事件到任务配置的所有提供方
    ///
    /// 通知失败只记录日志，绝不影响任务本身的结果。
    pub async fn dispatch(&self, job: &JobDefinition, event: &NotifyEvent) {
        for rule in &job.notifications {
            if let Err(e) = self.dispatch_rule(job, rule, event).await {
                warn!(
                    "任务 {} 的通知发送失败: provider={} ({})",
                    job.id, rule.provider, e
                );
            }
        }
    }

    async fn dispatch_rule(
        &self,
        job: &JobDefinition,
        rule: &NotificationRule,
        event: &NotifyEvent,
    ) -> Result<()> {
        let (enabled, kind, template, vars) = match event {
            NotifyEvent::Succeeded { duration } => (
                rule.on_success,
                "success",
                rule.success_template
                    .as_deref()
                    .unwrap_or(notify_consts::DEFAULT_SUCCESS_TEMPLATE),
                TemplateVars::for_job(job.display_name()).with_duration(*duration),
            ),
            NotifyEvent::Failed { error } => (
                rule.on_failure,
                "failure",
                rule.failure_template
                    .as_deref()
                    .unwrap_or(notify_consts::DEFAULT_FAILURE_TEMPLATE),
                TemplateVars::for_job(job.display_name())
                    .with_error(format!("{}（建议: {}）", error.summary, error.remediation)),
            ),
            NotifyEvent::MaintenanceFailed { operation, error } => (
                rule.on_maintenance_failure,
                "maintenance_failure",
                notify_consts::DEFAULT_MAINTENANCE_TEMPLATE,
                TemplateVars::for_job(job.display_name())
                    .with_error(format!("{operation}: {}", error.summary)),
            ),
            NotifyEvent::Delayed { waited, conflicting } => (
                rule.on_failure,
                "delay",
                notify_consts::DEFAULT_DELAY_TEMPLATE,
                TemplateVars::for_job(job.display_name())
                    .with_duration(*waited)
                    .with_error(conflicting.join(", ")),
            ),
        };

        if !enabled {
            return Ok(());
        }

        let body = render(template, &vars);
        let message = QueuedNotification {
            kind: kind.to_string(),
            job_id: job.id.clone(),
            body,
            created_at: Utc::now(),
        };
        self.queue.submit(message, &rule.provider).await
    }
}
