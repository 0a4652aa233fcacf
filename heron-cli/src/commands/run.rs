use heron_core::{Result, config::ScheduleKind, constants::tools, exec::ensure_tool};
use tracing::{error, info};

use crate::app::CliApp;

/// 手动触发一次备份任务
pub async fn run_job(app: &CliApp, job_id: &str, dry_run: bool) -> Result<()> {
    let job = app.find_job(job_id)?;

    if dry_run {
        info!("🔍 预演运行任务: {}", job.display_name());
    } else {
        info!("💾 运行备份任务: {}", job.display_name());
    }

    // 先确认外部工具可用，给出友好错误
    let tool = match &job.destination {
        heron_core::config::DestinationSpec::Snapshot(_) => tools::SNAPSHOT_TOOL,
        _ => tools::SYNC_TOOL,
    };
    ensure_tool(tool)?;

    match app.runner.run(&job, dry_run).await {
        Ok(()) => {
            info!("✅ 任务 {} 完成", job.id);
            Ok(())
        }
        Err(e) => {
            error!("❌ 任务 {} 失败: {}", job.id, e);
            Err(e)
        }
    }
}

/// 列出全部任务定义
pub async fn run_jobs(app: &CliApp) -> Result<()> {
    info!("📋 任务定义");
    info!("===========");

    if app.jobs.jobs.is_empty() {
        info!("（没有任务，编辑 jobs.toml 添加）");
        return Ok(());
    }

    for job in &app.jobs.jobs {
        let schedule: String = job.schedule.clone().into();
        let enabled = if job.enabled { "启用" } else { "禁用" };
        info!(
            "  {} [{}] 调度: {} 目的地: {}",
            job.id,
            enabled,
            if matches!(job.schedule, ScheduleKind::Manual) {
                "手动".to_string()
            } else {
                schedule
            },
            destination_summary(job),
        );
    }
    Ok(())
}

fn destination_summary(job: &heron_core::config::JobDefinition) -> String {
    use heron_core::config::DestinationSpec;
    match &job.destination {
        DestinationSpec::Local { path } => format!("local:{path}"),
        DestinationSpec::Ssh { host, path, .. } => format!("ssh:{host}:{path}"),
        DestinationSpec::RsyncDaemon { host, module, .. } => format!("rsyncd:{host}/{module}"),
        DestinationSpec::Snapshot(dest) => {
            match heron_core::plan::resolve_repository(&job.id, dest) {
                Ok(repo) => repo.display_uri,
                Err(_) => "snapshot:<配置不完整>".to_string(),
            }
        }
    }
}
