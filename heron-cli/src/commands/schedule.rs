use std::sync::Arc;

use heron_core::{
    Result,
    config::ScheduleKind,
    constants::tools,
    exec::ensure_tool,
    maintenance::MaintenanceScheduler,
    scheduler::{RunCallback, Scheduler},
};
use tracing::{info, warn};

use crate::app::CliApp;

/// 以调度守护模式运行
///
/// 注册全部启用任务的 cron 触发器与维护触发器，收到 Ctrl-C 后退出。
pub async fn run_schedule(app: &CliApp) -> Result<()> {
    info!("⏰ 启动调度守护");
    info!("===============");

    // 外部工具缺失只警告：对应任务会在执行时失败并通知
    for tool in [tools::SYNC_TOOL, tools::SNAPSHOT_TOOL, tools::REMOTE_SHELL] {
        if let Err(e) = ensure_tool(tool) {
            warn!("⚠️  {}", e);
        }
    }

    let runner = Arc::clone(&app.runner);
    let callback: RunCallback = Arc::new(move |job| {
        runner.spawn_run(job, false);
    });

    let scheduler = Scheduler::new(app.config.scheduler.clone(), callback)?;
    let maintenance = MaintenanceScheduler::new(&app.config, Arc::clone(&app.runner))?;

    let mut scheduled = 0usize;
    for job in &app.jobs.jobs {
        if !job.enabled {
            continue;
        }
        if !matches!(job.schedule, ScheduleKind::Manual) {
            scheduler.schedule(job)?;
            scheduled += 1;
        }
        maintenance.schedule_job(job)?;
    }

    info!(
        "✅ 已注册 {} 个备份触发器、{} 个维护任务，Ctrl-C 退出",
        scheduled,
        maintenance.scheduled_jobs().len()
    );

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，停止调度");
    scheduler.shutdown();
    maintenance.shutdown();
    Ok(())
}
