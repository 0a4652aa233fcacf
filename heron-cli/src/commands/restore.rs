use std::time::Duration;

use heron_core::{
    Result,
    constants::tools,
    exec::ensure_tool,
    plan::{RestoreRequest, RestoreTarget},
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::app::CliApp;
use crate::cli::RestoreCommand;

pub async fn handle_restore_command(app: &CliApp, command: RestoreCommand) -> Result<()> {
    match command {
        RestoreCommand::Run {
            job_id,
            snapshot,
            original,
            paths,
            dry_run,
            force,
        } => {
            run_restore(app, &job_id, &snapshot, original, paths, dry_run, force).await
        }
        RestoreCommand::Status { job_id } => show_restore_status(app, &job_id).await,
        RestoreCommand::History { job_id, limit } => {
            show_restore_history(app, job_id, limit).await
        }
    }
}

/// 启动一次恢复
async fn run_restore(
    app: &CliApp,
    job_id: &str,
    snapshot: &str,
    original: bool,
    paths: Vec<String>,
    dry_run: bool,
    force: bool,
) -> Result<()> {
    let job = app.find_job(job_id)?;
    ensure_tool(tools::SNAPSHOT_TOOL)?;

    let request = RestoreRequest {
        job_id: job.id.clone(),
        snapshot_id: snapshot.to_string(),
        target: if original {
            RestoreTarget::Original
        } else {
            RestoreTarget::Staging
        },
        paths,
        dry_run,
    };

    // 预演恢复走同步路径，直接展示结果
    if dry_run {
        info!("🔍 预演恢复任务 {} 的快照 {}", job.id, snapshot);
        let result = app.restore_engine.dry_run(&job, &request).await?;
        if result.success {
            info!("✅ 预演完成");
            for line in result.stdout.lines().take(20) {
                info!("  | {}", line);
            }
        } else {
            error!("❌ 预演失败（退出码 {:?}）: {}", result.code, result.stderr);
        }
        return Ok(());
    }

    // 1. 覆盖检测：只作为确认步骤，不阻止恢复本身
    let report = app.restore_engine.check_overwrite(&job, &request).await?;
    if report.would_overwrite && !force {
        warn!("⚠️  以下目标路径已存在非空内容:");
        for path in &report.colliding_paths {
            warn!("   - {}", path);
        }
        warn!("💡 确认无误后使用 --force 继续");
        return Ok(());
    }

    // 2. 启动后台恢复并轮询进度
    info!("📦 开始恢复任务 {} 的快照 {}", job.id, snapshot);
    app.restore_engine.start(job.clone(), request).await?;

    let bar = ProgressBar::new(100);
    if let Ok(style) =
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}% {msg}")
    {
        bar.set_style(style);
    }

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        match app.restore_engine.active_status(&job.id) {
            Some(status) => {
                bar.set_position((status.percent * 100.0) as u64);
                bar.set_message(format!(
                    "{}/{} 个文件",
                    status.files_restored, status.total_files
                ));
            }
            None => break,
        }
    }
    bar.finish_and_clear();

    // 3. 展示终态
    match app.runner.status().last(&job.id).await? {
        Some(record) if record.state == "restore_completed" => {
            info!("✅ 恢复完成: {}", record.message.as_deref().unwrap_or("-"));
        }
        Some(record) => {
            error!("❌ 恢复失败: {}", record.message.as_deref().unwrap_or("-"));
        }
        None => warn!("❓ 未找到恢复状态"),
    }
    Ok(())
}

/// 查询进行中恢复的进度
async fn show_restore_status(app: &CliApp, job_id: &str) -> Result<()> {
    match app.restore_engine.active_status(job_id) {
        Some(status) => {
            info!(
                "📦 任务 {} 恢复中: {:.1}% 文件 {}/{} 字节 {}/{}",
                job_id,
                status.percent * 100.0,
                status.files_restored,
                status.total_files,
                status.bytes_restored,
                status.total_bytes
            );
        }
        None => info!("任务 {} 当前没有进行中的恢复", job_id),
    }
    Ok(())
}

/// 显示恢复历史
async fn show_restore_history(app: &CliApp, job_id: Option<String>, limit: u32) -> Result<()> {
    info!("📜 恢复历史");
    info!("===========");

    let records = app.restore_engine.history(job_id, Some(limit)).await?;
    if records.is_empty() {
        info!("（没有恢复记录）");
        return Ok(());
    }

    for record in records {
        let outcome = if record.success { "成功" } else { "失败" };
        info!(
            "  [{}] {} 快照: {} 目标: {} {} {}",
            record.finished_at.format("%Y-%m-%d %H:%M:%S"),
            record.job_id,
            record.snapshot_id,
            record.target,
            outcome,
            record.message.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
