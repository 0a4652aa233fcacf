use heron_core::Result;
use tracing::info;

use crate::app::CliApp;

/// 显示任务状态
pub async fn run_status(app: &CliApp, job_id: Option<&str>) -> Result<()> {
    info!("📊 任务状态");
    info!("===========");

    let running = app.runner.conflicts().running_jobs().await?;
    if !running.is_empty() {
        info!("运行中: {}", running.join(", "));
    }

    let job_ids: Vec<String> = match job_id {
        Some(id) => vec![id.to_string()],
        None => app.jobs.jobs.iter().map(|j| j.id.clone()).collect(),
    };

    for id in job_ids {
        match app.runner.status().last(&id).await? {
            Some(record) => {
                let message = record.message.as_deref().unwrap_or("-");
                info!(
                    "  {} 状态: {} 时间: {} 说明: {}",
                    id,
                    record.state,
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    message
                );
            }
            None => info!("  {} 尚未运行", id),
        }
    }
    Ok(())
}

/// 显示任务执行记录
pub async fn run_log(app: &CliApp, job_id: &str, limit: u32) -> Result<()> {
    info!("📜 任务 {} 的执行记录", job_id);
    info!("====================");

    let records = app.db.get_run_log(job_id, Some(limit)).await?;
    if records.is_empty() {
        info!("（没有执行记录）");
        return Ok(());
    }

    for record in records {
        let outcome = if record.success { "成功" } else { "失败" };
        info!(
            "  [{}] {} {} 退出码: {:?} 耗时: {}ms",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.operation,
            outcome,
            record.exit_code,
            record.duration_ms
        );
        info!("    命令: {}", record.command);
        if let Some(tail) = &record.output_tail {
            for line in tail.lines().take(5) {
                info!("    | {}", line);
            }
        }
    }
    Ok(())
}
