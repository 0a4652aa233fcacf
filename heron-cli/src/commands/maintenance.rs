use heron_core::{Result, constants::tools, exec::ensure_tool, maintenance::MaintenanceOp};
use tracing::{error, info};

use crate::app::CliApp;
use crate::cli::MaintenanceCommand;

pub async fn handle_maintenance_command(app: &CliApp, command: MaintenanceCommand) -> Result<()> {
    let (job_id, op) = match command {
        MaintenanceCommand::Discard { job_id } => (job_id, MaintenanceOp::Discard),
        MaintenanceCommand::Check { job_id } => (job_id, MaintenanceOp::Check),
    };

    let job = app.find_job(&job_id)?;
    ensure_tool(tools::SNAPSHOT_TOOL)?;

    info!("🧹 执行任务 {} 的{}", job.id, op);
    match app.runner.run_maintenance(&job, op).await {
        Ok(()) => {
            info!("✅ {}完成", op);
            Ok(())
        }
        Err(e) => {
            error!("❌ {}失败: {}", op, e);
            Err(e)
        }
    }
}
