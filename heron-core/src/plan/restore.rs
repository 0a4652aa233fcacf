use crate::config::{JobDefinition, SnapshotDestination};
use crate::constants::tools;
use crate::error::Result;

use super::snapshot::{resolve_repository, resolve_transport};
use super::{CommandStep, OperationKind, RestoreRequest, RestoreTarget, TimeoutBand};

/// 规划一次恢复（单命令计划）
///
/// 目标位置是任务专属的暂存目录或原始来源路径。选择部分路径时通过
/// 包含过滤器收窄恢复范围。
pub fn plan_restore(
    job: &JobDefinition,
    dest: &SnapshotDestination,
    request: &RestoreRequest,
    staging_root: &str,
) -> Result<Vec<CommandStep>> {
    let repo = resolve_repository(&job.id, dest)?;

    let target = match request.target {
        RestoreTarget::Staging => {
            format!("{}/{}", staging_root.trim_end_matches('/'), job.id)
        }
        // 快照里保存的是绝对路径，恢复到根目录即回到原位
        RestoreTarget::Original => "/".to_string(),
    };

    let mut step = CommandStep::new(OperationKind::Restore, tools::SNAPSHOT_TOOL);
    step.args.push("restore".to_string());
    step.args.push(request.snapshot_id.clone());
    step.args.push("--target".to_string());
    step.args.push(target.clone());
    step.args.push("--json".to_string());

    for path in &request.paths {
        step.args.push("--include".to_string());
        step.args.push(path.clone());
    }

    if request.dry_run {
        step.args.push("--dry-run".to_string());
    }

    step.transport = resolve_transport(job, dest);
    step.repository = Some(repo.display_uri);
    step.env = repo.env;
    step.secrets = repo.secrets;
    step.timeout = if request.dry_run {
        TimeoutBand::Validate
    } else {
        TimeoutBand::Restore
    };

    Ok(vec![step])
}

/// 恢复请求的目标路径集合（覆盖检测使用）
pub fn restore_destinations(
    job: &JobDefinition,
    request: &RestoreRequest,
    staging_root: &str,
) -> Vec<String> {
    match request.target {
        RestoreTarget::Staging => {
            vec![format!("{}/{}", staging_root.trim_end_matches('/'), job.id)]
        }
        RestoreTarget::Original => {
            if request.paths.is_empty() {
                job.source.paths().iter().map(|p| p.path.clone()).collect()
            } else {
                request.paths.clone()
            }
        }
    }
}
