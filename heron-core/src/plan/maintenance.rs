use crate::config::{JobDefinition, RetentionPolicy, SnapshotDestination};
use crate::constants::tools;
use crate::error::Result;

use super::snapshot::{resolve_repository, resolve_transport};
use super::{CommandStep, OperationKind, TimeoutBand};

/// 从保留策略生成 forget 参数
///
/// keep-last 总是包含，其余类别为 0 时省略。
pub fn retention_args(policy: &RetentionPolicy) -> Vec<String> {
    let mut args = vec!["--keep-last".to_string(), policy.keep_last.to_string()];

    let categories = [
        ("--keep-hourly", policy.keep_hourly),
        ("--keep-daily", policy.keep_daily),
        ("--keep-weekly", policy.keep_weekly),
        ("--keep-monthly", policy.keep_monthly),
        ("--keep-yearly", policy.keep_yearly),
    ];
    for (flag, count) in categories {
        if count > 0 {
            args.push(flag.to_string());
            args.push(count.to_string());
        }
    }

    args
}

/// 规划一次保留清理：forget 之后总是执行 prune
pub fn plan_discard(
    job: &JobDefinition,
    dest: &SnapshotDestination,
    retention: &RetentionPolicy,
) -> Result<Vec<CommandStep>> {
    let repo = resolve_repository(&job.id, dest)?;
    let transport = resolve_transport(job, dest);

    let mut forget = CommandStep::new(OperationKind::Forget, tools::SNAPSHOT_TOOL);
    forget.args.push("forget".to_string());
    forget.args.extend(retention_args(retention));
    forget.transport = transport.clone();
    forget.repository = Some(repo.display_uri.clone());
    forget.env = repo.env.clone();
    forget.secrets = repo.secrets.clone();
    forget.timeout = TimeoutBand::Maintenance;
    forget.reduced_priority = true;

    let mut prune = CommandStep::new(OperationKind::Prune, tools::SNAPSHOT_TOOL);
    prune.args.push("prune".to_string());
    prune.transport = transport;
    prune.repository = Some(repo.display_uri);
    prune.env = repo.env;
    prune.secrets = repo.secrets;
    prune.timeout = TimeoutBand::Maintenance;
    prune.reduced_priority = true;

    Ok(vec![forget, prune])
}

/// 规划一次完整性检查
pub fn plan_check(
    job: &JobDefinition,
    dest: &SnapshotDestination,
    read_data_subset_percent: u32,
) -> Result<Vec<CommandStep>> {
    let repo = resolve_repository(&job.id, dest)?;

    let mut check = CommandStep::new(OperationKind::Check, tools::SNAPSHOT_TOOL);
    check.args.push("check".to_string());
    if read_data_subset_percent > 0 {
        check
            .args
            .push(format!("--read-data-subset={read_data_subset_percent}%"));
    }
    check.transport = resolve_transport(job, dest);
    check.repository = Some(repo.display_uri);
    check.env = repo.env;
    check.secrets = repo.secrets;
    check.timeout = TimeoutBand::Maintenance;
    check.reduced_priority = true;

    Ok(vec![check])
}
