// 命令规划模块
//
// 把任务定义 + 操作类型变换成一份有序的执行计划（ExecutionPlan）。
// 规划是纯函数：不访问网络、不启动进程，配置缺陷在这里同步失败。
//
// 主要组件：
// - Planner: 规划入口，按目的地类型做穷尽分派
// - sync: 文件同步（rsync）备份计划
// - snapshot: 快照工具（restic）备份计划与后端 URI 解析
// - restore: 恢复计划
// - maintenance: 保留清理与完整性检查计划

mod maintenance;
mod restore;
mod snapshot;
mod sync;

pub use maintenance::retention_args;
pub use restore::restore_destinations;
pub use snapshot::{ResolvedRepository, resolve_repository};

use std::collections::BTreeMap;

use crate::config::{AppConfig, DestinationSpec, JobDefinition, SshEndpoint};
use crate::constants::notify::SECRET_PLACEHOLDER;
use crate::error::{HeronError, Result};

/// 计划步骤的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Init,
    Backup,
    Restore,
    Forget,
    Prune,
    Check,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Init => "init",
            OperationKind::Backup => "backup",
            OperationKind::Restore => "restore",
            OperationKind::Forget => "forget",
            OperationKind::Prune => "prune",
            OperationKind::Check => "check",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 步骤的执行通道
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// 本机执行
    Local,
    /// 通过远程 shell 在目标主机执行
    Ssh { endpoint: SshEndpoint },
    /// 通过远程 shell 在目标主机的容器内执行
    SshSandbox { endpoint: SshEndpoint, image: String },
}

/// 步骤的超时档位，具体时长由执行配置决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutBand {
    /// 校验类/预演类：秒到分钟级
    Validate,
    /// 真实传输：默认不限制
    Transfer,
    /// 维护：几十分钟级
    Maintenance,
    /// 恢复：几十分钟级
    Restore,
}

/// 一条待执行命令
#[derive(Debug, Clone)]
pub struct CommandStep {
    pub operation: OperationKind,
    pub transport: Transport,
    /// 展示用仓库/目的地 URI（不含凭据）
    pub repository: Option<String>,
    /// 凭据只经由环境变量传递，绝不进入参数列表
    pub env: BTreeMap<String, String>,
    pub program: String,
    pub args: Vec<String>,
    /// 备份来源路径（快照备份使用）
    pub source_paths: Vec<String>,
    pub timeout: TimeoutBand,
    /// 失败不中断后续步骤（仓库已初始化时 init 会失败）
    pub allow_failure: bool,
    /// 以降低的调度优先级运行（维护任务）
    pub reduced_priority: bool,
    /// 需要在日志与展示中脱敏的值
    pub secrets: Vec<String>,
}

impl CommandStep {
    pub fn new(operation: OperationKind, program: impl Into<String>) -> Self {
        Self {
            operation,
            transport: Transport::Local,
            repository: None,
            env: BTreeMap::new(),
            program: program.into(),
            args: Vec::new(),
            source_paths: Vec::new(),
            timeout: TimeoutBand::Transfer,
            allow_failure: false,
            reduced_priority: false,
            secrets: Vec::new(),
        }
    }

    /// 脱敏后的命令行，所有机密值替换为固定占位符
    pub fn display_command(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        redact(&line, &self.secrets)
    }
}

/// 精确子串替换脱敏
pub fn redact(text: &str, secrets: &[String]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            out = out.replace(secret.as_str(), SECRET_PLACEHOLDER);
        }
    }
    out
}

/// 一次调用的完整执行计划，用完即弃
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub job_id: String,
    pub steps: Vec<CommandStep>,
}

/// 恢复目标位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreTarget {
    /// 恢复到任务专属的暂存目录
    Staging,
    /// 恢复到原始来源路径
    Original,
}

/// 恢复请求
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub job_id: String,
    /// 快照标识，"latest" 表示最新
    pub snapshot_id: String,
    pub target: RestoreTarget,
    /// 选择恢复的路径，空表示全部
    pub paths: Vec<String>,
    pub dry_run: bool,
}

/// 命令规划器
#[derive(Debug, Clone)]
pub struct Planner {
    config: AppConfig,
}

impl Planner {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 规划一次备份
    pub fn plan_backup(&self, job: &JobDefinition, dry_run: bool) -> Result<ExecutionPlan> {
        validate_source(job)?;
        let steps = match &job.destination {
            DestinationSpec::Local { .. }
            | DestinationSpec::Ssh { .. }
            | DestinationSpec::RsyncDaemon { .. } => sync::plan_backup(job, dry_run)?,
            DestinationSpec::Snapshot(dest) => snapshot::plan_backup(job, dest, dry_run)?,
        };
        Ok(ExecutionPlan {
            job_id: job.id.clone(),
            steps,
        })
    }

    /// 规划一次恢复
    pub fn plan_restore(
        &self,
        job: &JobDefinition,
        request: &RestoreRequest,
    ) -> Result<ExecutionPlan> {
        let dest = snapshot_destination(job)?;
        let steps = restore::plan_restore(job, dest, request, &self.config.restore.staging_dir)?;
        Ok(ExecutionPlan {
            job_id: job.id.clone(),
            steps,
        })
    }

    /// 规划一次保留清理（forget + prune）
    pub fn plan_discard(&self, job: &JobDefinition) -> Result<ExecutionPlan> {
        let dest = snapshot_destination(job)?;
        let retention = job
            .maintenance
            .retention
            .clone()
            .unwrap_or_else(|| self.config.maintenance.retention.clone());
        let steps = maintenance::plan_discard(job, dest, &retention)?;
        Ok(ExecutionPlan {
            job_id: job.id.clone(),
            steps,
        })
    }

    /// 规划一次完整性检查
    pub fn plan_check(&self, job: &JobDefinition) -> Result<ExecutionPlan> {
        let dest = snapshot_destination(job)?;
        let steps = maintenance::plan_check(
            job,
            dest,
            self.config.maintenance.read_data_subset_percent,
        )?;
        Ok(ExecutionPlan {
            job_id: job.id.clone(),
            steps,
        })
    }
}

/// 目的地必须是快照仓库，否则属于配置错误
fn snapshot_destination(job: &JobDefinition) -> Result<&crate::config::SnapshotDestination> {
    match &job.destination {
        DestinationSpec::Snapshot(dest) => Ok(dest),
        other => Err(HeronError::config(format!(
            "任务 {} 的目的地类型 {} 不支持该操作，需要快照仓库",
            job.id,
            destination_kind(other)
        ))),
    }
}

pub(crate) fn destination_kind(dest: &DestinationSpec) -> &'static str {
    match dest {
        DestinationSpec::Local { .. } => "local",
        DestinationSpec::Ssh { .. } => "ssh",
        DestinationSpec::RsyncDaemon { .. } => "rsync_daemon",
        DestinationSpec::Snapshot(_) => "snapshot",
    }
}

/// 来源必须至少包含一个非空路径
pub(crate) fn validate_source(job: &JobDefinition) -> Result<()> {
    let paths = job.source.paths();
    if paths.is_empty() {
        return Err(HeronError::config(format!(
            "任务 {} 的来源未配置任何路径",
            job.id
        )));
    }
    for p in paths {
        if p.path.trim().is_empty() {
            return Err(HeronError::config(format!(
                "任务 {} 的来源包含空路径",
                job.id
            )));
        }
    }
    if let crate::config::SourceSpec::Ssh { host, user, .. } = &job.source {
        require_field(&job.id, "source.host", host)?;
        require_field(&job.id, "source.user", user)?;
    }
    Ok(())
}

/// 必填连接字段不能为空，缺失时在规划阶段直接失败
pub(crate) fn require_field(job_id: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HeronError::config(format!(
            "任务 {job_id} 缺少必填字段 {field}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourcePath, SourceSpec};

    fn local_source() -> SourceSpec {
        SourceSpec::Local {
            paths: vec![SourcePath {
                path: "/data".to_string(),
                include: vec![],
                exclude: vec![],
            }],
        }
    }

    #[test]
    fn test_redact_replaces_all_occurrences() {
        let secrets = vec!["s3cret".to_string()];
        let line = "restic backup --password s3cret --again s3cret";
        let redacted = redact(line, &secrets);
        assert!(!redacted.contains("s3cret"));
        assert_eq!(redacted.matches("***").count(), 2);
    }

    #[test]
    fn test_maintenance_on_sync_destination_is_config_error() {
        let job = JobDefinition {
            id: "sync-job".to_string(),
            name: None,
            enabled: true,
            schedule: crate::config::ScheduleKind::Manual,
            source: local_source(),
            destination: DestinationSpec::Local {
                path: "/backups".to_string(),
            },
            respect_conflicts: true,
            sync_options: None,
            notifications: vec![],
            maintenance: Default::default(),
        };

        let planner = Planner::new(AppConfig::default());
        let err = planner.plan_discard(&job).unwrap_err();
        assert!(matches!(err, HeronError::Config(_)));
    }

    #[test]
    fn test_empty_source_is_config_error() {
        let job = JobDefinition {
            id: "empty".to_string(),
            name: None,
            enabled: true,
            schedule: crate::config::ScheduleKind::Manual,
            source: SourceSpec::Local { paths: vec![] },
            destination: DestinationSpec::Local {
                path: "/backups".to_string(),
            },
            respect_conflicts: true,
            sync_options: None,
            notifications: vec![],
            maintenance: Default::default(),
        };

        let planner = Planner::new(AppConfig::default());
        let err = planner.plan_backup(&job, false).unwrap_err();
        assert!(matches!(err, HeronError::Config(_)));
    }
}
