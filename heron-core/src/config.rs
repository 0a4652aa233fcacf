use crate::constants::{conflict, database, notify, restore, retention, schedule, timeout};
use crate::error::{HeronError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use toml;

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub conflict: ConflictConfig,
    pub execution: ExecutionConfig,
    pub maintenance: MaintenanceConfig,
    pub restore: RestoreConfig,
    pub database: DatabaseConfig,
    pub providers: Vec<ProviderConfig>,
}

/// 调度器配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 触发器求值使用的时区（IANA 名称）
    pub timezone: String,
    /// 命名预设对应的 cron 表达式
    pub hourly: String,
    pub daily: String,
    pub weekly: String,
    pub monthly: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: schedule::DEFAULT_TIMEZONE.to_string(),
            hourly: schedule::PRESET_HOURLY.to_string(),
            daily: schedule::PRESET_DAILY.to_string(),
            weekly: schedule::PRESET_WEEKLY.to_string(),
            monthly: schedule::PRESET_MONTHLY.to_string(),
        }
    }
}

/// 资源冲突检测配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConflictConfig {
    /// 冲突轮询间隔（秒）
    pub poll_interval_secs: u64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: conflict::DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

/// 命令执行超时配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    /// 校验类/预演类命令的超时（秒）
    pub validate_timeout_secs: u64,
    /// 真实传输命令的超时（秒），None 表示不限制
    pub transfer_timeout_secs: Option<u64>,
    /// 维护命令的超时（秒）
    pub maintenance_timeout_secs: u64,
    /// 恢复命令的超时（秒）
    pub restore_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            validate_timeout_secs: timeout::DEFAULT_VALIDATE_SECS,
            transfer_timeout_secs: None,
            maintenance_timeout_secs: timeout::DEFAULT_MAINTENANCE_SECS,
            restore_timeout_secs: timeout::DEFAULT_RESTORE_SECS,
        }
    }
}

/// 仓库维护全局默认配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// 保留清理（forget + prune）的默认 cron 表达式
    pub discard_schedule: String,
    /// 完整性检查的默认 cron 表达式
    pub check_schedule: String,
    /// 默认保留策略
    pub retention: RetentionPolicy,
    /// check 命令抽样读取的数据比例（百分比）
    pub read_data_subset_percent: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            discard_schedule: schedule::DEFAULT_DISCARD_SCHEDULE.to_string(),
            check_schedule: schedule::DEFAULT_CHECK_SCHEDULE.to_string(),
            retention: RetentionPolicy::default(),
            read_data_subset_percent: retention::DEFAULT_READ_DATA_SUBSET_PERCENT,
        }
    }
}

/// 恢复引擎配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RestoreConfig {
    /// 沙盒恢复使用的暂存目录根路径
    pub staging_dir: String,
    /// 首行输出之前允许的静默时间（秒）
    pub initial_response_timeout_secs: u64,
    /// 出现首行输出之后允许的静默时间（秒）
    pub ongoing_timeout_secs: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            staging_dir: restore::DEFAULT_STAGING_DIR.to_string(),
            initial_response_timeout_secs: restore::DEFAULT_INITIAL_RESPONSE_SECS,
            ongoing_timeout_secs: restore::DEFAULT_ONGOING_SILENCE_SECS,
        }
    }
}

/// 数据库配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// DuckDB 数据库文件路径
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: database::DEFAULT_DB_FILE.to_string(),
        }
    }
}

/// 通知提供方配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    /// 提供方名称，任务通知规则通过该名称引用
    pub name: String,
    #[serde(flatten)]
    pub kind: ProviderKind,
    /// 节流间隔（秒），同一提供方在间隔内的消息会合并成批量通知
    pub batch_interval_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn batch_interval_secs(&self) -> u64 {
        self.batch_interval_secs
            .unwrap_or(notify::DEFAULT_BATCH_INTERVAL_SECS)
    }
}

/// 通知提供方类型
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderKind {
    /// 通用 Webhook，POST JSON 到指定 URL
    Webhook { url: String },
    /// Gotify 服务器
    Gotify { url: String, token: String },
}

// ============ 任务定义（外部配置协作方的只读输入） ============

/// 备份任务定义
///
/// 任务定义由外部配置层维护，核心只读取。
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobDefinition {
    /// 任务唯一标识
    pub id: String,
    /// 展示名称，缺省时使用 id
    pub name: Option<String>,
    /// 是否启用
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 调度方式: "manual"、命名预设或 5 字段 cron 表达式
    pub schedule: ScheduleKind,
    /// 备份来源
    pub source: SourceSpec,
    /// 备份目的地
    pub destination: DestinationSpec,
    /// 是否等待共享资源上的其他任务结束
    #[serde(default = "default_true")]
    pub respect_conflicts: bool,
    /// 自定义同步参数，设置后整体替换默认参数
    pub sync_options: Option<Vec<String>>,
    /// 通知规则
    #[serde(default)]
    pub notifications: Vec<NotificationRule>,
    /// 仓库维护设置
    #[serde(default)]
    pub maintenance: MaintenanceSettings,
}

fn default_true() -> bool {
    true
}

impl JobDefinition {
    /// 展示名称
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// 任务定义文件（jobs.toml）
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct JobsFile {
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

impl JobsFile {
    /// 从指定文件加载任务定义
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let jobs: JobsFile = toml::from_str(&content)?;
        Ok(jobs)
    }

    /// 按 id 查找任务
    pub fn find(&self, id: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

/// 调度方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScheduleKind {
    /// 只允许手动触发
    Manual,
    /// 命名预设
    Preset(SchedulePreset),
    /// 原始 5 字段 cron 表达式
    Cron(String),
}

/// 命名调度预设
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePreset {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl From<String> for ScheduleKind {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        // 含有字段分隔符的字符串按原始 cron 表达式处理
        if trimmed.contains(char::is_whitespace) {
            return ScheduleKind::Cron(trimmed.to_string());
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "manual" | "" => ScheduleKind::Manual,
            "hourly" => ScheduleKind::Preset(SchedulePreset::Hourly),
            "daily" => ScheduleKind::Preset(SchedulePreset::Daily),
            "weekly" => ScheduleKind::Preset(SchedulePreset::Weekly),
            "monthly" => ScheduleKind::Preset(SchedulePreset::Monthly),
            other => ScheduleKind::Cron(other.to_string()),
        }
    }
}

impl From<ScheduleKind> for String {
    fn from(value: ScheduleKind) -> Self {
        match value {
            ScheduleKind::Manual => "manual".to_string(),
            ScheduleKind::Preset(SchedulePreset::Hourly) => "hourly".to_string(),
            ScheduleKind::Preset(SchedulePreset::Daily) => "daily".to_string(),
            ScheduleKind::Preset(SchedulePreset::Weekly) => "weekly".to_string(),
            ScheduleKind::Preset(SchedulePreset::Monthly) => "monthly".to_string(),
            ScheduleKind::Cron(expr) => expr,
        }
    }
}

/// 备份来源的单个路径及其过滤规则
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SourcePath {
    pub path: String,
    /// 包含规则（glob）
    #[serde(default)]
    pub include: Vec<String>,
    /// 排除规则（glob）
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// 备份来源
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    /// 本机目录
    Local { paths: Vec<SourcePath> },
    /// SSH 远程主机上的目录
    Ssh {
        host: String,
        user: String,
        port: Option<u16>,
        paths: Vec<SourcePath>,
    },
}

impl SourceSpec {
    pub fn paths(&self) -> &[SourcePath] {
        match self {
            SourceSpec::Local { paths } => paths,
            SourceSpec::Ssh { paths, .. } => paths,
        }
    }

    /// 来源涉及的远程主机名（本地来源返回 None）
    pub fn host(&self) -> Option<&str> {
        match self {
            SourceSpec::Local { .. } => None,
            SourceSpec::Ssh { host, .. } => Some(host),
        }
    }
}

/// SSH 远程执行端点
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub user: String,
    pub port: Option<u16>,
}

impl SshEndpoint {
    /// user@host 形式的连接目标
    pub fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// 备份目的地
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationSpec {
    /// 本机目录（rsync）
    Local { path: String },
    /// SSH 远程目录（rsync over ssh）
    Ssh {
        host: String,
        user: String,
        port: Option<u16>,
        path: String,
    },
    /// rsync 守护进程共享
    RsyncDaemon {
        host: String,
        module: String,
        path: Option<String>,
        user: Option<String>,
        password: Option<String>,
    },
    /// 快照工具仓库（restic）
    Snapshot(SnapshotDestination),
}

/// 快照仓库目的地
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnapshotDestination {
    /// 仓库密码，只通过环境变量传递
    pub password: String,
    /// 存储后端
    pub backend: SnapshotBackend,
    /// 是否在备份前尝试初始化仓库
    #[serde(default = "default_true")]
    pub auto_init: bool,
    /// 在远程主机上执行快照工具（而不是本机）
    pub exec_host: Option<SshEndpoint>,
    /// 远程执行时使用的容器镜像（设置后在容器内运行快照工具）
    pub sandbox_image: Option<String>,
}

/// 快照仓库存储后端
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum SnapshotBackend {
    /// 本地目录仓库
    LocalPath { path: String },
    /// REST 服务器仓库
    Rest {
        url: String,
        user: Option<String>,
        password: Option<String>,
    },
    /// S3 兼容对象存储仓库
    ObjectStore {
        bucket: String,
        prefix: String,
        region: String,
        endpoint: Option<String>,
        access_key_id: String,
        secret_access_key: String,
    },
    /// rclone 云同步远端仓库
    CloudRemote { remote: String, path: String },
    /// SFTP 仓库
    Sftp {
        host: String,
        user: String,
        port: Option<u16>,
        path: String,
    },
}

/// 通知规则（任务 + 提供方维度）
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationRule {
    /// 引用的提供方名称
    pub provider: String,
    /// 成功通知需要显式开启
    #[serde(default)]
    pub on_success: bool,
    /// 失败通知默认开启
    #[serde(default = "default_true")]
    pub on_failure: bool,
    /// 维护失败通知需要显式开启
    #[serde(default)]
    pub on_maintenance_failure: bool,
    /// 自定义成功模板，优先于提供方默认模板
    pub success_template: Option<String>,
    /// 自定义失败模板
    pub failure_template: Option<String>,
}

/// 仓库维护模式
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceMode {
    /// 使用全局默认调度和保留策略
    #[default]
    Auto,
    /// 使用任务自定义的调度/保留策略
    User,
    /// 不做维护
    Off,
}

/// 任务级仓库维护设置
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub mode: MaintenanceMode,
    /// 覆盖全局的保留清理 cron 表达式
    pub discard_schedule: Option<String>,
    /// 覆盖全局的完整性检查 cron 表达式
    pub check_schedule: Option<String>,
    /// 覆盖全局的保留策略
    pub retention: Option<RetentionPolicy>,
}

/// 快照保留策略
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionPolicy {
    pub keep_last: u32,
    pub keep_hourly: u32,
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    pub keep_yearly: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_last: retention::DEFAULT_KEEP_LAST,
            keep_hourly: 0,
            keep_daily: retention::DEFAULT_KEEP_DAILY,
            keep_weekly: retention::DEFAULT_KEEP_WEEKLY,
            keep_monthly: retention::DEFAULT_KEEP_MONTHLY,
            keep_yearly: 0,
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> heron.toml -> .heron.toml
    pub fn find_and_load_config() -> Result<Self> {
        let config_files = ["config.toml", "heron.toml", ".heron.toml"];

        for config_file in &config_files {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        Err(HeronError::ConfigNotFound)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_with_comments();
        fs::write(&path, content)?;
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> String {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        TEMPLATE
            .replace("{timezone}", &self.scheduler.timezone)
            .replace("{database_path}", &self.database.path)
            .replace("{staging_dir}", &self.restore.staging_dir)
            .replace(
                "{poll_interval_secs}",
                &self.conflict.poll_interval_secs.to_string(),
            )
    }

    /// 按名称查找通知提供方
    pub fn find_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_kind_parsing() {
        assert_eq!(ScheduleKind::from("manual".to_string()), ScheduleKind::Manual);
        assert_eq!(
            ScheduleKind::from("daily".to_string()),
            ScheduleKind::Preset(SchedulePreset::Daily)
        );
        // 含空白分隔符的字符串按原始 cron 表达式处理
        assert_eq!(
            ScheduleKind::from("0 3 * * *".to_string()),
            ScheduleKind::Cron("0 3 * * *".to_string())
        );
    }

    #[test]
    fn test_job_definition_from_toml() {
        let toml_str = r#"
            [[jobs]]
            id = "data"
            schedule = "0 3 * * *"

            [jobs.source]
            type = "local"
            [[jobs.source.paths]]
            path = "/data"
            exclude = ["*.tmp"]

            [jobs.destination]
            type = "ssh"
            host = "nas.local"
            user = "backup"
            path = "/backups"
        "#;

        let file: JobsFile = toml::from_str(toml_str).unwrap();
        let job = file.find("data").unwrap();
        assert!(job.enabled);
        assert!(job.respect_conflicts);
        assert_eq!(job.schedule, ScheduleKind::Cron("0 3 * * *".to_string()));
        assert_eq!(job.source.paths()[0].exclude, vec!["*.tmp"]);
        match &job.destination {
            DestinationSpec::Ssh { host, .. } => assert_eq!(host, "nas.local"),
            other => panic!("目的地类型不正确: {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_destination_from_toml() {
        let toml_str = r#"
            [[jobs]]
            id = "snap"
            schedule = "daily"

            [jobs.source]
            type = "local"
            [[jobs.source.paths]]
            path = "/srv"

            [jobs.destination]
            type = "snapshot"
            password = "repo-pass"
            [jobs.destination.backend]
            backend = "object_store"
            bucket = "backups"
            prefix = "srv"
            region = "eu-west-1"
            access_key_id = "AKIA"
            secret_access_key = "SECRET"
        "#;

        let file: JobsFile = toml::from_str(toml_str).unwrap();
        let job = file.find("snap").unwrap();
        match &job.destination {
            DestinationSpec::Snapshot(snap) => {
                assert!(snap.auto_init);
                match &snap.backend {
                    SnapshotBackend::ObjectStore { bucket, region, .. } => {
                        assert_eq!(bucket, "backups");
                        assert_eq!(region, "eu-west-1");
                    }
                    other => panic!("后端类型不正确: {other:?}"),
                }
            }
            other => panic!("目的地类型不正确: {other:?}"),
        }
    }

    #[test]
    fn test_default_config_roundtrip() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.timezone, "UTC");
        assert_eq!(config.conflict.poll_interval_secs, 15);
        assert!(config.execution.transfer_timeout_secs.is_none());
    }
}
