/// 外部工具相关常量
pub mod tools {
    /// 文件同步工具
    pub const SYNC_TOOL: &str = "rsync";

    /// 快照备份工具
    pub const SNAPSHOT_TOOL: &str = "restic";

    /// 远程 shell 客户端
    pub const REMOTE_SHELL: &str = "ssh";

    /// 降低 CPU 调度优先级的包装命令（维护任务使用）
    pub const NICE_PREFIX: [&str; 3] = ["nice", "-n", "10"];

    /// 降低 IO 调度优先级的包装命令（维护任务使用）
    pub const IONICE_PREFIX: [&str; 3] = ["ionice", "-c2", "-n7"];
}

/// 文件同步默认参数
pub mod sync {
    /// 默认 rsync 参数，任务自定义参数会整体替换而不是合并
    pub const DEFAULT_OPTIONS: [&str; 4] = ["-a", "--info=stats1", "--delete", "--delete-excluded"];

    /// 预演模式插入的参数
    pub const DRY_RUN_OPTIONS: [&str; 2] = ["--dry-run", "--verbose"];
}

/// 调度相关常量
pub mod schedule {
    /// 默认时区
    pub const DEFAULT_TIMEZONE: &str = "UTC";

    /// 命名预设对应的默认 cron 表达式（5 字段）
    pub const PRESET_HOURLY: &str = "0 * * * *";
    pub const PRESET_DAILY: &str = "0 2 * * *";
    pub const PRESET_WEEKLY: &str = "0 3 * * 0";
    pub const PRESET_MONTHLY: &str = "30 3 1 * *";

    /// 维护任务默认 cron 表达式
    pub const DEFAULT_DISCARD_SCHEDULE: &str = "0 4 * * 0";
    pub const DEFAULT_CHECK_SCHEDULE: &str = "30 4 1 * *";
}

/// 资源冲突检测相关常量
pub mod conflict {
    /// 冲突轮询间隔（秒）
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
}

/// 命令执行超时相关常量
pub mod timeout {
    /// 校验类/预演类命令的超时（秒）
    pub const DEFAULT_VALIDATE_SECS: u64 = 300;

    /// 维护命令（forget/prune/check）的超时（秒）
    pub const DEFAULT_MAINTENANCE_SECS: u64 = 3600;

    /// 恢复命令的超时（秒）
    pub const DEFAULT_RESTORE_SECS: u64 = 3600;

    /// 超时对应的哨兵返回码
    pub const TIMEOUT_EXIT_CODE: i32 = -255;

    /// 进程无法启动对应的哨兵返回码
    pub const SPAWN_FAILED_EXIT_CODE: i32 = -254;
}

/// 恢复进度监控相关常量
pub mod restore {
    /// 首行输出之前允许的静默时间（秒）
    pub const DEFAULT_INITIAL_RESPONSE_SECS: u64 = 120;

    /// 出现首行输出之后允许的静默时间（秒）
    pub const DEFAULT_ONGOING_SILENCE_SECS: u64 = 30;

    /// 默认的恢复暂存目录
    pub const DEFAULT_STAGING_DIR: &str = "restore-staging";

    /// 覆盖检测返回的冲突路径数量上限
    pub const OVERWRITE_LIST_LIMIT: usize = 20;
}

/// 通知相关常量
pub mod notify {
    /// 默认的提供方节流间隔（秒）
    pub const DEFAULT_BATCH_INTERVAL_SECS: u64 = 300;

    /// 日志与通知中替换机密值的占位符
    pub const SECRET_PLACEHOLDER: &str = "***";

    /// 成功通知默认模板
    pub const DEFAULT_SUCCESS_TEMPLATE: &str = "✅ 备份任务 {job} 完成，耗时 {duration}（{timestamp}）";

    /// 失败通知默认模板
    pub const DEFAULT_FAILURE_TEMPLATE: &str = "❌ 备份任务 {job} 失败: {error}（{timestamp}）";

    /// 维护失败通知默认模板
    pub const DEFAULT_MAINTENANCE_TEMPLATE: &str = "⚠️ 任务 {job} 的仓库维护失败: {error}（{timestamp}）";

    /// 冲突等待通知默认模板
    pub const DEFAULT_DELAY_TEMPLATE: &str = "⏳ 任务 {job} 因资源冲突等待 {duration}，冲突任务: {error}";
}

/// 维护任务默认保留策略
pub mod retention {
    pub const DEFAULT_KEEP_LAST: u32 = 7;
    pub const DEFAULT_KEEP_DAILY: u32 = 7;
    pub const DEFAULT_KEEP_WEEKLY: u32 = 4;
    pub const DEFAULT_KEEP_MONTHLY: u32 = 6;

    /// check 命令默认抽样读取的数据比例（百分比）
    pub const DEFAULT_READ_DATA_SUBSET_PERCENT: u32 = 10;
}

/// 数据库相关常量
pub mod database {
    /// 默认数据库文件名
    pub const DEFAULT_DB_FILE: &str = "heron.db";
}
