use heron_core::{HeronError, Result, config::AppConfig};
use std::path::Path;
use tracing::info;

/// 任务定义示例文件
const JOBS_TEMPLATE: &str = r#"# Heron 任务定义文件
# 每个 [[jobs]] 块描述一个备份任务

# [[jobs]]
# id = "photos"
# name = "照片备份"
# # manual / hourly / daily / weekly / monthly 或 5 字段 cron 表达式
# schedule = "0 3 * * *"
#
# [jobs.source]
# type = "local"
# [[jobs.source.paths]]
# path = "/srv/photos"
# exclude = ["*.tmp"]
#
# [jobs.destination]
# type = "snapshot"
# password = "repo-password"
# [jobs.destination.backend]
# backend = "sftp"
# host = "vault.example"
# user = "backup"
# path = "/repos/photos"
#
# [[jobs.notifications]]
# provider = "ops-webhook"
# on_success = false
# on_failure = true
"#;

/// 初始化客户端：创建默认配置文件与任务定义示例
pub async fn run_init(force: bool) -> Result<()> {
    info!("🚀 初始化 Heron 配置");

    if Path::new("config.toml").exists() && !force {
        return Err(HeronError::custom(
            "config.toml 已存在，使用 --force 强制覆盖",
        ));
    }

    let config = AppConfig::default();
    config.save_to_file("config.toml")?;
    info!("✅ 已创建配置文件: config.toml");

    if !Path::new("jobs.toml").exists() || force {
        std::fs::write("jobs.toml", JOBS_TEMPLATE)?;
        info!("✅ 已创建任务定义示例: jobs.toml");
    }

    info!("💡 编辑 jobs.toml 定义备份任务后，运行 'heron-cli schedule' 启动调度");
    Ok(())
}
