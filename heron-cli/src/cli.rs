use crate::project_info::{metadata, version_info};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 恢复相关命令
#[derive(Subcommand, Debug)]
pub enum RestoreCommand {
    /// 启动一次恢复
    Run {
        /// 任务 id
        job_id: String,
        /// 快照标识（默认最新）
        #[arg(long, default_value = "latest")]
        snapshot: String,
        /// 恢复到原始来源路径（默认恢复到暂存目录）
        #[arg(long)]
        original: bool,
        /// 只恢复指定路径（可多次指定，默认全部）
        #[arg(long = "path")]
        paths: Vec<String>,
        /// 预演模式，不写入任何数据
        #[arg(long)]
        dry_run: bool,
        /// 跳过覆盖确认
        #[arg(long)]
        force: bool,
    },
    /// 查询进行中恢复的进度
    Status {
        /// 任务 id
        job_id: String,
    },
    /// 显示恢复历史
    History {
        /// 任务 id（缺省显示全部）
        job_id: Option<String>,
        /// 显示条数
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

/// 仓库维护相关命令
#[derive(Subcommand, Debug)]
pub enum MaintenanceCommand {
    /// 立即执行一次保留清理（forget + prune）
    Discard {
        /// 任务 id
        job_id: String,
    },
    /// 立即执行一次完整性检查
    Check {
        /// 任务 id
        job_id: String,
    },
}

/// Heron CLI - 备份任务编排与调度工具
#[derive(Parser)]
#[command(name = "heron-cli")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::CLI_VERSION)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// 任务定义文件路径
    #[arg(short, long, default_value = "jobs.toml")]
    pub jobs: PathBuf,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 首次使用时初始化，创建默认配置文件
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 列出全部任务定义
    Jobs,
    /// 手动触发一次备份任务
    Run {
        /// 任务 id
        job_id: String,
        /// 预演模式，不写入任何数据
        #[arg(long)]
        dry_run: bool,
    },
    /// 显示任务状态
    Status {
        /// 任务 id（缺省显示全部任务）
        job_id: Option<String>,
    },
    /// 显示任务执行记录
    Log {
        /// 任务 id
        job_id: String,
        /// 显示条数
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// 以调度守护模式运行，按 cron 触发备份与维护
    Schedule,
    /// 恢复管理
    #[command(subcommand)]
    Restore(RestoreCommand),
    /// 仓库维护
    #[command(subcommand)]
    Maintenance(MaintenanceCommand),
}
