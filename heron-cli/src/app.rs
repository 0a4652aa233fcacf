use std::path::Path;
use std::sync::Arc;

use heron_core::{
    HeronError, Result,
    config::{AppConfig, JobDefinition, JobsFile},
    db::DbManager,
    notify::Notifier,
    restore::RestoreEngine,
    runner::JobRunner,
};
use tracing::warn;

use crate::cli::Commands;
use crate::commands;

/// CLI 应用
#[derive(Clone)]
pub struct CliApp {
    pub config: AppConfig,
    pub jobs: JobsFile,
    pub db: DbManager,
    pub runner: Arc<JobRunner>,
    pub restore_engine: Arc<RestoreEngine>,
}

impl CliApp {
    /// 加载配置并初始化各个核心服务
    pub async fn new_with_auto_config(config_path: &Path, jobs_path: &Path) -> Result<Self> {
        let config = if config_path.exists() {
            AppConfig::load_from_file(config_path)?
        } else {
            AppConfig::find_and_load_config()?
        };

        let jobs = if jobs_path.exists() {
            JobsFile::load_from_file(jobs_path)?
        } else {
            warn!("任务定义文件 {} 不存在，任务列表为空", jobs_path.display());
            JobsFile::default()
        };

        // 初始化数据库与核心服务
        let db = DbManager::new(&config.database.path).await?;
        let notifier = Notifier::new(db.clone(), &config);
        let runner = Arc::new(JobRunner::new(db.clone(), config.clone(), notifier));
        let restore_engine = RestoreEngine::new(db.clone(), config.clone());

        Ok(Self {
            config,
            jobs,
            db,
            runner,
            restore_engine,
        })
    }

    /// 按 id 查找任务定义
    pub fn find_job(&self, job_id: &str) -> Result<JobDefinition> {
        self.jobs
            .find(job_id)
            .cloned()
            .ok_or_else(|| HeronError::config(format!("任务 {job_id} 未定义")))
    }

    /// 运行应用命令
    pub async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Jobs => commands::run_jobs(self).await,
            Commands::Run { job_id, dry_run } => commands::run_job(self, &job_id, dry_run).await,
            Commands::Status { job_id } => commands::run_status(self, job_id.as_deref()).await,
            Commands::Log { job_id, limit } => commands::run_log(self, &job_id, limit).await,
            Commands::Schedule => commands::run_schedule(self).await,
            Commands::Restore(restore_cmd) => {
                commands::handle_restore_command(self, restore_cmd).await
            }
            Commands::Maintenance(maintenance_cmd) => {
                commands::handle_maintenance_command(self, maintenance_cmd).await
            }
        }
    }
}
