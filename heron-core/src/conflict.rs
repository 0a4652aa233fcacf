use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::{ConflictConfig, DestinationSpec, JobDefinition, SnapshotBackend};
use crate::db::DbManager;
use crate::error::Result;

/// 冲突等待的结果
#[derive(Debug, Clone)]
pub struct WaitOutcome {
    /// 等待总时长
    pub waited: Duration,
    /// 等待期间观察到的冲突任务 id
    pub conflicting_jobs: Vec<String>,
}

impl WaitOutcome {
    pub fn waited_any(&self) -> bool {
        !self.conflicting_jobs.is_empty()
    }
}

/// 资源冲突管理器
///
/// 任务的"资源"是其来源/目的地引用的远程主机名集合（不区分大小写），
/// 纯本地任务不占用资源。两个任务的资源集合相交即视为冲突。
///
/// 检查-登记序列存在已知的良性竞态：两个任务可能同时观察到空闲状态
/// 然后都开始执行。这里的契约是尽力避免，不是线性化的准入控制。
#[derive(Debug, Clone)]
pub struct ConflictManager {
    db: DbManager,
    poll_interval: Duration,
}

impl ConflictManager {
    pub fn new(db: DbManager, config: &ConflictConfig) -> Self {
        Self {
            db,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// 等待与本任务共享资源的其他任务全部结束
    ///
    /// 每轮检查之间睡眠一个轮询间隔。返回总等待时长与观察到的
    /// 冲突任务 id，供通知层发送延迟告警。
    pub async fn wait_until_clear(&self, job: &JobDefinition) -> Result<WaitOutcome> {
        let resources = job_resources(job);
        let start = Instant::now();
        let mut seen_conflicts: BTreeSet<String> = BTreeSet::new();

        if resources.is_empty() {
            return Ok(WaitOutcome {
                waited: Duration::ZERO,
                conflicting_jobs: Vec::new(),
            });
        }

        loop {
            let running = self.db.list_running().await?;
            let conflicting: Vec<String> = running
                .iter()
                .filter(|record| record.job_id != job.id)
                .filter(|record| {
                    record
                        .resources
                        .iter()
                        .any(|resource| resources.contains(resource))
                })
                .map(|record| record.job_id.clone())
                .collect();

            if conflicting.is_empty() {
                let waited = start.elapsed();
                if !seen_conflicts.is_empty() {
                    info!(
                        "任务 {} 的资源冲突已解除，等待 {:?}，冲突任务: {:?}",
                        job.id, waited, seen_conflicts
                    );
                }
                return Ok(WaitOutcome {
                    waited,
                    conflicting_jobs: seen_conflicts.into_iter().collect(),
                });
            }

            debug!(
                "任务 {} 等待资源冲突解除，当前冲突任务: {:?}",
                job.id, conflicting
            );
            seen_conflicts.extend(conflicting);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 登记运行中任务（幂等）
    pub async fn register(&self, job: &JobDefinition) -> Result<()> {
        let resources: Vec<String> = job_resources(job).into_iter().collect();
        self.db.register_running(&job.id, resources).await
    }

    /// 移除运行中任务登记（幂等）
    ///
    /// 任务执行无论成败都必须调用，由 JobRunner 保证在所有退出
    /// 路径上执行。
    pub async fn unregister(&self, job_id: &str) -> Result<()> {
        self.db.unregister_running(job_id).await
    }

    /// 当前登记的运行中任务 id
    pub async fn running_jobs(&self) -> Result<Vec<String>> {
        Ok(self
            .db
            .list_running()
            .await?
            .into_iter()
            .map(|record| record.job_id)
            .collect())
    }
}

/// 提取任务占用的远程资源（主机名，小写去重）
pub fn job_resources(job: &JobDefinition) -> BTreeSet<String> {
    let mut resources = BTreeSet::new();

    if let Some(host) = job.source.host() {
        resources.insert(host.to_ascii_lowercase());
    }

    match &job.destination {
        DestinationSpec::Local { .. } => {}
        DestinationSpec::Ssh { host, .. } => {
            resources.insert(host.to_ascii_lowercase());
        }
        DestinationSpec::RsyncDaemon { host, .. } => {
            resources.insert(host.to_ascii_lowercase());
        }
        DestinationSpec::Snapshot(dest) => {
            match &dest.backend {
                SnapshotBackend::LocalPath { .. } => {}
                SnapshotBackend::Rest { url, .. } => {
                    if let Ok(parsed) = url::Url::parse(url) {
                        if let Some(host) = parsed.host_str() {
                            resources.insert(host.to_ascii_lowercase());
                        }
                    }
                }
                SnapshotBackend::ObjectStore {
                    region, endpoint, ..
                } => {
                    let host = match endpoint {
                        Some(endpoint) if !endpoint.is_empty() => endpoint.clone(),
                        _ => format!("s3.{region}.amazonaws.com"),
                    };
                    resources.insert(host.to_ascii_lowercase());
                }
                SnapshotBackend::CloudRemote { remote, .. } => {
                    resources.insert(remote.to_ascii_lowercase());
                }
                SnapshotBackend::Sftp { host, .. } => {
                    resources.insert(host.to_ascii_lowercase());
                }
            }
            if let Some(endpoint) = &dest.exec_host {
                resources.insert(endpoint.host.to_ascii_lowercase());
            }
        }
    }

    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourcePath, SourceSpec};

    fn job_with_ssh_dest(id: &str, host: &str) -> JobDefinition {
        JobDefinition {
            id: id.to_string(),
            name: None,
            enabled: true,
            schedule: crate::config::ScheduleKind::Manual,
            source: SourceSpec::Local {
                paths: vec![SourcePath {
                    path: "/data".to_string(),
                    include: vec![],
                    exclude: vec![],
                }],
            },
            destination: DestinationSpec::Ssh {
                host: host.to_string(),
                user: "backup".to_string(),
                port: None,
                path: "/backups".to_string(),
            },
            respect_conflicts: true,
            sync_options: None,
            notifications: vec![],
            maintenance: Default::default(),
        }
    }

    fn local_job(id: &str) -> JobDefinition {
        let mut job = job_with_ssh_dest(id, "ignored");
        job.destination = DestinationSpec::Local {
            path: "/backups".to_string(),
        };
        job
    }

    #[test]
    fn test_resource_extraction_is_case_insensitive() {
        let job = job_with_ssh_dest("a", "NAS.Local");
        let resources = job_resources(&job);
        assert!(resources.contains("nas.local"));
    }

    #[test]
    fn test_local_job_has_no_resources() {
        let job = local_job("a");
        assert!(job_resources(&job).is_empty());
    }

    #[tokio::test]
    async fn test_no_conflict_returns_immediately() {
        let db = DbManager::new_memory().await.unwrap();
        let manager = ConflictManager::new(db, &ConflictConfig {
            poll_interval_secs: 1,
        });

        let outcome = manager
            .wait_until_clear(&job_with_ssh_dest("a", "nas.local"))
            .await
            .unwrap();
        assert!(outcome.conflicting_jobs.is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_job_observes_wait_cycle() {
        let db = DbManager::new_memory().await.unwrap();
        let manager = ConflictManager::new(db.clone(), &ConflictConfig {
            poll_interval_secs: 1,
        });

        let holder = job_with_ssh_dest("holder", "nas.local");
        manager.register(&holder).await.unwrap();

        let waiter_manager = manager.clone();
        let waiter = job_with_ssh_dest("waiter", "NAS.LOCAL");
        let handle =
            tokio::spawn(async move { waiter_manager.wait_until_clear(&waiter).await.unwrap() });

        // 至少经历一轮等待后再释放资源
        tokio::time::sleep(Duration::from_millis(1200)).await;
        manager.unregister("holder").await.unwrap();

        let outcome = handle.await.unwrap();
        assert!(outcome.waited >= Duration::from_secs(1));
        assert_eq!(outcome.conflicting_jobs, vec!["holder".to_string()]);
    }

    #[tokio::test]
    async fn test_disjoint_resources_do_not_conflict() {
        let db = DbManager::new_memory().await.unwrap();
        let manager = ConflictManager::new(db, &ConflictConfig {
            poll_interval_secs: 1,
        });

        let holder = job_with_ssh_dest("holder", "one.example");
        manager.register(&holder).await.unwrap();

        let outcome = manager
            .wait_until_clear(&job_with_ssh_dest("other", "two.example"))
            .await
            .unwrap();
        assert!(outcome.conflicting_jobs.is_empty());
    }
}
