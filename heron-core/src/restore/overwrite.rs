use std::path::Path;

use tracing::debug;

use crate::config::{JobDefinition, SourceSpec, SshEndpoint};
use crate::constants::restore::OVERWRITE_LIST_LIMIT;
use crate::error::Result;
use crate::exec::ExecutionService;
use crate::plan::{CommandStep, OperationKind, TimeoutBand, Transport};

/// 覆盖检测结果
///
/// 仅供上游确认步骤参考，从不阻止恢复本身。
#[derive(Debug, Clone)]
pub struct OverwriteReport {
    /// 任一目标路径已存在非空内容
    pub would_overwrite: bool,
    /// 冲突路径列表（有数量上限）
    pub colliding_paths: Vec<String>,
}

/// 恢复前的覆盖检测
///
/// 本地路径直接探测存在与非空；远程路径每条做一次往返，执行
/// POSIX 的"存在且非空"测试。
#[derive(Debug, Clone)]
pub struct OverwriteChecker {
    exec: ExecutionService,
}

impl OverwriteChecker {
    pub fn new(exec: ExecutionService) -> Self {
        Self { exec }
    }

    /// 探测候选目标路径
    ///
    /// 来源在远程主机上时，原位恢复的目标路径也在该主机上，
    /// 逐条通过远程 shell 探测；其余情况走本地探测。
    pub async fn check(&self, job: &JobDefinition, paths: &[String]) -> Result<OverwriteReport> {
        let mut colliding = Vec::new();

        for path in paths {
            let occupied = match &job.source {
                SourceSpec::Ssh { host, user, port, .. } => {
                    let endpoint = SshEndpoint {
                        host: host.clone(),
                        user: user.clone(),
                        port: *port,
                    };
                    self.remote_path_nonempty(&endpoint, path).await?
                }
                SourceSpec::Local { .. } => local_path_nonempty(Path::new(path)),
            };

            if occupied {
                debug!("覆盖检测命中: {}", path);
                if colliding.len() < OVERWRITE_LIST_LIMIT {
                    colliding.push(path.clone());
                }
            }
        }

        Ok(OverwriteReport {
            would_overwrite: !colliding.is_empty(),
            colliding_paths: colliding,
        })
    }

    /// 远程"存在且非空"测试，一次往返一个路径
    async fn remote_path_nonempty(&self, endpoint: &SshEndpoint, path: &str) -> Result<bool> {
        let mut step = CommandStep::new(OperationKind::Restore, "sh");
        step.args = vec![
            "-c".to_string(),
            format!(
                "[ -e {path} ] && {{ [ -s {path} ] || [ -n \"$(ls -A {path} 2>/dev/null)\" ]; }}"
            ),
        ];
        step.transport = Transport::Ssh {
            endpoint: endpoint.clone(),
        };
        step.timeout = TimeoutBand::Validate;

        let result = self.exec.execute(&step).await?;
        Ok(result.success)
    }
}

/// 本地路径存在且非空
fn local_path_nonempty(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };

    if metadata.is_file() {
        return metadata.len() > 0;
    }
    if metadata.is_dir() {
        return std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationSpec, ExecutionConfig, SourcePath};

    fn local_job(id: &str) -> JobDefinition {
        JobDefinition {
            id: id.to_string(),
            name: None,
            enabled: true,
            schedule: crate::config::ScheduleKind::Manual,
            source: SourceSpec::Local {
                paths: vec![SourcePath {
                    path: "/srv".to_string(),
                    include: vec![],
                    exclude: vec![],
                }],
            },
            destination: DestinationSpec::Local {
                path: "/backups".to_string(),
            },
            respect_conflicts: true,
            sync_options: None,
            notifications: vec![],
            maintenance: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_nonempty_directory_reported() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("file.txt"), "content").unwrap();

        let checker = OverwriteChecker::new(ExecutionService::new(ExecutionConfig::default()));
        let report = checker
            .check(
                &local_job("a"),
                &[temp.path().to_string_lossy().to_string()],
            )
            .await
            .unwrap();

        assert!(report.would_overwrite);
        assert_eq!(report.colliding_paths.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_path_not_reported() {
        let checker = OverwriteChecker::new(ExecutionService::new(ExecutionConfig::default()));
        let report = checker
            .check(&local_job("a"), &["/definitely/not/a/real/path".to_string()])
            .await
            .unwrap();

        assert!(!report.would_overwrite);
        assert!(report.colliding_paths.is_empty());
    }

    #[tokio::test]
    async fn test_empty_directory_not_reported() {
        let temp = tempfile::tempdir().unwrap();

        let checker = OverwriteChecker::new(ExecutionService::new(ExecutionConfig::default()));
        let report = checker
            .check(
                &local_job("a"),
                &[temp.path().to_string_lossy().to_string()],
            )
            .await
            .unwrap();

        assert!(!report.would_overwrite);
    }

    #[test]
    fn test_nonempty_file_detected() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("data.bin");
        std::fs::write(&file, "x").unwrap();
        assert!(local_path_nonempty(&file));

        let empty = temp.path().join("empty.bin");
        std::fs::write(&empty, "").unwrap();
        assert!(!local_path_nonempty(&empty));
    }
}
