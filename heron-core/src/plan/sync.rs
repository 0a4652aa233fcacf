use crate::config::{DestinationSpec, JobDefinition, SourceSpec, SshEndpoint};
use crate::constants::{sync, tools};
use crate::error::{HeronError, Result};

use super::{CommandStep, OperationKind, TimeoutBand, Transport, require_field};

/// 规划一次文件同步备份（rsync）
///
/// 自定义同步参数整体替换默认参数，绝不合并。来源为远程且目的地也是
/// 远程（SSH 或守护进程共享）时，整条命令嵌入远程 shell 在来源主机上
/// 执行，来源路径替换为主机上的本地路径。
pub fn plan_backup(job: &JobDefinition, dry_run: bool) -> Result<Vec<CommandStep>> {
    let mut step = CommandStep::new(OperationKind::Backup, tools::SYNC_TOOL);

    // 参数顺序：选项、过滤规则、预演标志、来源、目的地
    let options: Vec<String> = match &job.sync_options {
        Some(custom) => custom.clone(),
        None => sync::DEFAULT_OPTIONS.iter().map(|s| s.to_string()).collect(),
    };
    step.args.extend(options);

    for source_path in job.source.paths() {
        for pattern in &source_path.include {
            step.args.push(format!("--include={pattern}"));
        }
        for pattern in &source_path.exclude {
            step.args.push(format!("--exclude={pattern}"));
        }
    }

    if dry_run {
        step.args
            .extend(sync::DRY_RUN_OPTIONS.iter().map(|s| s.to_string()));
    }

    let destination = resolve_destination(job)?;
    let remote_to_remote = matches!(&job.source, SourceSpec::Ssh { .. })
        && !matches!(&job.destination, DestinationSpec::Local { .. });

    // 来源路径：远程→远程时在来源主机上执行，路径按主机本地路径书写
    match &job.source {
        SourceSpec::Local { paths } => {
            for p in paths {
                step.args.push(p.path.clone());
            }
        }
        SourceSpec::Ssh {
            host, user, port, paths,
        } => {
            if remote_to_remote {
                for p in paths {
                    step.args.push(p.path.clone());
                }
                step.transport = Transport::Ssh {
                    endpoint: SshEndpoint {
                        host: host.clone(),
                        user: user.clone(),
                        port: *port,
                    },
                };
            } else {
                for p in paths {
                    step.args.push(format!("{user}@{host}:{}", p.path));
                }
            }
        }
    }

    step.args.push(destination.clone());
    step.repository = Some(destination);

    // 守护进程共享的口令只经由环境变量传递
    if let DestinationSpec::RsyncDaemon {
        password: Some(password),
        ..
    } = &job.destination
    {
        if !password.is_empty() {
            step.env
                .insert("RSYNC_PASSWORD".to_string(), password.clone());
            step.secrets.push(password.clone());
        }
    }

    step.timeout = if dry_run {
        TimeoutBand::Validate
    } else {
        TimeoutBand::Transfer
    };

    Ok(vec![step])
}

/// 解析同步目的地字符串
fn resolve_destination(job: &JobDefinition) -> Result<String> {
    match &job.destination {
        DestinationSpec::Local { path } => {
            require_field(&job.id, "destination.path", path)?;
            Ok(path.clone())
        }
        DestinationSpec::Ssh {
            host, user, path, ..
        } => {
            require_field(&job.id, "destination.host", host)?;
            require_field(&job.id, "destination.user", user)?;
            require_field(&job.id, "destination.path", path)?;
            Ok(format!("{user}@{host}:{path}"))
        }
        DestinationSpec::RsyncDaemon {
            host,
            module,
            path,
            user,
            ..
        } => {
            require_field(&job.id, "destination.host", host)?;
            require_field(&job.id, "destination.module", module)?;
            let prefix = match user {
                Some(user) if !user.is_empty() => format!("{user}@"),
                _ => String::new(),
            };
            let suffix = match path {
                Some(path) if !path.is_empty() => format!("/{}", path.trim_start_matches('/')),
                _ => String::new(),
            };
            Ok(format!("rsync://{prefix}{host}/{module}{suffix}"))
        }
        DestinationSpec::Snapshot(_) => Err(HeronError::config(format!(
            "任务 {} 的快照目的地不能用于文件同步备份",
            job.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcePath;

    fn job(source: SourceSpec, destination: DestinationSpec) -> JobDefinition {
        JobDefinition {
            id: "sync-job".to_string(),
            name: None,
            enabled: true,
            schedule: crate::config::ScheduleKind::Manual,
            source,
            destination,
            respect_conflicts: true,
            sync_options: None,
            notifications: vec![],
            maintenance: Default::default(),
        }
    }

    fn local_paths(paths: &[&str]) -> Vec<SourcePath> {
        paths
            .iter()
            .map(|p| SourcePath {
                path: p.to_string(),
                include: vec![],
                exclude: vec![],
            })
            .collect()
    }

    #[test]
    fn test_local_to_local_default_argv() {
        let job = job(
            SourceSpec::Local {
                paths: local_paths(&["/data"]),
            },
            DestinationSpec::Local {
                path: "/backups".to_string(),
            },
        );

        let steps = plan_backup(&job, false).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].program, "rsync");
        assert_eq!(
            steps[0].args,
            vec![
                "-a",
                "--info=stats1",
                "--delete",
                "--delete-excluded",
                "/data",
                "/backups"
            ]
        );
        assert_eq!(steps[0].transport, Transport::Local);
    }

    #[test]
    fn test_dry_run_inserts_flags_before_source() {
        let job = job(
            SourceSpec::Local {
                paths: local_paths(&["/data"]),
            },
            DestinationSpec::Local {
                path: "/backups".to_string(),
            },
        );

        let steps = plan_backup(&job, true).unwrap();
        assert_eq!(
            steps[0].args,
            vec![
                "-a",
                "--info=stats1",
                "--delete",
                "--delete-excluded",
                "--dry-run",
                "--verbose",
                "/data",
                "/backups"
            ]
        );
        assert_eq!(steps[0].timeout, TimeoutBand::Validate);
    }

    #[test]
    fn test_custom_options_replace_defaults() {
        let mut j = job(
            SourceSpec::Local {
                paths: local_paths(&["/data"]),
            },
            DestinationSpec::Local {
                path: "/backups".to_string(),
            },
        );
        j.sync_options = Some(vec!["-az".to_string()]);

        let steps = plan_backup(&j, false).unwrap();
        assert_eq!(steps[0].args, vec!["-az", "/data", "/backups"]);
    }

    #[test]
    fn test_exclude_patterns_appended_per_pattern() {
        let j = job(
            SourceSpec::Local {
                paths: vec![SourcePath {
                    path: "/data".to_string(),
                    include: vec!["*.db".to_string()],
                    exclude: vec!["*.tmp".to_string(), "cache/".to_string()],
                }],
            },
            DestinationSpec::Local {
                path: "/backups".to_string(),
            },
        );

        let steps = plan_backup(&j, false).unwrap();
        let args = &steps[0].args;
        assert!(args.contains(&"--include=*.db".to_string()));
        assert!(args.contains(&"--exclude=*.tmp".to_string()));
        assert!(args.contains(&"--exclude=cache/".to_string()));
    }

    #[test]
    fn test_remote_source_local_destination_pulls() {
        let j = job(
            SourceSpec::Ssh {
                host: "nas.local".to_string(),
                user: "backup".to_string(),
                port: None,
                paths: local_paths(&["/srv/data"]),
            },
            DestinationSpec::Local {
                path: "/backups".to_string(),
            },
        );

        let steps = plan_backup(&j, false).unwrap();
        assert_eq!(steps[0].transport, Transport::Local);
        assert!(
            steps[0]
                .args
                .contains(&"backup@nas.local:/srv/data".to_string())
        );
    }

    #[test]
    fn test_remote_source_daemon_destination_nests_on_source_host() {
        let j = job(
            SourceSpec::Ssh {
                host: "nas.local".to_string(),
                user: "backup".to_string(),
                port: None,
                paths: local_paths(&["/srv/data"]),
            },
            DestinationSpec::RsyncDaemon {
                host: "mirror.example".to_string(),
                module: "vault".to_string(),
                path: Some("nas".to_string()),
                user: Some("sync".to_string()),
                password: Some("hunter2".to_string()),
            },
        );

        let steps = plan_backup(&j, false).unwrap();
        let step = &steps[0];
        // 在来源主机上执行，来源路径替换为主机本地路径
        match &step.transport {
            Transport::Ssh { endpoint } => assert_eq!(endpoint.host, "nas.local"),
            other => panic!("执行通道不正确: {other:?}"),
        }
        assert!(step.args.contains(&"/srv/data".to_string()));
        assert!(
            step.args
                .contains(&"rsync://sync@mirror.example/vault/nas".to_string())
        );
        // 口令只在环境变量里
        assert_eq!(step.env.get("RSYNC_PASSWORD").unwrap(), "hunter2");
        assert!(!step.args.iter().any(|a| a.contains("hunter2")));
        assert!(!step.display_command().contains("hunter2"));
    }

    #[test]
    fn test_missing_destination_field_is_config_error() {
        let j = job(
            SourceSpec::Local {
                paths: local_paths(&["/data"]),
            },
            DestinationSpec::Ssh {
                host: "".to_string(),
                user: "backup".to_string(),
                port: None,
                path: "/backups".to_string(),
            },
        );

        let err = plan_backup(&j, false).unwrap_err();
        assert!(matches!(err, HeronError::Config(_)));
    }
}
