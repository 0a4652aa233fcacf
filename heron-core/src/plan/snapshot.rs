use std::collections::BTreeMap;

use crate::config::{JobDefinition, SnapshotBackend, SnapshotDestination, SourceSpec, SshEndpoint};
use crate::constants::tools;
use crate::error::{HeronError, Result};

use super::{CommandStep, OperationKind, TimeoutBand, Transport, require_field};

/// 解析后的仓库信息
#[derive(Debug, Clone)]
pub struct ResolvedRepository {
    /// 展示用 URI，不含凭据
    pub display_uri: String,
    /// 快照工具需要的环境变量（仓库地址与全部凭据）
    pub env: BTreeMap<String, String>,
    /// 需要脱敏的值
    pub secrets: Vec<String>,
}

/// 从目的地字段解析仓库 URI 与凭据环境
///
/// 凭据只进入环境变量：仓库密码走 RESTIC_PASSWORD，REST 凭据并入
/// RESTIC_REPOSITORY，对象存储凭据走 AWS_* 变量。
pub fn resolve_repository(
    job_id: &str,
    dest: &SnapshotDestination,
) -> Result<ResolvedRepository> {
    require_field(job_id, "destination.password", &dest.password)?;

    let mut env = BTreeMap::new();
    let mut secrets = vec![dest.password.clone()];
    env.insert("RESTIC_PASSWORD".to_string(), dest.password.clone());

    let (display_uri, repo_env) = match &dest.backend {
        SnapshotBackend::LocalPath { path } => {
            require_field(job_id, "backend.path", path)?;
            (path.clone(), path.clone())
        }
        SnapshotBackend::Rest {
            url,
            user,
            password,
        } => {
            require_field(job_id, "backend.url", url)?;
            let parsed = url::Url::parse(url).map_err(|e| {
                HeronError::config(format!("任务 {job_id} 的 REST 仓库地址无效: {e}"))
            })?;

            let display = format!("rest:{url}");
            let mut with_creds = parsed;
            if let Some(user) = user {
                with_creds
                    .set_username(user)
                    .map_err(|_| HeronError::config(format!("任务 {job_id} 的 REST 用户名无效")))?;
            }
            if let Some(password) = password {
                with_creds.set_password(Some(password)).map_err(|_| {
                    HeronError::config(format!("任务 {job_id} 的 REST 口令无效"))
                })?;
                secrets.push(password.clone());
            }
            (display, format!("rest:{with_creds}"))
        }
        SnapshotBackend::ObjectStore {
            bucket,
            prefix,
            region,
            endpoint,
            access_key_id,
            secret_access_key,
        } => {
            require_field(job_id, "backend.bucket", bucket)?;
            require_field(job_id, "backend.region", region)?;
            require_field(job_id, "backend.access_key_id", access_key_id)?;
            require_field(job_id, "backend.secret_access_key", secret_access_key)?;

            let host = match endpoint {
                Some(endpoint) if !endpoint.is_empty() => endpoint.clone(),
                _ => format!("s3.{region}.amazonaws.com"),
            };
            let uri = if prefix.is_empty() {
                format!("s3:{host}/{bucket}")
            } else {
                format!("s3:{host}/{bucket}/{prefix}")
            };

            env.insert("AWS_ACCESS_KEY_ID".to_string(), access_key_id.clone());
            env.insert(
                "AWS_SECRET_ACCESS_KEY".to_string(),
                secret_access_key.clone(),
            );
            env.insert("AWS_DEFAULT_REGION".to_string(), region.clone());
            secrets.push(secret_access_key.clone());
            (uri.clone(), uri)
        }
        SnapshotBackend::CloudRemote { remote, path } => {
            require_field(job_id, "backend.remote", remote)?;
            require_field(job_id, "backend.path", path)?;
            let uri = format!("rclone:{remote}:{path}");
            (uri.clone(), uri)
        }
        SnapshotBackend::Sftp {
            host,
            user,
            port,
            path,
        } => {
            require_field(job_id, "backend.host", host)?;
            require_field(job_id, "backend.user", user)?;
            require_field(job_id, "backend.path", path)?;
            let uri = match port {
                Some(port) => format!("sftp://{user}@{host}:{port}/{}", path.trim_start_matches('/')),
                None => format!("sftp:{user}@{host}:{path}"),
            };
            (uri.clone(), uri)
        }
    };

    env.insert("RESTIC_REPOSITORY".to_string(), repo_env);

    Ok(ResolvedRepository {
        display_uri,
        env,
        secrets,
    })
}

/// 快照步骤的执行通道
///
/// 显式 exec_host 优先；否则来源在远程主机上时，快照工具跟着数据走，
/// 在来源主机上执行。配置了沙盒镜像时进一步包进容器。
pub(crate) fn resolve_transport(job: &JobDefinition, dest: &SnapshotDestination) -> Transport {
    let endpoint = match (&dest.exec_host, &job.source) {
        (Some(endpoint), _) => Some(endpoint.clone()),
        (None, SourceSpec::Ssh { host, user, port, .. }) => Some(SshEndpoint {
            host: host.clone(),
            user: user.clone(),
            port: *port,
        }),
        (None, SourceSpec::Local { .. }) => None,
    };

    match (endpoint, &dest.sandbox_image) {
        (Some(endpoint), Some(image)) if !image.is_empty() => Transport::SshSandbox {
            endpoint,
            image: image.clone(),
        },
        (Some(endpoint), _) => Transport::Ssh { endpoint },
        (None, _) => Transport::Local,
    }
}

/// 规划一次快照备份
///
/// 序列为可选的 init 加 backup。init 在仓库已存在时会失败，
/// 不中断后续步骤。
pub fn plan_backup(
    job: &JobDefinition,
    dest: &SnapshotDestination,
    dry_run: bool,
) -> Result<Vec<CommandStep>> {
    let repo = resolve_repository(&job.id, dest)?;
    let transport = resolve_transport(job, dest);
    let mut steps = Vec::new();

    if dest.auto_init && !dry_run {
        let mut init = CommandStep::new(OperationKind::Init, tools::SNAPSHOT_TOOL);
        init.args.push("init".to_string());
        init.transport = transport.clone();
        init.repository = Some(repo.display_uri.clone());
        init.env = repo.env.clone();
        init.secrets = repo.secrets.clone();
        init.timeout = TimeoutBand::Validate;
        init.allow_failure = true;
        steps.push(init);
    }

    let mut backup = CommandStep::new(OperationKind::Backup, tools::SNAPSHOT_TOOL);
    backup.args.push("backup".to_string());
    backup.args.push("--json".to_string());
    backup.args.push("--tag".to_string());
    backup.args.push(format!("job:{}", job.id));
    backup.args.push("--tag".to_string());
    backup.args.push(format!("host:{}", local_hostname()));

    for source_path in job.source.paths() {
        for pattern in &source_path.exclude {
            backup.args.push("--exclude".to_string());
            backup.args.push(pattern.clone());
        }
    }

    if dry_run {
        backup.args.push("--dry-run".to_string());
    }

    for source_path in job.source.paths() {
        backup.args.push(source_path.path.clone());
        backup.source_paths.push(source_path.path.clone());
    }

    backup.transport = transport;
    backup.repository = Some(repo.display_uri);
    backup.env = repo.env;
    backup.secrets = repo.secrets;
    backup.timeout = if dry_run {
        TimeoutBand::Validate
    } else {
        TimeoutBand::Transfer
    };
    steps.push(backup);

    Ok(steps)
}

/// 备份标签使用的主机名
pub(crate) fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
