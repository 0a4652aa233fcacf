use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::ExecutionConfig;
use crate::constants::{timeout as timeout_consts, tools};
use crate::error::{HeronError, Result};
use crate::plan::{CommandStep, TimeoutBand, Transport, redact};

/// 单条命令的执行结果
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// 超时产生的失败结果，使用哨兵返回码
    fn timed_out(elapsed: Duration, line: &str) -> Self {
        Self {
            success: false,
            code: Some(timeout_consts::TIMEOUT_EXIT_CODE),
            stdout: String::new(),
            stderr: format!("命令执行超时: {line}"),
            elapsed,
        }
    }
}

/// 统一的命令执行服务
///
/// 本地、远程 shell、远程 shell + 容器三种通道走同一个入口。
/// 凭据只经由环境变量传递；任何日志中的命令行都先脱敏。
/// 每条命令只尝试一次，失败交由调用方处理。
#[derive(Debug, Clone)]
pub struct ExecutionService {
    config: ExecutionConfig,
}

impl ExecutionService {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// 执行一条计划步骤
    ///
    /// 进程层面的失败（非零退出、超时、无法启动）都折叠进
    /// ExecutionResult，不作为 Err 向上传播。
    pub async fn execute(&self, step: &CommandStep) -> Result<ExecutionResult> {
        let (program, args) = materialize(step);
        let line = invocation_line(step);
        info!("执行命令: {}", line);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // 本地执行时凭据通过进程环境传入；
        // 远程执行时凭据已折叠进远程命令字符串（见 materialize）。
        if matches!(step.transport, Transport::Local) {
            cmd.envs(&step.env);
        }

        let start = Instant::now();
        let output_future = cmd.output();

        let output = match self.timeout_for(step.timeout) {
            Some(limit) => match tokio::time::timeout(limit, output_future).await {
                Ok(output) => output,
                Err(_) => {
                    warn!("命令超时（{}秒）: {}", limit.as_secs(), line);
                    return Ok(ExecutionResult::timed_out(start.elapsed(), &line));
                }
            },
            None => output_future.await,
        };

        let elapsed = start.elapsed();
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("命令无法启动: {} ({})", line, e);
                return Ok(ExecutionResult {
                    success: false,
                    code: Some(timeout_consts::SPAWN_FAILED_EXIT_CODE),
                    stdout: String::new(),
                    stderr: format!("命令无法启动: {e}"),
                    elapsed,
                });
            }
        };

        Ok(ExecutionResult {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            elapsed,
        })
    }

    /// 超时档位对应的具体时长，None 表示不限制
    fn timeout_for(&self, band: TimeoutBand) -> Option<Duration> {
        match band {
            TimeoutBand::Validate => Some(Duration::from_secs(self.config.validate_timeout_secs)),
            TimeoutBand::Transfer => self
                .config
                .transfer_timeout_secs
                .map(Duration::from_secs),
            TimeoutBand::Maintenance => {
                Some(Duration::from_secs(self.config.maintenance_timeout_secs))
            }
            TimeoutBand::Restore => Some(Duration::from_secs(self.config.restore_timeout_secs)),
        }
    }
}

/// 把计划步骤物化成最终的程序与参数列表
///
/// 远程通道折叠成一条 ssh 调用，远端命令是单个转义后的字符串，
/// 环境变量以 export 前缀携带。
pub fn materialize(step: &CommandStep) -> (String, Vec<String>) {
    match &step.transport {
        Transport::Local => {
            let mut chain = priority_chain(step);
            chain.extend(local_argv(step));
            let program = chain.remove(0);
            (program, chain)
        }
        Transport::Ssh { endpoint } => {
            let remote = build_remote_command(step, None);
            (tools::REMOTE_SHELL.to_string(), ssh_args(endpoint, remote))
        }
        Transport::SshSandbox { endpoint, image } => {
            let remote = build_remote_command(step, Some(image));
            (tools::REMOTE_SHELL.to_string(), ssh_args(endpoint, remote))
        }
    }
}

/// 脱敏后的完整调用命令行（日志与执行记录使用）
pub fn invocation_line(step: &CommandStep) -> String {
    let (program, args) = materialize(step);
    let mut line = program;
    for arg in args {
        line.push(' ');
        line.push_str(&arg);
    }
    redact(&line, &step.secrets)
}

fn local_argv(step: &CommandStep) -> Vec<String> {
    let mut argv = vec![step.program.clone()];
    argv.extend(step.args.iter().cloned());
    argv
}

fn priority_chain(step: &CommandStep) -> Vec<String> {
    if !step.reduced_priority {
        return Vec::new();
    }
    let mut chain: Vec<String> = tools::NICE_PREFIX.iter().map(|s| s.to_string()).collect();
    chain.extend(tools::IONICE_PREFIX.iter().map(|s| s.to_string()));
    chain
}

fn ssh_args(endpoint: &crate::config::SshEndpoint, remote_command: String) -> Vec<String> {
    let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
    if let Some(port) = endpoint.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    args.push(endpoint.login());
    args.push(remote_command);
    args
}

/// 远端命令字符串：export 环境变量，按需包进容器，最后是命令本身
fn build_remote_command(step: &CommandStep, sandbox_image: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();

    match sandbox_image {
        Some(image) => {
            // 容器内执行时环境变量通过 docker run -e 传入
            let mut docker: Vec<String> = priority_chain(step);
            docker.extend(["docker".to_string(), "run".to_string(), "--rm".to_string()]);
            for (key, value) in &step.env {
                docker.push("-e".to_string());
                docker.push(format!("{key}={value}"));
            }
            docker.push(image.to_string());
            docker.extend(local_argv(step));
            parts.push(shell_join(&docker));
        }
        None => {
            if !step.env.is_empty() {
                let exports: Vec<String> = step
                    .env
                    .iter()
                    .map(|(key, value)| format!("{key}={}", sh_quote(value)))
                    .collect();
                parts.push(format!("export {}", exports.join(" ")));
            }
            let mut argv = priority_chain(step);
            argv.extend(local_argv(step));
            parts.push(shell_join(&argv));
        }
    }

    parts.join("; ")
}

/// 按 POSIX shell 规则对单个词转义
fn sh_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| sh_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 确认外部工具在 PATH 中可用
pub fn ensure_tool(name: &str) -> Result<()> {
    which::which(name)
        .map(|_| ())
        .map_err(|_| HeronError::execution(format!("{name} 未安装或不在 PATH 中")))
}
