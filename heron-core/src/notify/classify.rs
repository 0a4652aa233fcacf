/// 错误粗分类
///
/// 把外部工具的原始失败文本映射成粗粒度类别，通知文案与状态日志
/// 共用。快照工具提供专属退出码时优先使用退出码判断。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 权限不足
    Permission,
    /// 路径不存在
    MissingPath,
    /// 网络/连接问题
    Network,
    /// 仓库问题（锁定/不存在）
    Repository,
    /// 存储空间问题
    Storage,
    /// 认证/口令问题
    Auth,
    /// 其他
    General,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Permission => "permission",
            ErrorCategory::MissingPath => "missing_path",
            ErrorCategory::Network => "network",
            ErrorCategory::Repository => "repository",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Auth => "auth",
            ErrorCategory::General => "general",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分类结果，带一条建议处理方式
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub summary: String,
    pub remediation: String,
}

impl ClassifiedError {
    fn new(category: ErrorCategory, summary: impl Into<String>, remediation: &str) -> Self {
        Self {
            category,
            summary: summary.into(),
            remediation: remediation.to_string(),
        }
    }
}

// 快照工具的专属退出码（可用时比文本匹配更可靠）
const EXIT_REPO_NOT_FOUND: i32 = 10;
const EXIT_REPO_LOCKED: i32 = 11;
const EXIT_WRONG_PASSWORD: i32 = 12;

/// 把原始失败输出映射成分类结果
pub fn classify(stderr: &str, exit_code: Option<i32>) -> ClassifiedError {
    let summary = first_meaningful_line(stderr);

    match exit_code {
        Some(EXIT_REPO_NOT_FOUND) => {
            return ClassifiedError::new(
                ErrorCategory::Repository,
                format!("仓库不存在: {summary}"),
                "确认仓库地址正确，或先初始化仓库",
            );
        }
        Some(EXIT_REPO_LOCKED) => {
            return ClassifiedError::new(
                ErrorCategory::Repository,
                format!("仓库被锁定: {summary}"),
                "确认没有其他进程在访问仓库，必要时手动解锁",
            );
        }
        Some(EXIT_WRONG_PASSWORD) => {
            return ClassifiedError::new(
                ErrorCategory::Auth,
                format!("仓库口令错误: {summary}"),
                "检查任务配置中的仓库口令",
            );
        }
        _ => {}
    }

    let lower = stderr.to_ascii_lowercase();

    if lower.contains("permission denied") || lower.contains("access denied") {
        return ClassifiedError::new(
            ErrorCategory::Permission,
            summary,
            "检查备份用户对来源/目的地路径的访问权限",
        );
    }
    if lower.contains("wrong password") || lower.contains("authentication failed") {
        return ClassifiedError::new(
            ErrorCategory::Auth,
            summary,
            "检查仓库口令或远程主机的认证配置",
        );
    }
    if lower.contains("repository is already locked") || lower.contains("unable to create lock") {
        return ClassifiedError::new(
            ErrorCategory::Repository,
            summary,
            "确认没有其他进程在访问仓库，必要时手动解锁",
        );
    }
    if lower.contains("is there a repository at") || lower.contains("repository does not exist") {
        return ClassifiedError::new(
            ErrorCategory::Repository,
            summary,
            "确认仓库地址正确，或先初始化仓库",
        );
    }
    if lower.contains("no space left") || lower.contains("quota exceeded") || lower.contains("disk full")
    {
        return ClassifiedError::new(
            ErrorCategory::Storage,
            summary,
            "清理目的地存储空间或扩容后重试",
        );
    }
    if lower.contains("no such file or directory")
        || lower.contains("file does not exist")
        || lower.contains("not found")
    {
        return ClassifiedError::new(
            ErrorCategory::MissingPath,
            summary,
            "确认配置中的路径存在且拼写正确",
        );
    }
    if lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("could not resolve")
        || lower.contains("name or service not known")
        || lower.contains("connection reset")
    {
        return ClassifiedError::new(
            ErrorCategory::Network,
            summary,
            "检查网络连通性与远程主机是否在线",
        );
    }

    ClassifiedError::new(
        ErrorCategory::General,
        summary,
        "查看任务执行记录中的完整输出定位原因",
    )
}

/// 失败输出的首个非空行作为摘要
fn first_meaningful_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("未知错误")
        .to_string()
}
