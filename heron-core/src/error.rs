use thiserror::Error;

pub type Result<T> = std::result::Result<T, HeronError>;

#[derive(Error, Debug)]
pub enum HeronError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("配置文件解析错误: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("配置文件未找到")]
    ConfigNotFound,

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cron 表达式错误: {0}")]
    Cron(String),

    #[error("连接错误: {0}")]
    Connectivity(String),

    #[error("仓库错误: {0}")]
    Repository(String),

    #[error("命令执行超时: {0}")]
    Timeout(String),

    #[error("命令执行失败: {0}")]
    Execution(String),

    #[error("恢复输出停滞: {0}")]
    Stall(String),

    #[error("通知发送失败: {0}")]
    Notify(String),

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for HeronError {
    fn from(err: duckdb::Error) -> Self {
        HeronError::DuckDb(err.to_string())
    }
}

impl HeronError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn notify(msg: impl Into<String>) -> Self {
        Self::Notify(msg.into())
    }
}
