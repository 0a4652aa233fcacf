/// # Heron CLI 日志系统使用说明
///
/// 本项目遵循 Rust CLI 应用的日志最佳实践：
///
/// ## 基本原则
/// 1. **库代码只使用 `tracing` 宏**：`info!()`, `warn!()`, `error!()`, `debug!()`
/// 2. **应用入口控制日志配置**：在 `main.rs` 中调用 `setup_logging()`
/// 3. **日志中的命令行已脱敏**：机密值在进入日志之前替换为占位符
///
/// ## 日志配置选项
///
/// ### 命令行参数
/// - `-v, --verbose`：启用详细日志模式（DEBUG 级别）
///
/// ### 环境变量
/// - `RUST_LOG`：标准的 Rust 日志级别控制（如 `debug`, `info`, `warn`, `error`）
/// - `HERON_LOG_FILE`：日志文件路径，设置后日志输出到文件而非终端
///
/// ## 使用示例
///
/// ```bash
/// # 标准日志输出到终端
/// heron-cli run photos
///
/// # 详细日志输出到终端
/// heron-cli -v run photos
///
/// # 日志输出到文件
/// HERON_LOG_FILE=heron.log heron-cli schedule
/// ```
use tracing_subscriber::EnvFilter;

/// 初始化日志系统
pub fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var("HERON_LOG_FILE") {
        // 输出到文件：包含完整模块路径，便于排查
        let appender = tracing_appender::rolling::never(".", log_file);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(appender)
            .with_ansi(false)
            .init();
    } else {
        // 输出到终端：人类可读格式，不显示模块路径
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
