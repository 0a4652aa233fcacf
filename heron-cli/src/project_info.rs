/// 项目元信息
pub mod metadata {
    /// 项目描述
    pub const PROJECT_DESCRIPTION: &str = "异构备份任务的编排与调度工具";

    /// 项目作者
    pub const PROJECT_AUTHORS: &str = "Heron Team";
}

/// 版本信息
pub mod version_info {
    /// CLI 版本号
    pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");
}
