// DuckDB数据库模块
//
// 这个模块提供了一个线程安全的DuckDB数据库接口，通过Actor模式确保
// DuckDB的单线程访问要求，同时为核心组件提供异步、类型安全的API。
//
// 运行中任务登记表、通知节流状态、任务状态流水和执行记录都是
// 多个后台任务并发读写的持久化状态，统一经由 Actor 串行化。
//
// 主要组件：
// - DbManager: 高级API接口，供核心组件使用
// - DbActor: 内部Actor，处理实际的数据库操作
// - 数据模型和消息定义

mod actor;
mod manager;
mod messages;
mod models;

// 公开核心接口
pub use manager::DbManager;
pub use models::{
    QueueStateRecord, QueuedNotification, RestoreHistoryRecord, RunLogRecord, RunningJobRecord,
    StatusRecord,
};
