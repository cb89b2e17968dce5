//! 自动备份模块
//!
//! 录制完成的目录按计划时间上传到 Alist 风格的存储网关：
//! - 任务登记与状态管理（去重、删除、重试）
//! - 定时轮询调度
//! - 并发上传，失败重试（指数退避）
//! - 远程目录模板宏（时间、录制元数据）
//! - JSON / SQLite 持久化（重启恢复）

pub mod config;
pub mod error;
pub mod gateway;
pub mod macros;
pub mod manager;
pub mod persistence;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod task;

pub use config::*;
pub use error::BackupError;
pub use gateway::{AlistClient, StorageGateway};
pub use manager::AutoBackupManager;
pub use persistence::{open_store, JsonFileStore, SqliteStore, TaskRecord, TaskStore};
pub use pipeline::{ExecutionPipeline, PipelineReport};
pub use registry::{TaskListing, TaskRegistry};
pub use retry::{GatewayResponse, RetryExecutor, RetryPolicy};
pub use scheduler::{BackupScheduler, TickStats};
pub use task::*;
