// Autorec Backup Library
// 录播文件自动备份核心库

// 自动备份模块
pub mod autobackup;

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 导出常用类型
pub use autobackup::{
    AlistClient, AutoBackupConfig, AutoBackupManager, BackupError, BackupTask, BackupTaskStatus,
    GatewayTarget, StorageGateway, TaskSelector,
};
pub use config::AppConfig;
