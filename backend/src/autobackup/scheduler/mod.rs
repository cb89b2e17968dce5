//! 调度器模块

pub mod backup_scheduler;
pub mod trigger;

pub use backup_scheduler::{BackupScheduler, TickStats};
pub use trigger::{compute_scheduled_time, scheduled_time_utc};
