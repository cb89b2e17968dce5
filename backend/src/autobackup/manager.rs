//! 自动备份管理器
//!
//! 对外的统一入口：创建任务、查询、删除、重试、持久化，以及调度器的启停

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::config::AutoBackupConfig;
use super::error::BackupError;
use super::gateway::{AlistClient, StorageGateway};
use super::persistence::TaskStore;
use super::pipeline::{ExecutionPipeline, PipelineReport};
use super::registry::{TaskListing, TaskRegistry};
use super::retry::RetryPolicy;
use super::scheduler::{scheduled_time_utc, BackupScheduler};
use super::task::TaskSelector;

/// 自动备份管理器
pub struct AutoBackupManager {
    /// 自动备份配置
    config: AutoBackupConfig,
    /// 任务登记表
    registry: Arc<TaskRegistry>,
    /// 执行流水线
    pipeline: ExecutionPipeline,
    /// 调度器
    scheduler: Arc<BackupScheduler>,
    /// 调度循环句柄
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutoBackupManager {
    /// 创建管理器
    pub fn new(config: AutoBackupConfig, gateway: Arc<dyn StorageGateway>) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let pipeline = ExecutionPipeline::new(gateway);
        let scheduler = Arc::new(BackupScheduler::new(
            registry.clone(),
            pipeline.clone(),
            Duration::from_secs(config.check_interval),
        ));

        Self {
            config,
            registry,
            pipeline,
            scheduler,
            scheduler_handle: Mutex::new(None),
        }
    }

    /// 使用 Alist 网关创建管理器
    pub fn with_alist(config: AutoBackupConfig, max_retries: u32) -> Result<Self> {
        let client = AlistClient::new(RetryPolicy::new(max_retries))?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn config(&self) -> &AutoBackupConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<BackupScheduler> {
        &self.scheduler
    }

    // ==================== 调度器 ====================

    /// 启动调度器（已在运行时不做任何事）
    pub fn start(&self) {
        let mut handle = self.scheduler_handle.lock();
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            tracing::debug!("自动备份调度器已在运行");
            return;
        }
        *handle = Some(self.scheduler.clone().start());
        tracing::info!(
            "自动备份调度器已启动，轮询间隔 {}s",
            self.scheduler.check_interval().as_secs()
        );
    }

    /// 停止调度器并等待当前一轮结束
    pub async fn stop(&self) {
        self.scheduler.stop();
        let handle = self.scheduler_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("等待调度器退出失败: {}", e);
            }
        }
    }

    // ==================== 任务操作 ====================

    /// 列出全部任务
    pub fn list_tasks(&self) -> TaskListing {
        self.registry.list()
    }

    /// 为本地目录在每个已启用目标上各创建一个备份任务
    ///
    /// `run_now` 为 true 时立即执行，否则按目标的每日触发时间排期
    ///
    /// # 返回
    /// 新创建的任务数（重复任务不计）
    pub fn add_backup(&self, local_dir: &Path, config: &AutoBackupConfig, run_now: bool) -> usize {
        self.add_backup_at(local_dir, config, Local::now(), run_now)
    }

    /// 以指定的当前时间创建备份任务
    pub fn add_backup_at(
        &self,
        local_dir: &Path,
        config: &AutoBackupConfig,
        now: DateTime<Local>,
        run_now: bool,
    ) -> usize {
        let mut added = 0;
        for target in config.enabled_servers() {
            let scheduled = scheduled_time_utc(target.time, now, run_now);
            if self.registry.add(scheduled, local_dir, target) {
                added += 1;
            }
        }
        if added == 0 {
            tracing::warn!("没有创建新的备份任务: {}", local_dir.display());
        }
        added
    }

    /// 使用管理器自身的配置创建备份任务
    pub fn add_backup_default(&self, local_dir: &Path, run_now: bool) -> usize {
        self.add_backup(local_dir, &self.config, run_now)
    }

    /// 删除任务
    pub fn delete_task(&self, selector: TaskSelector) -> usize {
        self.registry.delete(selector)
    }

    /// 重试失败的任务
    pub fn retry_task(&self, selector: TaskSelector) -> usize {
        self.registry.retry(selector)
    }

    // ==================== 持久化 ====================

    /// 把当前全部任务写入存储
    pub fn dump_tasks(&self, store: &dyn TaskStore) -> Result<usize> {
        let tasks = self.registry.snapshot();
        store
            .dump(&tasks)
            .with_context(|| format!("保存备份任务失败: {}", store.location()))?;
        Ok(tasks.len())
    }

    /// 从存储追加任务（与已有任务去重）
    ///
    /// 存储内容解析失败时登记表保持不变
    pub fn load_tasks(&self, store: &dyn TaskStore) -> Result<usize> {
        let tasks = store
            .load()
            .with_context(|| format!("读取备份任务失败: {}", store.location()))?;
        let total = tasks.len();
        let added = self.registry.extend(tasks);
        tracing::info!(
            "从 {} 恢复 {} 个备份任务（跳过重复 {} 个）",
            store.location(),
            added,
            total - added
        );
        Ok(added)
    }

    // ==================== 录制上传 ====================

    /// 把一次录制的产物上传到所有已启用的目标
    pub async fn upload_recording(
        &self,
        video_file: &Path,
        context: &Value,
    ) -> Result<Vec<PipelineReport>, BackupError> {
        let mut reports = Vec::new();
        for target in self.config.enabled_servers() {
            let report = self
                .pipeline
                .upload_recording(video_file, target, context)
                .await?;
            reports.push(report);
        }
        Ok(reports)
    }
}
