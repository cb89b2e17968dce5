//! 备份调度器
//!
//! 固定间隔轮询登记表，把到期的 waiting 任务依次交给执行流水线：
//! - 同一轮内任务串行执行，单个任务内部文件并发上传
//! - 单个任务出错（包括 panic）只会把该任务标记为 failed，不影响同轮其它任务
//! - 整轮扫描出错只记录日志，下一轮照常进行

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::autobackup::pipeline::ExecutionPipeline;
use crate::autobackup::registry::TaskRegistry;
use crate::autobackup::task::BackupTaskStatus;

/// 单轮扫描统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// 本轮执行的任务数
    pub executed: usize,
    /// 成功数
    pub completed: usize,
    /// 失败数
    pub failed: usize,
    /// 执行期间已被删除、状态未写回的任务数
    pub orphaned: usize,
}

/// 备份调度器
pub struct BackupScheduler {
    /// 任务登记表
    registry: Arc<TaskRegistry>,
    /// 执行流水线
    pipeline: ExecutionPipeline,
    /// 轮询间隔
    check_interval: Duration,
    /// 取消令牌
    cancel_token: CancellationToken,
}

impl BackupScheduler {
    /// 最小轮询间隔
    pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

    /// 创建新的备份调度器
    ///
    /// 间隔小于 [`MIN_CHECK_INTERVAL`](Self::MIN_CHECK_INTERVAL) 时按最小间隔处理
    pub fn new(
        registry: Arc<TaskRegistry>,
        pipeline: ExecutionPipeline,
        check_interval: Duration,
    ) -> Self {
        Self {
            registry,
            pipeline,
            check_interval: check_interval.max(Self::MIN_CHECK_INTERVAL),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// 在后台启动轮询循环
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// 轮询主循环，直到 [`stop`](Self::stop) 被调用
    pub async fn run(self: Arc<Self>) {
        tracing::debug!(
            "自动备份调度器已启动（间隔: {}s）",
            self.check_interval.as_secs()
        );

        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    tracing::info!("自动备份调度器已停止");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let this = Arc::clone(&self);
            match tokio::spawn(async move { this.tick().await }).await {
                Ok(stats) if stats.executed > 0 => {
                    tracing::info!(
                        "本轮执行 {} 个任务：成功 {}，失败 {}",
                        stats.executed,
                        stats.completed,
                        stats.failed
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("调度扫描异常，等待下一轮: {}", e),
            }
        }
    }

    /// 停止轮询（正在执行的任务会继续完成）
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 执行一轮扫描
    pub async fn tick(&self) -> TickStats {
        self.tick_at(Utc::now()).await
    }

    /// 以指定时间执行一轮扫描
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickStats {
        let mut stats = TickStats::default();

        for task in self.registry.due_tasks(now) {
            // 扫描到执行之间任务可能已被删除或修改
            if !self.registry.claim_if_due(&task.id, now) {
                continue;
            }
            stats.executed += 1;

            let pipeline = self.pipeline.clone();
            let running = task.clone();
            let outcome = tokio::spawn(async move { pipeline.execute(&running).await }).await;

            let status = match outcome {
                Ok(Ok(report)) => {
                    tracing::info!(
                        "备份完成: {} -> {}{}（{} 个文件）",
                        task.local_dir.display(),
                        task.target.url,
                        report.remote_dir,
                        report.uploaded.len()
                    );
                    stats.completed += 1;
                    BackupTaskStatus::Completed
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        local_dir = %task.local_dir.display(),
                        target = %task.target.display_location(),
                        scheduled_time = %task.scheduled_time,
                        "备份失败: {}",
                        e
                    );
                    stats.failed += 1;
                    BackupTaskStatus::Failed
                }
                Err(e) => {
                    tracing::error!(
                        local_dir = %task.local_dir.display(),
                        target = %task.target.display_location(),
                        "备份执行异常: {}",
                        e
                    );
                    stats.failed += 1;
                    BackupTaskStatus::Failed
                }
            };

            if !self.registry.set_status_by_id(&task.id, status) {
                stats.orphaned += 1;
                tracing::warn!(
                    "任务在执行期间已被删除，状态 {} 未写回: {}",
                    status,
                    task.local_dir.display()
                );
            }
        }

        stats
    }
}
