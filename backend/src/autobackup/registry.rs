//! 备份任务登记表
//!
//! 按插入顺序保存所有备份任务。调度器和外部请求共享同一个登记表，
//! 所有修改都在同一把写锁内完成；锁不会跨 `.await` 持有。

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::GatewayTarget;
use super::task::{BackupTask, BackupTaskStatus, TaskSelector, TaskSummary};

/// 备份任务登记表
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<Vec<BackupTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加任务，已存在相同（时间、目录、目标）的任务时不做任何事
    ///
    /// # 返回
    /// 是否真的添加了任务
    pub fn add(&self, scheduled_time: DateTime<Utc>, local_dir: &Path, target: &GatewayTarget) -> bool {
        let mut tasks = self.tasks.write();
        if tasks
            .iter()
            .any(|t| t.same_job(&scheduled_time, local_dir, target))
        {
            tracing::debug!("任务已存在，跳过: {} -> {}", local_dir.display(), target.remote_dir);
            return false;
        }

        tracing::info!(
            "自动备份任务已创建: {}, {} -> {}",
            scheduled_time,
            local_dir.display(),
            target.remote_dir
        );
        tasks.push(BackupTask::new(
            scheduled_time,
            PathBuf::from(local_dir),
            target.clone(),
        ));
        true
    }

    /// 批量追加任务（用于从存储恢复），同样去重
    ///
    /// 在一次加锁内完成，外部不会看到只追加了一半的状态
    pub fn extend(&self, incoming: Vec<BackupTask>) -> usize {
        let mut tasks = self.tasks.write();
        let mut added = 0;
        for task in incoming {
            if tasks
                .iter()
                .any(|t| t.same_job(&task.scheduled_time, &task.local_dir, &task.target))
            {
                continue;
            }
            tasks.push(task);
            added += 1;
        }
        added
    }

    /// 删除任务
    ///
    /// 序号越界时不做任何事
    pub fn delete(&self, selector: TaskSelector) -> usize {
        let mut tasks = self.tasks.write();
        match selector {
            TaskSelector::All => {
                let removed = tasks.len();
                tasks.clear();
                tracing::info!("已清空全部 {} 个备份任务", removed);
                removed
            }
            TaskSelector::Index(index) if index < tasks.len() => {
                let task = tasks.remove(index);
                tracing::info!("已删除备份任务 {}: {}", index, task.local_dir.display());
                1
            }
            TaskSelector::Index(index) => {
                tracing::warn!("任务序号 {} 不存在（共 {} 个）", index, tasks.len());
                0
            }
        }
    }

    /// 直接写入任务状态
    pub fn set_status(&self, index: usize, status: BackupTaskStatus) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(index) {
            Some(task) => {
                task.status = status;
                true
            }
            None => false,
        }
    }

    /// 按运行时标识写入状态
    ///
    /// 调度器执行期间外部可能删除任务导致序号变化，调度器内部使用标识定位
    pub(crate) fn set_status_by_id(&self, id: &str, status: BackupTaskStatus) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.status = status;
                true
            }
            None => false,
        }
    }

    /// 重试失败的任务：failed → waiting，其它状态不变
    ///
    /// # 返回
    /// 被重置为 waiting 的任务数
    pub fn retry(&self, selector: TaskSelector) -> usize {
        let mut tasks = self.tasks.write();
        let mut retried = 0;
        for (index, task) in tasks.iter_mut().enumerate() {
            let selected = match selector {
                TaskSelector::All => true,
                TaskSelector::Index(i) => i == index,
            };
            if selected && task.status == BackupTaskStatus::Failed {
                task.status = BackupTaskStatus::Waiting;
                retried += 1;
            }
        }
        if retried > 0 {
            tracing::info!("已重置 {} 个失败任务为等待状态", retried);
        }
        retried
    }

    /// 标记一个到期任务为上传中
    ///
    /// 检查与修改在同一把锁内完成，保证同一个任务只会被取走一次
    pub(crate) fn claim_if_due(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) if task.is_due(now) => {
                task.status = BackupTaskStatus::Uploading;
                true
            }
            _ => false,
        }
    }

    /// 当前到期的任务（按登记顺序）
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Vec<BackupTask> {
        self.tasks
            .read()
            .iter()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect()
    }

    /// 任务列表快照
    pub fn list(&self) -> TaskListing {
        TaskListing {
            tasks: Arc::new(self.snapshot()),
        }
    }

    /// 全部任务的拷贝
    pub fn snapshot(&self) -> Vec<BackupTask> {
        self.tasks.read().clone()
    }

    pub fn get(&self, index: usize) -> Option<BackupTask> {
        self.tasks.read().get(index).cloned()
    }

    pub fn statuses(&self) -> Vec<BackupTaskStatus> {
        self.tasks.read().iter().map(|t| t.status).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

/// 任务列表
///
/// 基于某一时刻的快照，摘要在遍历时才生成，可以反复遍历
#[derive(Debug, Clone)]
pub struct TaskListing {
    tasks: Arc<Vec<BackupTask>>,
}

impl TaskListing {
    pub fn iter(&self) -> impl Iterator<Item = TaskSummary> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .map(|(index, task)| TaskSummary::from_task(index, task))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Display for TaskListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for summary in self.iter() {
            writeln!(f, "{}", summary)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn target() -> GatewayTarget {
        GatewayTarget::new("http://localhost:5244", "/records/")
    }

    fn registry_with(statuses: &[BackupTaskStatus]) -> TaskRegistry {
        let registry = TaskRegistry::new();
        for (i, status) in statuses.iter().enumerate() {
            registry.add(at(i as u32), Path::new("/rec/show1"), &target());
            registry.set_status(i, *status);
        }
        registry
    }

    #[test]
    fn test_add_is_deduplicated() {
        let registry = TaskRegistry::new();
        assert!(registry.add(at(7), Path::new("/rec/show1"), &target()));
        assert!(!registry.add(at(7), Path::new("/rec/show1"), &target()));
        assert_eq!(registry.len(), 1);

        // 目标不同则不是重复任务
        let other = target().with_remove_after_upload(true);
        assert!(registry.add(at(7), Path::new("/rec/show1"), &other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_dedup_ignores_status() {
        let registry = TaskRegistry::new();
        registry.add(at(7), Path::new("/rec/show1"), &target());
        registry.set_status(0, BackupTaskStatus::Completed);
        assert!(!registry.add(at(7), Path::new("/rec/show1"), &target()));
    }

    #[test]
    fn test_delete_shifts_indices() {
        let registry = TaskRegistry::new();
        registry.add(at(1), Path::new("/rec/a"), &target());
        registry.add(at(2), Path::new("/rec/b"), &target());
        registry.add(at(3), Path::new("/rec/c"), &target());

        assert_eq!(registry.delete(TaskSelector::Index(1)), 1);
        assert_eq!(registry.get(1).unwrap().local_dir, PathBuf::from("/rec/c"));
        assert_eq!(registry.delete(TaskSelector::Index(9)), 0);
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.delete(TaskSelector::All), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_retry_only_touches_failed() {
        use BackupTaskStatus::*;
        let registry = registry_with(&[Waiting, Failed, Completed, Failed]);

        assert_eq!(registry.retry(TaskSelector::All), 2);
        assert_eq!(registry.statuses(), vec![Waiting, Waiting, Completed, Waiting]);
    }

    #[test]
    fn test_retry_single_index() {
        use BackupTaskStatus::*;
        let registry = registry_with(&[Failed, Aborted, Failed]);

        assert_eq!(registry.retry(TaskSelector::Index(1)), 0);
        assert_eq!(registry.retry(TaskSelector::Index(2)), 1);
        assert_eq!(registry.statuses(), vec![Failed, Aborted, Waiting]);
    }

    #[test]
    fn test_claim_if_due() {
        let registry = TaskRegistry::new();
        registry.add(at(7), Path::new("/rec/show1"), &target());
        let id = registry.get(0).unwrap().id;

        assert!(!registry.claim_if_due(&id, at(6)));
        assert!(registry.claim_if_due(&id, at(8)));
        assert!(!registry.claim_if_due(&id, at(8)));
        assert_eq!(registry.statuses(), vec![BackupTaskStatus::Uploading]);
    }

    #[test]
    fn test_due_tasks_in_order() {
        let registry = TaskRegistry::new();
        registry.add(at(9), Path::new("/rec/late"), &target());
        registry.add(at(5), Path::new("/rec/early"), &target());
        registry.add(at(6), Path::new("/rec/done"), &target());
        registry.set_status(2, BackupTaskStatus::Completed);

        let due: Vec<_> = registry
            .due_tasks(at(8))
            .into_iter()
            .map(|t| t.local_dir)
            .collect();
        assert_eq!(due, vec![PathBuf::from("/rec/early")]);
    }

    #[test]
    fn test_listing_is_restartable() {
        let registry = TaskRegistry::new();
        registry.add(at(1), Path::new("/rec/a"), &target());
        registry.add(at(2), Path::new("/rec/b"), &target());

        let listing = registry.list();
        let first: Vec<_> = listing.iter().map(|s| s.index).collect();
        let second: Vec<_> = listing.iter().map(|s| s.index).collect();
        assert_eq!(first, vec![0, 1]);
        assert_eq!(first, second);

        let summary = listing.iter().nth(1).unwrap();
        assert_eq!(summary.remote, "http://localhost:5244/records/");
        assert_eq!(listing.to_string().lines().count(), 2);
    }
}
