//! 备份任务数据结构

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::config::GatewayTarget;

/// 备份任务状态
///
/// 状态流转：
/// - waiting → uploading → completed / failed
/// - failed → waiting（仅手动重试）
/// - uploading → aborted（仅在持久化时产生，表示上传被重启打断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupTaskStatus {
    /// 等待到点
    Waiting,
    /// 上传中
    Uploading,
    /// 已完成
    Completed,
    /// 失败（可重试）
    Failed,
    /// 已中止（不可重试）
    Aborted,
}

impl BackupTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupTaskStatus::Waiting => "waiting",
            BackupTaskStatus::Uploading => "uploading",
            BackupTaskStatus::Completed => "completed",
            BackupTaskStatus::Failed => "failed",
            BackupTaskStatus::Aborted => "aborted",
        }
    }

    /// 写入持久化存储时的状态：上传中的任务无法跨重启续传，记为中止
    pub fn for_persistence(self) -> Self {
        match self {
            BackupTaskStatus::Uploading => BackupTaskStatus::Aborted,
            other => other,
        }
    }
}

impl std::fmt::Display for BackupTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackupTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(BackupTaskStatus::Waiting),
            "uploading" => Ok(BackupTaskStatus::Uploading),
            "completed" => Ok(BackupTaskStatus::Completed),
            "failed" => Ok(BackupTaskStatus::Failed),
            "aborted" => Ok(BackupTaskStatus::Aborted),
            _ => Err(format!("未知的任务状态: {}", s)),
        }
    }
}

/// 备份任务
///
/// 一个任务 = 在 `scheduled_time` 之后把 `local_dir` 下的文件上传到 `target`
#[derive(Debug, Clone)]
pub struct BackupTask {
    /// 运行时标识（不持久化，不参与相等比较）
    pub id: String,
    /// 计划执行时间
    pub scheduled_time: DateTime<Utc>,
    /// 本地目录
    pub local_dir: PathBuf,
    /// 备份目标
    pub target: GatewayTarget,
    /// 任务状态
    pub status: BackupTaskStatus,
}

impl BackupTask {
    /// 创建等待中的任务
    pub fn new(scheduled_time: DateTime<Utc>, local_dir: PathBuf, target: GatewayTarget) -> Self {
        Self::with_status(scheduled_time, local_dir, target, BackupTaskStatus::Waiting)
    }

    /// 以指定状态创建任务（用于从存储恢复）
    pub fn with_status(
        scheduled_time: DateTime<Utc>,
        local_dir: PathBuf,
        target: GatewayTarget,
        status: BackupTaskStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scheduled_time,
            local_dir,
            target,
            status,
        }
    }

    /// 是否与另一个任务描述同一份备份工作（时间、目录、目标都相同）
    pub fn same_job(
        &self,
        scheduled_time: &DateTime<Utc>,
        local_dir: &Path,
        target: &GatewayTarget,
    ) -> bool {
        &self.scheduled_time == scheduled_time
            && self.local_dir.as_path() == local_dir
            && &self.target == target
    }

    /// 是否到期可执行
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == BackupTaskStatus::Waiting && self.scheduled_time <= now
    }
}

impl PartialEq for BackupTask {
    fn eq(&self, other: &Self) -> bool {
        self.same_job(&other.scheduled_time, &other.local_dir, &other.target)
            && self.status == other.status
    }
}

impl Eq for BackupTask {}

/// 任务选择器：按序号或全部
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSelector {
    /// 按列表序号
    Index(usize),
    /// 全部任务
    All,
}

impl TaskSelector {
    /// 兼容命令行习惯：负数表示全部
    pub fn from_id(id: i64) -> Self {
        if id < 0 {
            TaskSelector::All
        } else {
            TaskSelector::Index(id as usize)
        }
    }
}

impl std::str::FromStr for TaskSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(TaskSelector::All);
        }
        s.parse::<usize>()
            .map(TaskSelector::Index)
            .map_err(|_| format!("无效的任务序号: {}（应为数字或 all）", s))
    }
}

/// 任务摘要（用于展示）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    /// 列表序号
    pub index: usize,
    /// 状态
    pub status: BackupTaskStatus,
    /// 计划执行时间
    pub scheduled_time: DateTime<Utc>,
    /// 本地目录
    pub local_dir: PathBuf,
    /// 远程位置（网关地址 + 未展开的目录模板）
    pub remote: String,
}

impl TaskSummary {
    pub fn from_task(index: usize, task: &BackupTask) -> Self {
        Self {
            index,
            status: task.status,
            scheduled_time: task.scheduled_time,
            local_dir: task.local_dir.clone(),
            remote: task.target.display_location(),
        }
    }
}

impl std::fmt::Display for TaskSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ID: {} \tStatus: {} \tScheduled Time: {} \tLocal dir:{} \tRemote dir:{}",
            self.index,
            self.status,
            self.scheduled_time.with_timezone(&Local).format("%y/%m/%dT%H:%M:%S"),
            self.local_dir.display(),
            self.remote
        )
    }
}
