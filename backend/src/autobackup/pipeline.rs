//! 上传执行流水线
//!
//! 给定一个到期任务：列出本地目录 → 计算远程目录 → 获取 token → 并发上传所有文件。
//! 任意一个文件失败则整个任务失败，已上传的文件不回滚。

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::config::GatewayTarget;
use super::error::BackupError;
use super::gateway::StorageGateway;
use super::macros;
use super::task::BackupTask;

/// 录制产物可能存在的后缀名
pub const RECORDING_EXTENSIONS: [&str; 5] = ["flv", "jsonl", "xml", "jpg", "mp4"];

/// 单次执行的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// 远程目录
    pub remote_dir: String,
    /// 上传成功的本地文件
    pub uploaded: Vec<PathBuf>,
    /// 远程已存在而跳过的本地文件
    pub skipped: Vec<PathBuf>,
}

/// 上传执行流水线
#[derive(Clone)]
pub struct ExecutionPipeline {
    gateway: Arc<dyn StorageGateway>,
}

impl ExecutionPipeline {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        Self { gateway }
    }

    /// 执行一个备份任务
    ///
    /// 本地目录读取失败不重试，直接返回错误
    pub async fn execute(&self, task: &BackupTask) -> Result<PipelineReport, BackupError> {
        let files = list_files(&task.local_dir).await?;
        let remote_root = macros::resolve(&task.target.remote_dir, &Value::Null)?;
        let remote_dir = dest_dir(&task.local_dir, &remote_root);

        if files.is_empty() {
            warn!("目录中没有需要上传的文件: {}", task.local_dir.display());
            return Ok(PipelineReport {
                remote_dir,
                ..Default::default()
            });
        }

        let token = self.gateway.authenticate(&task.target).await;
        if token.is_empty() {
            return Err(BackupError::AuthFailed(task.target.url.clone()));
        }

        info!(
            "开始上传 {} 个文件: {} -> {}{}",
            files.len(),
            task.local_dir.display(),
            task.target.url,
            remote_dir
        );

        let jobs = files
            .into_iter()
            .map(|file| {
                let remote = remote_file_path(&remote_dir, &file);
                (file, remote)
            })
            .collect();
        let uploaded = self.upload_all(&task.target, &token, jobs).await?;

        Ok(PipelineReport {
            remote_dir,
            uploaded,
            skipped: Vec::new(),
        })
    }

    /// 上传一次录制的全部产物
    ///
    /// 与视频文件同名、后缀在 [`RECORDING_EXTENSIONS`] 中的文件会一起上传，
    /// 远程目录由目标模板结合录制元数据展开，远程已存在的文件跳过
    pub async fn upload_recording(
        &self,
        video_file: &Path,
        target: &GatewayTarget,
        context: &Value,
    ) -> Result<PipelineReport, BackupError> {
        if !target.enabled {
            info!("目标未启用，跳过录制上传: {}", target.url);
            return Ok(PipelineReport::default());
        }

        let mut artifacts = Vec::new();
        for ext in RECORDING_EXTENSIONS {
            let candidate = video_file.with_extension(ext);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                artifacts.push(candidate);
            }
        }

        let remote_dir = macros::resolve(&target.remote_dir, context)?;
        let token = self.gateway.authenticate(target).await;
        if token.is_empty() {
            return Err(BackupError::AuthFailed(target.url.clone()));
        }

        let mut jobs = Vec::new();
        let mut skipped = Vec::new();
        for file in artifacts {
            let remote = remote_file_path(&remote_dir, &file);
            if self.gateway.exists(target, &token, &remote).await {
                warn!("远程文件已存在，跳过: {}", remote);
                skipped.push(file);
            } else {
                jobs.push((file, remote));
            }
        }

        let uploaded = self.upload_all(target, &token, jobs).await?;
        Ok(PipelineReport {
            remote_dir,
            uploaded,
            skipped,
        })
    }

    /// 并发上传，不限制并发数
    async fn upload_all(
        &self,
        target: &GatewayTarget,
        token: &str,
        jobs: Vec<(PathBuf, String)>,
    ) -> Result<Vec<PathBuf>, BackupError> {
        let mut set = JoinSet::new();
        for (local, remote) in jobs {
            let gateway = self.gateway.clone();
            let target = target.clone();
            let token = token.to_string();
            set.spawn(async move {
                let ok = gateway.upload(&target, &token, &local, &remote).await;
                (local, ok)
            });
        }

        let mut uploaded = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((local, true)) => uploaded.push(local),
                Ok((local, false)) => failed.push(local.display().to_string()),
                Err(e) => failed.push(format!("上传协程异常: {}", e)),
            }
        }

        if failed.is_empty() {
            uploaded.sort();
            Ok(uploaded)
        } else {
            failed.sort();
            Err(BackupError::UploadFailed { failed })
        }
    }
}

/// 列出目录下的文件（不含子目录），按文件名排序
async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, BackupError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        // 跟随符号链接，指向目录的链接同样跳过
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => files.push(path),
            Err(e) => warn!("无法读取文件信息，跳过: {}: {}", path.display(), e),
        }
    }
    files.sort();
    Ok(files)
}

/// 远程目录 = 远程根目录 + 本地目录的最后一级
///
/// 本地目录以 `/` 结尾时同样取最后一级名称
pub fn dest_dir(local_dir: &Path, remote_root: &str) -> String {
    let leaf = local_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    join_remote(remote_root, &leaf)
}

/// 拼接远程路径（始终使用 `/`）
pub fn join_remote(base: &str, name: &str) -> String {
    if base.is_empty() {
        return name.to_string();
    }
    if name.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), name)
}

fn remote_file_path(remote_dir: &str, local_file: &Path) -> String {
    let name = local_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    join_remote(remote_dir, &name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dest_dir() {
        assert_eq!(
            dest_dir(Path::new("/rec/show1"), "/remote/records/"),
            "/remote/records/show1"
        );
        assert_eq!(
            dest_dir(Path::new("/rec/show1/"), "/remote/records"),
            "/remote/records/show1"
        );
        assert_eq!(dest_dir(Path::new("/rec/show1"), "/"), "/show1");
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/a/b", "c.flv"), "/a/b/c.flv");
        assert_eq!(join_remote("/a/b/", "c.flv"), "/a/b/c.flv");
        assert_eq!(join_remote("", "c.flv"), "c.flv");
        assert_eq!(join_remote("/a", ""), "/a");
    }

    #[tokio::test]
    async fn test_list_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jsonl"), b"{}").unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"video").unwrap();
        std::fs::create_dir(dir.path().join("thumbs")).unwrap();

        let files = list_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.jsonl"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_files_skips_symlinked_directories() {
        let root = tempfile::tempdir().unwrap();
        let show = root.path().join("show1");
        let thumbs = root.path().join("thumbs_real");
        std::fs::create_dir_all(&show).unwrap();
        std::fs::create_dir_all(&thumbs).unwrap();
        std::fs::write(show.join("a.mp4"), b"video").unwrap();
        std::fs::write(show.join("b.jsonl"), b"{}").unwrap();
        std::fs::write(thumbs.join("c.jpg"), b"jpg").unwrap();
        std::os::unix::fs::symlink(&thumbs, show.join("thumbs")).unwrap();
        std::os::unix::fs::symlink(show.join("a.mp4"), show.join("latest.mp4")).unwrap();
        std::os::unix::fs::symlink(root.path().join("gone"), show.join("dangling")).unwrap();

        let files = list_files(&show).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.jsonl", "latest.mp4"]);
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_files(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, BackupError::DirectoryNotFound(_)));
        assert!(!err.is_retryable());
    }
}
