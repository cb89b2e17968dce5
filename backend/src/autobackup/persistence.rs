//! 备份任务持久化模块
//!
//! 进程重启前把登记表写入存储，启动后再读回：
//! - JSON 文件：一个任务记录数组
//! - SQLite：`backup_tasks` 表，每次写入整体替换
//!
//! 写入时 uploading 状态记为 aborted（上传无法跨重启续传）。
//! 读取时先解析全部记录，任意一条出错则整体失败，不会只恢复一部分。

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::config::GatewayTarget;
use super::task::{BackupTask, BackupTaskStatus};

/// 任务存储
pub trait TaskStore: Send + Sync {
    /// 存储位置（用于日志）
    fn location(&self) -> String;

    /// 用给定任务列表整体替换存储内容
    fn dump(&self, tasks: &[BackupTask]) -> Result<()>;

    /// 读取全部任务
    fn load(&self) -> Result<Vec<BackupTask>>;
}

/// 按文件扩展名打开存储：`.db` / `.sqlite` 使用 SQLite，其余使用 JSON 文件
pub fn open_store(path: impl AsRef<Path>) -> Result<Box<dyn TaskStore>> {
    let path = path.as_ref();
    let is_sqlite = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "db" | "sqlite" | "sqlite3"))
        .unwrap_or(false);

    if is_sqlite {
        Ok(Box::new(SqliteStore::open(path)?))
    } else {
        Ok(Box::new(JsonFileStore::new(path)))
    }
}

/// 持久化记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// 计划执行时间（Unix 时间戳，秒）
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
    pub local_dir: PathBuf,
    pub target: GatewayTarget,
    pub status: BackupTaskStatus,
}

impl TaskRecord {
    pub fn from_task(task: &BackupTask) -> Self {
        Self {
            time: task.scheduled_time,
            local_dir: task.local_dir.clone(),
            target: task.target.clone(),
            status: task.status.for_persistence(),
        }
    }

    pub fn into_task(self) -> BackupTask {
        BackupTask::with_status(self.time, self.local_dir, self.target, self.status)
    }
}

// ==================== JSON 文件 ====================

/// JSON 文件存储
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskStore for JsonFileStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn dump(&self, tasks: &[BackupTask]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("创建目录失败: {}", parent.display()))?;
            }
        }

        let records: Vec<TaskRecord> = tasks.iter().map(TaskRecord::from_task).collect();
        let content = serde_json::to_string_pretty(&records).context("序列化任务列表失败")?;

        // 先写临时文件再替换，避免写到一半时留下损坏的存储
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("写入任务文件失败: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("替换任务文件失败: {}", self.path.display()))?;

        tracing::info!("已保存 {} 个备份任务到 {}", records.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Vec<BackupTask>> {
        if !self.path.exists() {
            tracing::debug!("任务文件不存在: {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("读取任务文件失败: {}", self.path.display()))?;
        let records: Vec<TaskRecord> = serde_json::from_str(&content)
            .with_context(|| format!("解析任务文件失败: {}", self.path.display()))?;

        Ok(records.into_iter().map(TaskRecord::into_task).collect())
    }
}

// ==================== SQLite ====================

/// SQLite 存储
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开（或创建）数据库
    pub fn open(db_path: &Path) -> Result<Self> {
        // 确保父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("打开数据库失败: {}", db_path.display()))?;
        let store = Self {
            path: db_path.to_path_buf(),
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow!("获取数据库锁失败: {}", e))?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS backup_tasks (
                time INTEGER NOT NULL,          -- 计划执行时间 (Unix timestamp 秒)
                local_dir TEXT NOT NULL,        -- 本地目录
                target_config TEXT NOT NULL,    -- 备份目标 (JSON)
                status TEXT NOT NULL            -- waiting/completed/failed/aborted
            )
            "#,
            [],
        )?;

        Ok(())
    }
}

impl TaskStore for SqliteStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn dump(&self, tasks: &[BackupTask]) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|e| anyhow!("获取数据库锁失败: {}", e))?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM backup_tasks", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO backup_tasks (time, local_dir, target_config, status) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for task in tasks {
                let record = TaskRecord::from_task(task);
                let target = serde_json::to_string(&record.target)?;
                stmt.execute(params![
                    record.time.timestamp(),
                    record.local_dir.to_string_lossy(),
                    target,
                    record.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!("已保存 {} 个备份任务到数据库 {}", tasks.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Vec<BackupTask>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("获取数据库锁失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT time, local_dir, target_config, status FROM backup_tasks ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tasks = Vec::with_capacity(rows.len());
        for (time, local_dir, target, status) in rows {
            let time = DateTime::from_timestamp(time, 0)
                .ok_or_else(|| anyhow!("无效的时间戳: {}", time))?;
            let target: GatewayTarget = serde_json::from_str(&target)
                .with_context(|| format!("解析备份目标失败: {}", local_dir))?;
            let status: BackupTaskStatus = status.parse().map_err(|e: String| anyhow!(e))?;
            tasks.push(BackupTask::with_status(
                time,
                PathBuf::from(local_dir),
                target,
                status,
            ));
        }

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_tasks() -> Vec<BackupTask> {
        let target = GatewayTarget::new("http://localhost:5244", "/records/{time/%Y-%m}")
            .with_credentials("admin", "secret");
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
        vec![
            BackupTask::with_status(time, PathBuf::from("/rec/a"), target.clone(), BackupTaskStatus::Waiting),
            BackupTask::with_status(time, PathBuf::from("/rec/b"), target.clone(), BackupTaskStatus::Uploading),
            BackupTask::with_status(time, PathBuf::from("/rec/c"), target, BackupTaskStatus::Failed),
        ]
    }

    fn assert_round_trip(store: &dyn TaskStore) {
        let tasks = sample_tasks();
        store.dump(&tasks).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0], tasks[0]);
        assert_eq!(loaded[1].status, BackupTaskStatus::Aborted);
        assert_eq!(loaded[1].local_dir, PathBuf::from("/rec/b"));
        assert_eq!(loaded[2], tasks[2]);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("tasks.json"));
        assert_round_trip(&store);
    }

    #[test]
    fn test_json_time_is_epoch_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("tasks.json"));
        store.dump(&sample_tasks()[..1]).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw[0]["time"], serde_json::json!(1714546800));
        assert_eq!(raw[0]["status"], "waiting");
    }

    #[test]
    fn test_json_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("none.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_json_malformed_record_fails_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"[
                {"time": 1714546800, "local_dir": "/rec/a", "target": {"url": "http://x", "remote_dir": "/r"}, "status": "waiting"},
                {"time": 1714546800, "local_dir": "/rec/b", "target": {"url": "http://x", "remote_dir": "/r"}, "status": "paused"}
            ]"#,
        )
        .unwrap();

        assert!(JsonFileStore::new(&path).load().is_err());
    }

    #[test]
    fn test_sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("tasks.db")).unwrap();
        assert_round_trip(&store);
    }

    #[test]
    fn test_sqlite_dump_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("tasks.db")).unwrap();
        store.dump(&sample_tasks()).unwrap();
        store.dump(&sample_tasks()[..1]).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_open_store_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path().join("tasks.sqlite")).unwrap();
        db.dump(&sample_tasks()).unwrap();
        assert_eq!(db.load().unwrap().len(), 3);

        let json = open_store(dir.path().join("tasks.json")).unwrap();
        json.dump(&sample_tasks()).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("tasks.json")).unwrap();
        assert!(raw.trim_start().starts_with('['));
    }
}
