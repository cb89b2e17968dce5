//! 备份配置数据结构

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// 存储网关（备份目标）配置
///
/// 同一个本地目录可以备份到多个网关，每个网关有各自的账号、远程目录和每日触发时间
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayTarget {
    /// 是否启用
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 每日触发时间（HH:MM:SS）
    #[serde(default = "default_trigger_time")]
    pub time: NaiveTime,
    /// 网关地址，如 http://localhost:5244
    #[serde(alias = "url_alist")]
    pub url: String,
    /// 用户名
    #[serde(default)]
    pub username: String,
    /// 密码（sha256 摘要）
    #[serde(default)]
    pub password: String,
    /// 远程目录模板，可以包含 {time/%y%m%d} 之类的宏
    pub remote_dir: String,
    /// 上传成功后是否删除本地文件
    #[serde(default)]
    pub remove_after_upload: bool,
}

fn default_true() -> bool {
    true
}

fn default_trigger_time() -> NaiveTime {
    NaiveTime::MIN
}

impl GatewayTarget {
    /// 创建一个启用状态、零点触发的目标
    pub fn new(url: impl Into<String>, remote_dir: impl Into<String>) -> Self {
        Self {
            enabled: true,
            time: default_trigger_time(),
            url: url.into(),
            username: String::new(),
            password: String::new(),
            remote_dir: remote_dir.into(),
            remove_after_upload: false,
        }
    }

    /// 设置账号
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// 设置每日触发时间
    pub fn with_time(mut self, time: NaiveTime) -> Self {
        self.time = time;
        self
    }

    /// 设置上传后删除
    pub fn with_remove_after_upload(mut self, remove: bool) -> Self {
        self.remove_after_upload = remove;
        self
    }

    /// 去掉末尾斜杠的网关地址
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// 用于展示的远程位置（未展开宏）
    pub fn display_location(&self) -> String {
        format!("{}{}", self.url, self.remote_dir)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("网关地址 url 不能为空".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(format!("网关地址必须以 http:// 或 https:// 开头: {}", self.url));
        }
        if self.remote_dir.trim().is_empty() {
            return Err(format!("网关 {} 的 remote_dir 不能为空", self.url));
        }
        Ok(())
    }
}

/// 自动备份配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoBackupConfig {
    /// 调度器轮询间隔（秒）
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// 任务持久化文件（.json 或 .db）
    #[serde(default = "default_store")]
    pub store: String,
    /// 备份目标列表
    #[serde(default)]
    pub servers: Vec<GatewayTarget>,
}

fn default_check_interval() -> u64 {
    60
}

fn default_store() -> String {
    "tasks.json".to_string()
}

impl Default for AutoBackupConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            store: default_store(),
            servers: Vec::new(),
        }
    }
}

impl AutoBackupConfig {
    /// 已启用的备份目标
    pub fn enabled_servers(&self) -> impl Iterator<Item = &GatewayTarget> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.check_interval == 0 {
            return Err("check_interval 必须大于 0".to_string());
        }
        for server in &self.servers {
            server.validate()?;
        }
        Ok(())
    }
}
