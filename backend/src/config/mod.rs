// 配置管理模块

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::autobackup::config::AutoBackupConfig;
use crate::autobackup::retry::DEFAULT_MAX_ATTEMPTS;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 通用配置
    #[serde(default)]
    pub app: AppSection,
    /// 自动备份配置
    #[serde(default)]
    pub autobackup: AutoBackupConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 通用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    /// 网络请求最大尝试次数（0 表示使用默认值）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志文件，为空时只输出到终端
    #[serde(default)]
    pub file: String,
    /// 日志级别（可被 RUST_LOG 覆盖）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: String::new(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        // 确保父目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("创建配置目录失败")?;
            }
        }

        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {}", path.display()))?;

        Ok(())
    }

    /// 加载配置，文件不存在时写入并使用默认配置
    ///
    /// 文件存在但无法解析时返回错误，不会覆盖用户的配置文件
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("配置文件不存在，使用默认配置: {}", path.display());
            let default_config = Self::default();
            if let Err(e) = default_config.save_to_file(path).await {
                tracing::error!("保存默认配置失败: {}", e);
            }
            return Ok(default_config);
        }

        let config = Self::load_from_file(path).await?;
        tracing::info!("配置文件加载成功: {}", path.display());
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        self.autobackup
            .validate()
            .map_err(|e| anyhow!("autobackup 配置无效: {}", e))
    }
}
