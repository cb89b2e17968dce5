//! 备份错误处理模块
//!
//! 提供统一的错误分类，区分可重试的网络/接口错误与不可重试的本地错误

use thiserror::Error;

/// 备份错误
#[derive(Debug, Error)]
pub enum BackupError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 文件系统错误
    #[error("文件系统错误: {0}")]
    FileSystem(String),

    /// 目录不存在
    #[error("目录不存在: {0}")]
    DirectoryNotFound(String),

    /// 网络错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 超时
    #[error("操作超时: {0}")]
    Timeout(String),

    /// 网关返回的业务错误
    #[error("API 错误: {code} - {message}")]
    Api { code: i64, message: String },

    /// 获取 token 失败
    #[error("网关认证失败: {0}")]
    AuthFailed(String),

    /// 部分文件上传失败
    #[error("{} 个文件上传失败: {}", failed.len(), failed.join(", "))]
    UploadFailed { failed: Vec<String> },

    /// 路径模板解析错误
    #[error("路径宏解析失败: {0}")]
    Macro(String),

    /// 持久化错误
    #[error("持久化错误: {0}")]
    Persistence(String),

    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),
}

impl BackupError {
    /// 是否可重试
    ///
    /// 只有传输层错误和网关业务错误会交给重试执行器重试，
    /// 本地文件系统错误直接失败
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackupError::Network(_) | BackupError::Timeout(_) | BackupError::Api { .. }
        )
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => BackupError::DirectoryNotFound(err.to_string()),
            std::io::ErrorKind::TimedOut => BackupError::Timeout(err.to_string()),
            _ => BackupError::FileSystem(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for BackupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackupError::Timeout(err.to_string())
        } else {
            BackupError::Network(err.to_string())
        }
    }
}

/// 从 anyhow::Error 转换
impl From<anyhow::Error> for BackupError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return match io_err.kind() {
                std::io::ErrorKind::NotFound => BackupError::DirectoryNotFound(io_err.to_string()),
                std::io::ErrorKind::TimedOut => BackupError::Timeout(io_err.to_string()),
                _ => BackupError::FileSystem(io_err.to_string()),
            };
        }

        BackupError::Unknown(format!("{:#}", err))
    }
}
