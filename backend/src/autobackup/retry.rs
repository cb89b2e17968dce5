//! 重试执行器
//!
//! 所有访问网关的请求都经过这里：有限次数重试 + 指数退避。
//! 重试耗尽时不返回错误，而是返回 `code = 500` 的统一失败响应。

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use super::error::BackupError;

/// 网关成功码
pub const SUCCESS_CODE: i64 = 200;

/// 重试耗尽时的统一失败码
pub const EXHAUSTED_CODE: i64 = 500;

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// 单次退避上限（秒）
pub const MAX_BACKOFF_SECS: u64 = 600;

/// 网关响应体
///
/// 网关的所有接口都返回 `{code, message, data}`，缺省 code 视为成功
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default = "default_code")]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn default_code() -> i64 {
    SUCCESS_CODE
}

impl GatewayResponse {
    /// 无数据的成功响应
    pub fn ok() -> Self {
        Self {
            code: SUCCESS_CODE,
            message: String::new(),
            data: serde_json::Value::Null,
        }
    }

    /// 失败响应
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: EXHAUSTED_CODE,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// 重试策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次）
    pub max_attempts: u32,
    /// 退避底数
    pub backoff_base: u64,
    /// 单次退避上限（秒）
    pub max_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: 4,
            max_backoff_secs: MAX_BACKOFF_SECS,
        }
    }
}

impl RetryPolicy {
    /// 创建新的重试策略，0 表示使用默认次数
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: if max_attempts == 0 {
                DEFAULT_MAX_ATTEMPTS
            } else {
                max_attempts
            },
            ..Default::default()
        }
    }

    /// 第 `attempt` 次尝试（从 1 开始）之前的等待时间
    ///
    /// 第一次不等待，之后依次为 1, 4, 16, 64, 256, 600, 600... 秒
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let secs = self
            .backoff_base
            .checked_pow(attempt - 2)
            .unwrap_or(u64::MAX)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}

/// 重试执行器
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 按默认次数执行
    pub async fn execute<F, Fut>(&self, label: &str, operation: F) -> GatewayResponse
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<GatewayResponse, BackupError>>,
    {
        self.execute_with(label, self.policy.max_attempts, operation).await
    }

    /// 执行一次逻辑请求，最多尝试 `max_attempts` 次（0 表示默认次数）
    ///
    /// - 传输错误、超时、非 200 的业务码：退避后重试
    /// - 不可重试的错误（如本地文件打不开）：立即返回失败，不消耗重试次数
    /// - 全部失败：返回 `code = 500`
    pub async fn execute_with<F, Fut>(
        &self,
        label: &str,
        max_attempts: u32,
        mut operation: F,
    ) -> GatewayResponse
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<GatewayResponse, BackupError>>,
    {
        let max_attempts = if max_attempts == 0 {
            self.policy.max_attempts
        } else {
            max_attempts
        };

        for attempt in 1..=max_attempts {
            let delay = self.policy.delay_before(attempt);
            tracing::info!(
                "({}/{}) {} 秒后请求: {}",
                attempt,
                max_attempts,
                delay.as_secs(),
                label
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(response) if response.is_success() => return response,
                Ok(response) => {
                    tracing::warn!(
                        "响应错误，准备重试: {} (code={}, message={})",
                        label,
                        response.code,
                        response.message
                    );
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!("请求错误，准备重试: {}: {}", label, e);
                }
                Err(e) => {
                    tracing::error!("不可重试的错误，放弃请求: {}: {}", label, e);
                    return GatewayResponse::failure(e.to_string());
                }
            }
        }

        tracing::error!("全部 {} 次请求均失败: {}", max_attempts, label);
        GatewayResponse::failure(format!("{} 次尝试后仍然失败", max_attempts))
    }

    /// 上传单个文件
    ///
    /// 空文件不发起任何网络请求，直接视为成功。
    /// `operation` 每次尝试都会被调用，需要自己重新打开文件
    pub async fn execute_upload<F, Fut>(&self, file: &Path, operation: F) -> GatewayResponse
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<GatewayResponse, BackupError>>,
    {
        match tokio::fs::metadata(file).await {
            Ok(meta) if meta.len() == 0 => {
                tracing::warn!("跳过空文件: {}", file.display());
                return GatewayResponse::ok();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("读取文件信息失败: {}: {}", file.display(), e);
                return GatewayResponse::failure(BackupError::from(e).to_string());
            }
        }

        let label = format!("上传 {}", file.display());
        self.execute(&label, operation).await
    }
}
