//! 存储网关客户端
//!
//! 引擎只依赖 [`StorageGateway`] 能力接口；[`AlistClient`] 是基于 Alist HTTP API 的实现，
//! 所有请求都经过 [`RetryExecutor`] 重试。

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use super::config::GatewayTarget;
use super::error::BackupError;
use super::retry::{GatewayResponse, RetryExecutor, RetryPolicy, SUCCESS_CODE};

/// 存储网关能力接口
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// 用账号换取 token，失败时返回空字符串
    async fn authenticate(&self, target: &GatewayTarget) -> String;

    /// 上传单个文件，重试耗尽返回 false
    ///
    /// 上传成功且目标配置了 `remove_after_upload` 时删除本地文件
    async fn upload(
        &self,
        target: &GatewayTarget,
        token: &str,
        local_file: &Path,
        remote_path: &str,
    ) -> bool;

    /// 远程路径是否已存在
    async fn exists(&self, target: &GatewayTarget, token: &str, remote_path: &str) -> bool;
}

/// Alist 网关客户端
#[derive(Debug, Clone)]
pub struct AlistClient {
    /// HTTP客户端
    client: Client,
    /// 重试执行器
    executor: RetryExecutor,
}

impl AlistClient {
    /// 创建新的网关客户端
    ///
    /// 上传大文件耗时不确定，只限制连接超时
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            executor: RetryExecutor::new(policy),
        })
    }

    /// 发送请求并解析为网关响应
    ///
    /// 网关对不存在的对象会报 "object not found"，这种情况按成功处理，由调用方看 data
    async fn send(request: RequestBuilder) -> Result<GatewayResponse, BackupError> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let mut parsed: GatewayResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(BackupError::Network(format!("无法解析网关响应: {}", e)));
            }
            Err(_) => {
                return Err(BackupError::Api {
                    code: status.as_u16() as i64,
                    message: text,
                });
            }
        };

        if parsed.message.contains("object not found") {
            parsed.code = SUCCESS_CODE;
            return Ok(parsed);
        }

        if !status.is_success() {
            return Err(BackupError::Api {
                code: status.as_u16() as i64,
                message: parsed.message,
            });
        }

        Ok(parsed)
    }

    async fn put_file(
        client: Client,
        url: String,
        token: String,
        encoded_path: String,
        local_file: PathBuf,
    ) -> Result<GatewayResponse, BackupError> {
        // 每次尝试都重新打开文件，避免重试时读到已消费的流
        let file = tokio::fs::File::open(&local_file)
            .await
            .map_err(|e| BackupError::FileSystem(format!("{}: {}", local_file.display(), e)))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| BackupError::FileSystem(format!("{}: {}", local_file.display(), e)))?
            .len();
        debug!("载入文件 {} ({} 字节)", local_file.display(), len);

        let request = client
            .put(url)
            .header(AUTHORIZATION, token)
            .header("File-Path", encoded_path)
            .header("As-Task", "true")
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));

        Self::send(request).await
    }
}

#[async_trait]
impl StorageGateway for AlistClient {
    async fn authenticate(&self, target: &GatewayTarget) -> String {
        let url = format!("{}/api/auth/login/hash", target.base_url());
        let body = json!({
            "username": target.username,
            "password": target.password.to_lowercase(),
        });

        let response = self
            .executor
            .execute(&url, || Self::send(self.client.post(&url).json(&body)))
            .await;

        if !response.is_success() {
            error!("获取 token 失败: {} ({})", target.url, response.message);
            return String::new();
        }

        match response.data["token"].as_str() {
            Some(token) => token.to_string(),
            None => {
                warn!("网关响应中没有 token 字段: {}", target.url);
                String::new()
            }
        }
    }

    async fn upload(
        &self,
        target: &GatewayTarget,
        token: &str,
        local_file: &Path,
        remote_path: &str,
    ) -> bool {
        let url = format!("{}/api/fs/put", target.base_url());
        // 路径分隔符保持原样
        let encoded_path = urlencoding::encode(remote_path).replace("%2F", "/");

        let response = self
            .executor
            .execute_upload(local_file, || {
                Self::put_file(
                    self.client.clone(),
                    url.clone(),
                    token.to_string(),
                    encoded_path.clone(),
                    local_file.to_path_buf(),
                )
            })
            .await;

        if !response.is_success() {
            error!(
                "上传失败: {} -> {} ({})",
                local_file.display(),
                remote_path,
                response.message
            );
            return false;
        }

        info!("上传成功: {} -> {}", local_file.display(), remote_path);

        if target.remove_after_upload {
            match tokio::fs::remove_file(local_file).await {
                Ok(()) => info!("已删除本地文件: {}", local_file.display()),
                Err(e) => warn!("删除本地文件失败: {}: {}", local_file.display(), e),
            }
        }
        true
    }

    async fn exists(&self, target: &GatewayTarget, token: &str, remote_path: &str) -> bool {
        let url = format!("{}/api/fs/get", target.base_url());
        let body = json!({ "path": remote_path });

        let response = self
            .executor
            .execute(&url, || {
                Self::send(
                    self.client
                        .post(&url)
                        .header(AUTHORIZATION, token)
                        .json(&body),
                )
            })
            .await;

        if !response.is_success() {
            error!("查询远程路径失败: {} ({})", remote_path, response.message);
            return false;
        }
        !response.data.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = AlistClient::new(RetryPolicy::new(3));
        assert!(client.is_ok());
        assert_eq!(client.unwrap().executor.policy().max_attempts, 3);
    }
}
