//! AlistClient 与 Alist HTTP API 的契约测试

use autorec_backup::autobackup::{AlistClient, GatewayTarget, RetryPolicy, StorageGateway};
use serde_json::json;
use wiremock::matchers::{body_bytes, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn target(server: &MockServer) -> GatewayTarget {
    GatewayTarget::new(server.uri(), "/remote/records").with_credentials("admin", "ABCDEF0123")
}

fn client(max_attempts: u32) -> AlistClient {
    AlistClient::new(RetryPolicy::new(max_attempts)).unwrap()
}

#[tokio::test]
async fn authenticate_posts_lowercased_password_hash() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login/hash"))
        .and(body_json(json!({"username": "admin", "password": "abcdef0123"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "success",
            "data": {"token": "tok-123"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = client(1).authenticate(&target(&server)).await;
    assert_eq!(token, "tok-123");
}

#[tokio::test]
async fn authenticate_failure_returns_empty_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login/hash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 400,
            "message": "password is incorrect",
            "data": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = client(1).authenticate(&target(&server)).await;
    assert!(token.is_empty());
}

#[tokio::test]
async fn upload_streams_file_with_alist_headers() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/fs/put"))
        .and(header("Authorization", "tok-123"))
        .and(header("File-Path", "/remote/records/show1/%E5%BD%95%E6%92%AD.mp4"))
        .and(header("As-Task", "true"))
        .and(header("Content-Type", "application/octet-stream"))
        .and(body_bytes(b"video-bytes".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "success",
            "data": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("录播.mp4");
    std::fs::write(&file, b"video-bytes").unwrap();

    let ok = client(1)
        .upload(&target(&server), "tok-123", &file, "/remote/records/show1/录播.mp4")
        .await;
    assert!(ok);
    assert!(file.exists());
}

#[tokio::test]
async fn upload_removes_local_file_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/fs/put"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.flv");
    std::fs::write(&file, b"flv").unwrap();

    let target = target(&server).with_remove_after_upload(true);
    assert!(client(1).upload(&target, "tok", &file, "/remote/records/a.flv").await);
    assert!(!file.exists());
}

#[tokio::test]
async fn zero_byte_upload_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("empty.xml");
    std::fs::write(&file, b"").unwrap();

    assert!(client(1).upload(&target(&server), "tok", &file, "/r/empty.xml").await);
}

#[tokio::test]
async fn failed_upload_keeps_local_file() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/fs/put"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.flv");
    std::fs::write(&file, b"flv").unwrap();

    let target = target(&server).with_remove_after_upload(true);
    assert!(!client(1).upload(&target, "tok", &file, "/remote/records/a.flv").await);
    assert!(file.exists());
}

#[tokio::test]
async fn application_error_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/fs/put"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 500,
            "message": "storage busy"
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/fs/put"))
        .and(body_bytes(b"flv".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.flv");
    std::fs::write(&file, b"flv").unwrap();

    // 第二次尝试前等待 1 秒，且会重新读取完整文件
    assert!(client(2).upload(&target(&server), "tok", &file, "/r/a.flv").await);
}

#[tokio::test]
async fn exists_reads_fs_get_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/fs/get"))
        .and(body_json(json!({"path": "/remote/records/a.flv"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "success",
            "data": {"name": "a.flv", "size": 3, "is_dir": false}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/fs/get"))
        .and(body_json(json!({"path": "/remote/records/b.flv"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 500,
            "message": "failed get storage: object not found",
            "data": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(1);
    let target = target(&server);
    assert!(client.exists(&target, "tok", "/remote/records/a.flv").await);
    // object not found 不计入重试，直接视为不存在
    assert!(!client.exists(&target, "tok", "/remote/records/b.flv").await);
}
