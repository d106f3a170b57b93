//! File operation endpoints against a running server: binary round-trip via
//! base64, mkdir semantics, and the files-only delete policy (spec §8 seed 6
//! and §4.4).

mod support;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

#[tokio::test]
async fn binary_content_round_trips_through_write_and_read() {
    let server = support::TestServer::start().await;
    let client = server.client();
    let path = server.workdir().join("blob.bin");
    let payload: Vec<u8> = vec![0, 1, 2, 255, 0, 254, 10, 13];

    let write_response = client
        .post(format!("{}/api/write", server.base_url))
        .json(&json!({
            "path": path.to_string_lossy(),
            "content_base64": BASE64.encode(&payload),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(write_response.status(), reqwest::StatusCode::OK);

    let read: Value = client
        .post(format!("{}/api/read", server.base_url))
        .json(&json!({ "path": path.to_string_lossy() }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(read["data"]["is_binary"], true);
    assert_eq!(read["data"]["size"], payload.len());
    let decoded = BASE64.decode(read["data"]["content_base64"].as_str().unwrap()).unwrap();
    assert_eq!(decoded, payload);
}

#[tokio::test]
async fn write_to_a_missing_parent_directory_fails() {
    let server = support::TestServer::start().await;
    let client = server.client();
    let path = server.workdir().join("no/such/dir/file.txt");

    let response = client
        .post(format!("{}/api/write", server.base_url))
        .json(&json!({
            "path": path.to_string_lossy(),
            "content_base64": BASE64.encode(b"hi"),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "FileNotFound");
    assert!(!path.exists());
}

#[tokio::test]
async fn mkdir_recursive_then_non_recursive_on_same_path_fails_file_exists() {
    let server = support::TestServer::start().await;
    let client = server.client();
    let path = server.workdir().join("a/b/c");

    let first = client
        .post(format!("{}/api/mkdir", server.base_url))
        .json(&json!({ "path": path.to_string_lossy(), "recursive": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::OK);

    let second = client
        .post(format!("{}/api/mkdir", server.base_url))
        .json(&json!({ "path": path.to_string_lossy(), "recursive": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["error"]["code"], "FileExists");
}

#[tokio::test]
async fn delete_on_a_directory_fails_is_directory() {
    let server = support::TestServer::start().await;
    let client = server.client();
    let dir = server.workdir().join("adir");

    client
        .post(format!("{}/api/mkdir", server.base_url))
        .json(&json!({ "path": dir.to_string_lossy() }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{}/api/delete", server.base_url))
        .json(&json!({ "path": dir.to_string_lossy() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "IsDirectory");
}

#[tokio::test]
async fn delete_on_a_plain_file_succeeds() {
    let server = support::TestServer::start().await;
    let client = server.client();
    let path = server.workdir().join("gone.txt");

    client
        .post(format!("{}/api/write", server.base_url))
        .json(&json!({
            "path": path.to_string_lossy(),
            "content_base64": BASE64.encode(b"bye"),
        }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{}/api/delete", server.base_url))
        .json(&json!({ "path": path.to_string_lossy() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(!path.exists());
}

#[tokio::test]
async fn list_files_rejects_paths_outside_the_allowed_roots() {
    let server = support::TestServer::start().await;
    let client = server.client();

    let response = client
        .post(format!("{}/api/list-files", server.base_url))
        .json(&json!({ "path": "/etc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "PathSecurityViolation");
}

#[tokio::test]
async fn list_files_recursive_includes_nested_entries_with_relative_paths() {
    let server = support::TestServer::start().await;
    let client = server.client();
    let root = server.workdir().join("tree");
    client
        .post(format!("{}/api/mkdir", server.base_url))
        .json(&json!({ "path": root.join("sub").to_string_lossy(), "recursive": true }))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{}/api/write", server.base_url))
        .json(&json!({
            "path": root.join("sub/nested.txt").to_string_lossy(),
            "content_base64": BASE64.encode(b"n"),
        }))
        .send()
        .await
        .unwrap();

    let listed: Value = client
        .post(format!("{}/api/list-files", server.base_url))
        .json(&json!({ "path": root.to_string_lossy(), "recursive": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let relatives: Vec<String> = listed["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["relative_path"].as_str().unwrap().to_string())
        .collect();
    assert!(relatives.contains(&"sub".to_string()));
    assert!(relatives.iter().any(|p| p.ends_with("nested.txt")));
}

#[tokio::test]
async fn read_file_stream_emits_an_sse_event_sequence() {
    let server = support::TestServer::start().await;
    let client = server.client();
    let path = server.workdir().join("streamed.txt");
    client
        .post(format!("{}/api/write", server.base_url))
        .json(&json!({
            "path": path.to_string_lossy(),
            "content_base64": BASE64.encode(b"streamed content"),
        }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{}/api/read/stream", server.base_url))
        .json(&json!({ "path": path.to_string_lossy() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("\"type\":\"metadata\""));
    assert!(body.contains("\"type\":\"chunk\""));
    assert!(body.contains("\"type\":\"complete\""));
}
