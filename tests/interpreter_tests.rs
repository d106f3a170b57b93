//! Code interpreter bridge endpoints against a running server, driven by a
//! small fake kernel that speaks the newline-delimited JSON protocol
//! (spec §4.5). No real language runtime is needed to exercise the bridge.

mod support;

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use sandboxd::config::InterpreterConfig;
use serde_json::{json, Value};

/// A kernel that, for every line of input it's fed, emits one stdout stream
/// chunk, one execute_result, and the idle status that ends the turn.
fn write_fake_kernel() -> tempfile::TempPath {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"#!/bin/sh
while IFS= read -r line; do
  printf '{{"type":"stream","name":"stdout","text":"ran: %s"}}\n' "$line"
  printf '{{"type":"execute_result","data":{{"text/plain":"42"}}}}\n'
  printf '{{"type":"status","state":"idle"}}\n'
done
"#
    )
    .unwrap();
    let path = file.into_temp_path();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn start_with_fake_kernel() -> (support::TestServer, tempfile::TempPath) {
    let script = write_fake_kernel();
    let server = support::TestServer::start_with(InterpreterConfig {
        kernel_command: Some(format!("/bin/sh {}", script.display())),
    })
    .await;
    (server, script)
}

#[tokio::test]
async fn context_lifecycle_create_list_and_delete() {
    let (server, _script) = start_with_fake_kernel().await;
    let client = server.client();

    let created: Value = client
        .post(format!("{}/api/notebook/session", server.base_url))
        .json(&json!({ "language": "python" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["data"]["language"], "python");
    let context_id = created["data"]["id"].as_str().unwrap().to_string();

    let listed: Value = client
        .get(format!("{}/api/notebook/sessions", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed["data"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c["id"] == context_id));

    let deleted = client
        .delete(format!("{}/api/notebook/session", server.base_url))
        .query(&[("session_id", context_id.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), reqwest::StatusCode::OK);

    let listed_after: Value = client
        .get(format!("{}/api/notebook/sessions", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed_after["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn run_code_demuxes_stdout_and_the_execute_result_into_typed_fields() {
    let (server, _script) = start_with_fake_kernel().await;
    let client = server.client();

    let created: Value = client
        .post(format!("{}/api/notebook/session", server.base_url))
        .json(&json!({ "language": "python" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let context_id = created["data"]["id"].as_str().unwrap().to_string();

    let run: Value = client
        .post(format!("{}/api/notebook/execute/sync", server.base_url))
        .json(&json!({ "session_id": context_id, "code": "1 + 1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let data = &run["data"];
    assert!(data["stdout"][0].as_str().unwrap().contains("ran: 1 + 1"));
    assert_eq!(data["results"][0]["text"], "42");
    assert!(data["error"].is_null());
}

#[tokio::test]
async fn run_code_stream_emits_stdout_result_and_complete_events() {
    let (server, _script) = start_with_fake_kernel().await;
    let client = server.client();

    let created: Value = client
        .post(format!("{}/api/notebook/session", server.base_url))
        .json(&json!({ "language": "python" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let context_id = created["data"]["id"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/api/notebook/execute", server.base_url))
        .json(&json!({ "session_id": context_id, "code": "1 + 1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("\"type\":\"stdout\""));
    assert!(body.contains("\"type\":\"result\""));
    assert!(body.contains("\"type\":\"complete\""));
}

#[tokio::test]
async fn running_code_against_an_unknown_context_returns_not_found() {
    let (server, _script) = start_with_fake_kernel().await;
    let client = server.client();

    let response = client
        .post(format!("{}/api/notebook/execute/sync", server.base_url))
        .json(&json!({ "session_id": "does-not-exist", "code": "1 + 1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
