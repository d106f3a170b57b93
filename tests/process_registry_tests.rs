//! End-to-end background process lifecycle against a running server:
//! listing, killing, and the terminal-status transition (spec §8 seed 4).

mod support;

use serde_json::{json, Value};

#[tokio::test]
async fn start_list_and_get_a_background_process() {
    let server = support::TestServer::start().await;
    let client = server.client();

    let started: Value = client
        .post(format!("{}/api/process/start", server.base_url))
        .json(&json!({ "command": "sleep 30" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["data"]["status"], "running");
    let process_id = started["data"]["id"].as_str().unwrap().to_string();
    assert!(started["data"]["pid"].as_u64().unwrap() > 0);

    let listed: Value = client
        .get(format!("{}/api/process/list", server.base_url))
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
        .any(|p| p["id"] == process_id));

    let fetched: Value = client
        .get(format!("{}/api/process/{}", server.base_url, process_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["data"]["id"], process_id);
    assert_eq!(fetched["data"]["command"], "sleep 30");
}

#[tokio::test]
async fn starting_a_process_with_a_caller_supplied_id_is_reflected_back() {
    let server = support::TestServer::start().await;
    let client = server.client();

    let started: Value = client
        .post(format!("{}/api/process/start", server.base_url))
        .json(&json!({ "command": "sleep 30", "process_id": "my-proc" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["data"]["id"], "my-proc");

    let fetched: Value = client
        .get(format!("{}/api/process/my-proc", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["data"]["id"], "my-proc");
}

#[tokio::test]
async fn kill_background_process_transitions_to_killed_within_a_second() {
    let server = support::TestServer::start().await;
    let client = server.client();

    let started: Value = client
        .post(format!("{}/api/process/start", server.base_url))
        .json(&json!({ "command": "sleep 60" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let process_id = started["data"]["id"].as_str().unwrap().to_string();

    let killed: Value = client
        .delete(format!("{}/api/process/{}", server.base_url, process_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(killed["data"]["killed"], true);

    tokio::time::sleep(std::time::Duration::from_millis(900)).await;
    let fetched: Value = client
        .get(format!("{}/api/process/{}", server.base_url, process_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["data"]["status"], "killed");
    assert!(fetched["data"]["exit_code"].is_number());
}

#[tokio::test]
async fn killing_an_unknown_process_id_returns_not_found() {
    let server = support::TestServer::start().await;
    let client = server.client();

    let response = client
        .delete(format!("{}/api/process/does-not-exist", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "ProcessNotFound");
}

#[tokio::test]
async fn kill_all_processes_reaps_every_running_process() {
    let server = support::TestServer::start().await;
    let client = server.client();

    for _ in 0..3 {
        client
            .post(format!("{}/api/process/start", server.base_url))
            .json(&json!({ "command": "sleep 60" }))
            .send()
            .await
            .unwrap();
    }

    let result: Value = client
        .delete(format!("{}/api/process/kill-all", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["data"]["killed"], 3);
}

#[tokio::test]
async fn process_logs_capture_stdout_and_exit_code_on_completion() {
    let server = support::TestServer::start().await;
    let client = server.client();

    let started: Value = client
        .post(format!("{}/api/process/start", server.base_url))
        .json(&json!({ "command": "echo background-hello && exit 3" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let process_id = started["data"]["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    let logs: Value = client
        .get(format!("{}/api/process/{}/logs", server.base_url, process_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let joined: String = logs["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["data"].as_str().unwrap_or(""))
        .collect();
    assert!(joined.contains("background-hello"));

    let fetched: Value = client
        .get(format!("{}/api/process/{}", server.base_url, process_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["data"]["status"], "failed");
    assert_eq!(fetched["data"]["exit_code"], 3);
}
