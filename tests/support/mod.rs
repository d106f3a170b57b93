//! Shared harness for integration tests: boots a real `sandboxd` HTTP
//! server on an OS-assigned port against a hermetic scratch directory.

use std::path::PathBuf;

use sandboxd::api::state::AppState;
use sandboxd::config::{FileOpsConfig, InterpreterConfig, PortConfig, ProcessConfig, RuntimeConfig, SessionConfig};

pub struct TestServer {
    pub base_url: String,
    pub sandbox_id: String,
    scratch: tempfile::TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(InterpreterConfig { kernel_command: None }).await
    }

    pub async fn start_with(interpreter: InterpreterConfig) -> Self {
        let scratch = tempfile::tempdir().expect("creating scratch dir");
        let sandbox_id = format!("test-{}", uuid::Uuid::new_v4());

        let config = RuntimeConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            log_level: "error".to_string(),
            log_file: None,
            sandbox_id: sandbox_id.clone(),
            preview_hostname_pattern: "{port}-{sandboxId}.{baseDomain}".to_string(),
            base_domain: "sandbox.test".to_string(),
            session: SessionConfig {
                default_cwd: scratch.path().to_path_buf(),
                command_timeout_ms: 5_000,
                output_cap_bytes: 1024 * 1024,
                scratch_root: scratch.path().join("sessions"),
            },
            files: FileOpsConfig {
                allowed_roots: vec![scratch.path().to_path_buf()],
                max_path_len: 4096,
            },
            process: ProcessConfig {
                cleanup_after_secs: 3600,
            },
            ports: PortConfig {
                stale_after_secs: 3600,
            },
            interpreter,
        };

        let state = AppState::new(config);
        let app = sandboxd::api::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("binding ephemeral port");
        let addr = listener.local_addr().expect("reading bound address");

        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            sandbox_id,
            scratch,
        }
    }

    /// A writable directory under the server's allowed file-ops roots.
    pub fn workdir(&self) -> PathBuf {
        self.scratch.path().to_path_buf()
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }
}
