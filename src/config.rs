//! Runtime configuration.
//!
//! Loaded from defaults, optionally overlaid by a TOML file, then by
//! `SANDBOXD_*` environment variables, then by CLI flags. Mirrors the
//! teacher daemon's `DaemonConfig` load/validate shape.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Initial working directory for newly created sessions.
    pub default_cwd: PathBuf,
    /// Upper bound on any single `exec`/`startBackground` call.
    pub command_timeout_ms: u64,
    /// Output log cap in bytes; exceeding it fails the command with `OutputTooLarge`.
    pub output_cap_bytes: u64,
    /// Root directory under which per-session scratch dirs (FIFOs, logs) are created.
    pub scratch_root: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_cwd: PathBuf::from("/home/user"),
            command_timeout_ms: 60_000,
            output_cap_bytes: 10 * 1024 * 1024,
            scratch_root: PathBuf::from("/tmp/sandboxd/sessions"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOpsConfig {
    /// Allow-list of path prefixes file operations may touch.
    pub allowed_roots: Vec<PathBuf>,
    pub max_path_len: usize,
}

impl Default for FileOpsConfig {
    fn default() -> Self {
        Self {
            allowed_roots: vec![
                PathBuf::from("/tmp"),
                PathBuf::from("/home"),
                PathBuf::from("/workspace"),
            ],
            max_path_len: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Terminal process records older than this are eligible for cleanup.
    pub cleanup_after_secs: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            cleanup_after_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// Inactive entries older than this are eligible for cleanup (one hour, per spec).
    pub stale_after_secs: u64,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Command used to launch a language kernel child process, e.g. `python3 -m sandboxd_kernel`.
    pub kernel_command: Option<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            kernel_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    /// Stable sandbox identifier, embedded in preview URLs.
    pub sandbox_id: String,
    /// Hostname template, e.g. `{port}-{sandboxId}.example.dev`.
    pub preview_hostname_pattern: String,
    pub base_domain: String,
    pub session: SessionConfig,
    pub files: FileOpsConfig,
    pub process: ProcessConfig,
    pub ports: PortConfig,
    pub interpreter: InterpreterConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_file: None,
            sandbox_id: std::env::var("SANDBOX_ID").unwrap_or_else(|_| "default".to_string()),
            preview_hostname_pattern: "{port}-{sandboxId}.{baseDomain}".to_string(),
            base_domain: "sandbox.local".to_string(),
            session: SessionConfig::default(),
            files: FileOpsConfig::default(),
            process: ProcessConfig::default(),
            ports: PortConfig::default(),
            interpreter: InterpreterConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load defaults, overlay an optional TOML file, then environment overrides.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            config = toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SANDBOXD_HOST") {
            self.host = v;
        }
        if let Ok(v) = std::env::var("SANDBOXD_PORT") {
            if let Ok(port) = v.parse() {
                self.port = port;
            }
        }
        if let Ok(v) = std::env::var("SANDBOXD_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("SANDBOX_ID") {
            self.sandbox_id = v;
        }
        if let Ok(v) = std::env::var("SANDBOXD_BASE_DOMAIN") {
            self.base_domain = v;
        }
    }

    /// Validate configuration, mirroring `DaemonConfig::validate` in the teacher daemon.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("invalid port: 0 (must be 1-65535)");
        }
        if self.files.allowed_roots.is_empty() {
            bail!("files.allowed_roots must not be empty");
        }
        if self.session.command_timeout_ms == 0 {
            bail!("session.command_timeout_ms must be greater than 0");
        }
        if self.session.output_cap_bytes == 0 {
            bail!("session.output_cap_bytes must be greater than 0");
        }
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            level => bail!("invalid log level: {level} (must be trace, debug, info, warn, or error)"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_allowed_roots_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.files.allowed_roots.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }
}
