//! Exposed-port bookkeeping backing the preview-URL proxy (§4.3).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::PortConfig;
use crate::error::{AppError, AppResult};

/// Port the daemon itself listens on; preview traffic is never routed to it.
pub const RESERVED_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortEntry {
    pub port: u16,
    pub name: Option<String>,
    pub status: PortStatus,
    /// When this entry went inactive, for `cleanup_stale`. `None` while
    /// active — an active entry has no age at which it becomes eligible
    /// for reaping, no matter how long it goes without proxied traffic.
    #[serde(skip)]
    inactive_since: Option<Instant>,
}

#[derive(Clone)]
pub struct PortManager {
    entries: Arc<DashMap<u16, PortEntry>>,
    config: PortConfig,
}

impl PortManager {
    pub fn new(config: PortConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Reactivates an inactive entry for the same port (new callers of
    /// `expose` after an `unexpose` get the same table row back) or inserts
    /// a fresh one. Fails only if the port is *currently* active.
    pub fn expose(&self, port: u16, name: Option<String>) -> AppResult<PortEntry> {
        if port < 1024 {
            return Err(AppError::InvalidPort(format!(
                "port {port} is below the minimum exposable port 1024"
            )));
        }
        if port == RESERVED_PORT {
            return Err(AppError::InvalidPort(format!(
                "port {RESERVED_PORT} is reserved for the daemon itself"
            )));
        }
        if let Some(mut existing) = self.entries.get_mut(&port) {
            if existing.status == PortStatus::Active {
                return Err(AppError::PortAlreadyExposed(port));
            }
            existing.status = PortStatus::Active;
            existing.name = name;
            existing.inactive_since = None;
            return Ok(existing.clone());
        }
        let entry = PortEntry {
            port,
            name,
            status: PortStatus::Active,
            inactive_since: None,
        };
        self.entries.insert(port, entry.clone());
        Ok(entry)
    }

    /// Marks an active entry inactive. The row stays in the table — it's
    /// only dropped later by `cleanup_stale` — rather than vanishing the
    /// moment a caller unexposes it.
    pub fn unexpose(&self, port: u16) -> AppResult<()> {
        let mut entry = self.entries.get_mut(&port).ok_or(AppError::PortNotExposed(port))?;
        if entry.status != PortStatus::Active {
            return Err(AppError::PortNotExposed(port));
        }
        entry.status = PortStatus::Inactive;
        entry.inactive_since = Some(Instant::now());
        Ok(())
    }

    pub fn list(&self) -> Vec<PortEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get(&self, port: u16) -> Option<PortEntry> {
        self.entries.get(&port).map(|e| e.value().clone())
    }

    /// Proxy lookups only succeed against an active entry.
    pub fn is_exposed(&self, port: u16) -> bool {
        self.entries
            .get(&port)
            .map(|e| e.status == PortStatus::Active)
            .unwrap_or(false)
    }

    /// Drop inactive entries older than the configured staleness window.
    /// An active entry is never reaped here regardless of how long it goes
    /// without proxied traffic — only an explicit `unexpose` starts its clock.
    pub fn cleanup_stale(&self) -> Vec<u16> {
        let window = Duration::from_secs(self.config.stale_after_secs);
        let mut removed = Vec::new();
        self.entries.retain(|port, entry| {
            let stale = entry
                .inactive_since
                .map(|since| since.elapsed() > window)
                .unwrap_or(false);
            if stale {
                removed.push(*port);
            }
            !stale
        });
        removed
    }
}

/// Substitutes `{port}`, `{sandboxId}`, and `{baseDomain}` into the
/// configured hostname template to build the preview URL returned alongside
/// an exposed port (§4.3 `list(hostname)`).
pub fn compose_preview_url(pattern: &str, base_domain: &str, sandbox_id: &str, port: u16) -> String {
    let hostname = pattern
        .replace("{port}", &port.to_string())
        .replace("{sandboxId}", sandbox_id)
        .replace("{baseDomain}", base_domain);
    format!("https://{hostname}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PortConfig {
        PortConfig {
            stale_after_secs: 3600,
        }
    }

    #[test]
    fn expose_then_duplicate_expose_fails() {
        let manager = PortManager::new(config());
        manager.expose(8080, None).unwrap();
        let err = manager.expose(8080, None).unwrap_err();
        assert!(matches!(err, AppError::PortAlreadyExposed(8080)));
    }

    #[test]
    fn reserved_port_is_rejected() {
        let manager = PortManager::new(config());
        let err = manager.expose(RESERVED_PORT, None).unwrap_err();
        assert!(matches!(err, AppError::InvalidPort(_)));
    }

    #[test]
    fn privileged_port_is_rejected() {
        let manager = PortManager::new(config());
        let err = manager.expose(80, None).unwrap_err();
        assert!(matches!(err, AppError::InvalidPort(_)));
    }

    #[test]
    fn unexpose_unknown_port_fails() {
        let manager = PortManager::new(config());
        let err = manager.unexpose(9999).unwrap_err();
        assert!(matches!(err, AppError::PortNotExposed(9999)));
    }

    #[test]
    fn list_reflects_exposed_ports() {
        let manager = PortManager::new(config());
        manager.expose(8080, Some("web".to_string())).unwrap();
        manager.expose(8081, None).unwrap();
        let ports: Vec<u16> = manager.list().iter().map(|e| e.port).collect();
        assert!(ports.contains(&8080));
        assert!(ports.contains(&8081));
    }

    #[test]
    fn unexpose_then_expose_again_reactivates_the_same_entry() {
        let manager = PortManager::new(config());
        manager.expose(8080, Some("web".to_string())).unwrap();
        manager.unexpose(8080).unwrap();
        assert!(!manager.is_exposed(8080));

        let entry = manager.expose(8080, Some("web-again".to_string())).unwrap();
        assert_eq!(entry.status, PortStatus::Active);
        assert_eq!(entry.name.as_deref(), Some("web-again"));
        assert!(manager.is_exposed(8080));
    }

    #[test]
    fn cleanup_stale_never_removes_an_active_entry() {
        let manager = PortManager::new(PortConfig { stale_after_secs: 0 });
        manager.expose(8080, None).unwrap();
        let removed = manager.cleanup_stale();
        assert!(removed.is_empty());
        assert!(manager.is_exposed(8080));
    }

    #[test]
    fn cleanup_stale_removes_inactive_entries_past_the_window() {
        let manager = PortManager::new(PortConfig { stale_after_secs: 0 });
        manager.expose(8080, None).unwrap();
        manager.unexpose(8080).unwrap();
        let removed = manager.cleanup_stale();
        assert_eq!(removed, vec![8080]);
        assert!(manager.get(8080).is_none());
    }

    #[test]
    fn compose_preview_url_substitutes_every_placeholder() {
        let url = compose_preview_url("{port}-{sandboxId}.{baseDomain}", "sandbox.dev", "abc123", 8080);
        assert_eq!(url, "https://8080-abc123.sandbox.dev");
    }
}
