//! Port manager and preview-URL reverse proxy (§4.3).

pub mod manager;
pub mod proxy;

pub use manager::{compose_preview_url, PortEntry, PortManager, PortStatus, RESERVED_PORT};
pub use proxy::preview_proxy_middleware;
