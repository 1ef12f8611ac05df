//! HTTP server configuration settings.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// TLS configuration for secure connections.
    pub tls: Option<TlsServerConfig>,
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsServerConfig {
    /// Path to the PEM-encoded certificate chain.
    pub certificate: PathBuf,
    /// Path to the PEM-encoded private key.
    pub key: PathBuf,
}

/// Outbound proxy configuration for upstream calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://127.0.0.1:8888`. Supports env references.
    pub url: String,
}
