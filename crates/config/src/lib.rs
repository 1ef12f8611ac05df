//! Switchboard configuration structures to map the switchboard.toml configuration.

#![deny(missing_docs)]

mod env;
mod loader;
mod providers;
mod server;

use std::{collections::BTreeMap, path::Path};

use indexmap::IndexMap;
use serde::Deserialize;

pub use env::{EnvError, resolve_env};
pub use providers::{AuthScheme, ModelTransformerConfig, ProviderConfig, TransformerConfig, TransformerRef};
pub use server::{ProxyConfig, ServerConfig, TlsServerConfig};

/// Main configuration structure for the Switchboard application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Optional outbound proxy applied to upstream calls.
    pub proxy: Option<ProxyConfig>,
    /// Route table mapping a bare model name to a provider name.
    ///
    /// Only consulted when the request model carries no `provider,` prefix;
    /// the comma form is authoritative.
    pub routes: BTreeMap<String, String>,
    /// Upstream providers, in declaration order.
    pub providers: IndexMap<String, ProviderConfig>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates provider and route coherence.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }

    /// Whether any provider is configured.
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }
}
