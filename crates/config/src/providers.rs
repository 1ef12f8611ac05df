//! Provider configuration structures.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;

/// How the provider API key is attached to outbound requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`.
    #[default]
    Bearer,
    /// `x-api-key: <key>`.
    XApiKey,
}

/// Configuration for a single upstream provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Base URL for the provider API, e.g. `https://api.openai.com/v1`.
    pub api_base_url: String,

    /// API key. Supports exact-match env references (`$NAME`).
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Header used to attach the API key.
    #[serde(default)]
    pub auth_scheme: AuthScheme,

    /// Request timeout towards this provider, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Models this provider advertises in `/models`.
    #[serde(default)]
    pub models: Vec<String>,

    /// Transformer chain configuration.
    #[serde(default)]
    pub transformer: Option<TransformerConfig>,
}

pub(crate) fn default_timeout_secs() -> u64 {
    3600
}

/// Transformer chain bound to a provider, with optional per-model sub-chains.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformerConfig {
    /// Ordered list of transformers applied to every request for this provider.
    #[serde(rename = "use", default)]
    pub r#use: Vec<TransformerRef>,

    /// Sub-chains scoped to a specific model name, appended after the
    /// provider chain when the request targets that model.
    #[serde(default)]
    pub models: BTreeMap<String, ModelTransformerConfig>,
}

/// Transformer list scoped to one model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelTransformerConfig {
    /// Ordered list of transformers for this model.
    #[serde(rename = "use", default)]
    pub r#use: Vec<TransformerRef>,
}

/// A transformer reference: either a bare name or `[name, options]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransformerRef {
    /// A transformer with its default options.
    Name(String),
    /// A transformer with an options table.
    WithOptions(String, serde_json::Value),
}

impl TransformerRef {
    /// The transformer name.
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::WithOptions(name, _) => name,
        }
    }

    /// The options table, if any.
    pub fn options(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Name(_) => None,
            Self::WithOptions(_, options) => Some(options),
        }
    }
}
