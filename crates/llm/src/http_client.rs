use std::{sync::OnceLock, time::Duration};

use axum::http;
use reqwest::Client;

static CLIENT: OnceLock<Client> = OnceLock::new();

fn default_http_client_builder() -> reqwest::ClientBuilder {
    let mut headers = http::HeaderMap::new();
    headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

    // No global timeout: every dispatch applies the provider-configured
    // timeout, and streaming responses may legitimately run for a long time.
    Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

/// Install the shared client, honouring the configured outbound proxy.
/// Called once at startup before any request is served.
pub fn init(proxy: Option<&config::ProxyConfig>) -> anyhow::Result<()> {
    let mut builder = default_http_client_builder();

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(&proxy.url)?);
    }

    let client = builder.build()?;
    let _ = CLIENT.set(client);

    Ok(())
}

/// Common HTTP client to re-use the same connections as much as possible.
pub(crate) fn http_client() -> Client {
    CLIENT
        .get_or_init(|| {
            default_http_client_builder()
                .build()
                .expect("Failed to build default HTTP client")
        })
        .clone()
}
