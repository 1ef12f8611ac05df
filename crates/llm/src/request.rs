use std::sync::OnceLock;

use axum::http::HeaderMap;

/// Runtime context for provider requests: the inbound headers, filtered for
/// forwarding at dispatch time.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestContext {
    pub headers: HeaderMap,
}

pub(super) fn extract_context(headers: &HeaderMap) -> RequestContext {
    RequestContext {
        headers: headers.clone(),
    }
}

/// Inbound headers that may travel to the upstream.
fn forward_allowlist() -> &'static [&'static str; 7] {
    static ALLOWED: OnceLock<[&'static str; 7]> = OnceLock::new();
    ALLOWED.get_or_init(|| {
        let mut names = [
            "x-request-id",
            "x-trace-id",
            "x-correlation-id",
            "user-agent",
            "x-forwarded-for",
            "x-real-ip",
            "accept-language",
        ];
        names.sort_unstable();
        names
    })
}

/// Headers that must never reach the upstream, whatever the client sent.
fn forward_blocklist() -> &'static [&'static str; 6] {
    static BLOCKED: OnceLock<[&'static str; 6]> = OnceLock::new();
    BLOCKED.get_or_init(|| {
        let mut names = [
            "host",
            "content-length",
            "connection",
            "transfer-encoding",
            "authorization",
            "x-api-key",
        ];
        names.sort_unstable();
        names
    })
}

/// Filter the inbound headers down to the forwardable subset.
pub(crate) fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();

    for (name, value) in inbound {
        let name_str = name.as_str();

        if forward_blocklist().binary_search(&name_str).is_ok() {
            continue;
        }

        if forward_allowlist().binary_search(&name_str).is_ok() {
            forwarded.insert(name.clone(), value.clone());
        }
    }

    forwarded
}
