//! Test harness: boots the real gateway router against an in-process mock
//! upstream and provides a thin HTTP client for the assertions.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// What the mock upstream answers with.
#[derive(Clone)]
enum UpstreamScript {
    /// A JSON body with status 200.
    Json(Value),
    /// A raw `text/event-stream` body.
    Sse(String),
    /// An arbitrary status and plain body.
    Status(u16, String),
}

struct UpstreamInner {
    script: Mutex<UpstreamScript>,
    received: Mutex<Vec<ReceivedRequest>>,
}

/// A request the mock upstream observed.
#[derive(Clone)]
pub struct ReceivedRequest {
    pub headers: HeaderMap,
    pub body: Value,
    pub path: String,
}

/// In-process mock of an OpenAI-compatible upstream.
#[derive(Clone)]
pub struct TestUpstream {
    pub address: SocketAddr,
    inner: Arc<UpstreamInner>,
    shutdown: CancellationToken,
}

impl TestUpstream {
    /// Start a mock that answers with the given JSON body.
    pub async fn json(body: Value) -> Self {
        Self::start(UpstreamScript::Json(body)).await
    }

    /// Start a mock that answers with a raw SSE body.
    pub async fn sse(body: impl Into<String>) -> Self {
        Self::start(UpstreamScript::Sse(body.into())).await
    }

    /// Start a mock that answers with an arbitrary status.
    pub async fn status(status: u16, body: impl Into<String>) -> Self {
        Self::start(UpstreamScript::Status(status, body.into())).await
    }

    async fn start(script: UpstreamScript) -> Self {
        let inner = Arc::new(UpstreamInner {
            script: Mutex::new(script),
            received: Mutex::new(Vec::new()),
        });

        // Record and answer on every POST path the chain may select.
        let app = Router::new()
            .route("/{*path}", post(upstream_handler))
            .with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock upstream");
        let address = listener.local_addr().expect("mock upstream address");

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .ok();
        });

        Self {
            address,
            inner,
            shutdown,
        }
    }

    /// Base URL to put in the gateway's provider configuration.
    pub fn url(&self) -> String {
        format!("http://{}/v1", self.address)
    }

    /// The requests this upstream has served so far.
    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.inner.received.lock().unwrap().clone()
    }

    /// The most recent request, panicking when none arrived.
    pub fn last_request(&self) -> ReceivedRequest {
        self.received().last().cloned().expect("upstream saw no request")
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn upstream_handler(
    State(inner): State<Arc<UpstreamInner>>,
    request: axum::extract::Request,
) -> Response {
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();

    let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    inner
        .received
        .lock()
        .unwrap()
        .push(ReceivedRequest { headers, body, path });

    let script = inner.script.lock().unwrap().clone();

    match script {
        UpstreamScript::Json(body) => {
            (StatusCode::OK, axum::Json(body)).into_response()
        }
        UpstreamScript::Sse(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from(body))
            .expect("valid SSE response"),
        UpstreamScript::Status(status, body) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        )
            .into_response(),
    }
}

/// The gateway under test, listening on an ephemeral port.
pub struct TestGateway {
    pub address: SocketAddr,
    pub client: TestClient,
    shutdown: CancellationToken,
}

impl TestGateway {
    /// Boot the gateway from a TOML configuration string.
    pub async fn start(config_toml: &str) -> Self {
        let config: config::Config = toml::from_str(config_toml).expect("valid test configuration");
        config.validate().expect("test configuration must validate");

        let app = llm::router(&config).expect("router construction");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
        let address = listener.local_addr().expect("gateway address");

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .ok();
        });

        let client = TestClient::new(format!("http://{address}"));

        Self {
            address,
            client,
            shutdown,
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Thin HTTP client for gateway requests.
#[derive(Clone)]
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
    custom_headers: HeaderMap,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            custom_headers: HeaderMap::new(),
        }
    }

    /// Add a header to every subsequent request.
    pub fn push_header(&mut self, key: &'static str, value: impl AsRef<str>) {
        self.custom_headers.insert(
            key,
            reqwest::header::HeaderValue::from_str(value.as_ref()).unwrap(),
        );
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base_url))
            .headers(self.custom_headers.clone())
            .send()
            .await
            .expect("request failed")
    }

    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base_url))
            .headers(self.custom_headers.clone())
            .json(body)
            .send()
            .await
            .expect("request failed")
    }

    /// POST and parse the JSON response body.
    pub async fn post_json(&self, path: &str, body: &Value) -> Value {
        let response = self.post(path, body).await;
        response.json().await.expect("JSON response body")
    }

    /// POST and collect the full SSE body as raw text.
    pub async fn post_sse(&self, path: &str, body: &Value) -> String {
        let response = self.post(path, body).await;
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
        response.text().await.expect("SSE body")
    }
}

/// Split a raw SSE body into `(event-name, data)` pairs.
pub fn parse_sse_events(body: &str) -> Vec<(Option<String>, String)> {
    let mut events = Vec::new();

    for block in body.split("\n\n").filter(|block| !block.trim().is_empty()) {
        let mut name = None;
        let mut data_lines = Vec::new();

        for line in block.lines() {
            if let Some(value) = line.strip_prefix("event: ") {
                name = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("data: ") {
                data_lines.push(value.to_string());
            }
        }

        if name.is_some() || !data_lines.is_empty() {
            events.push((name, data_lines.join("\n")));
        }
    }

    events
}
