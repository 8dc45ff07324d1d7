//! Egress boundary for outbound bot API calls.
//!
//! Handlers call `POST {endpoint}/proxy{handler_token}/{method}`; this
//! layer authenticates the token segment, checks the method against the
//! allowlist, and hands the request to a [`Forwarder`] that rewrites the
//! path to `/bot{bot_token}/{method}` and relays it to Telegram.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use regex::Regex;
use tracing::{info, warn};

use botmux_core::auth::Authenticator;
use botmux_core::error::scrub_token;

/// 16 megabytes covers every bot API payload we proxy.
const MAX_BODY_BYTES: usize = 16_000_000;

/// Which bot API methods handlers are allowed to call.
pub trait Allowlist: Send + Sync {
    fn allowed(&self, method: &str) -> bool;
}

/// Allows exactly the methods fixed at construction.
pub struct StaticAllowlist {
    allowed: HashSet<String>,
}

impl StaticAllowlist {
    pub fn new<S: AsRef<str>>(methods: &[S]) -> Self {
        Self {
            allowed: methods.iter().map(|m| m.as_ref().to_string()).collect(),
        }
    }
}

impl Allowlist for StaticAllowlist {
    fn allowed(&self, method: &str) -> bool {
        self.allowed.contains(method)
    }
}

/// Relays an authenticated egress request to the Telegram API.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, method: &str, request: Request<Body>) -> Response;
}

/// Forwards to `{endpoint}/bot{token}/{method}`, relaying status and body.
pub struct TelegramForwarder {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramForwarder {
    pub fn new(endpoint: &str, bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/bot{}", endpoint.trim_end_matches('/'), bot_token),
        }
    }
}

#[async_trait]
impl Forwarder for TelegramForwarder {
    async fn forward(&self, method: &str, request: Request<Body>) -> Response {
        let url = format!("{}/{}", self.base_url, method);
        let (parts, body) = request.into_parts();

        let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
        };

        let mut outbound = self
            .client
            .request(parts.method, &url)
            .body(body.to_vec());
        if let Some(content_type) = parts.headers.get(header::CONTENT_TYPE) {
            outbound = outbound.header(header::CONTENT_TYPE, content_type.clone());
        }

        match outbound.send().await {
            Ok(response) => {
                let status = StatusCode::from_u16(response.status().as_u16())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                let bytes = response.bytes().await.unwrap_or_default();
                (status, bytes).into_response()
            }
            Err(e) => {
                warn!(
                    "request to telegram API failed: {}",
                    scrub_token(&e.to_string())
                );
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

#[derive(Clone)]
struct EgressState {
    authenticator: Arc<dyn Authenticator>,
    allowlist: Arc<dyn Allowlist>,
    forwarder: Arc<dyn Forwarder>,
}

/// Build the egress router. Every path goes through auth; there are no
/// unauthenticated routes on this listener.
pub fn router(
    authenticator: Arc<dyn Authenticator>,
    allowlist: Arc<dyn Allowlist>,
    forwarder: Arc<dyn Forwarder>,
) -> Router {
    Router::new()
        .fallback(proxy_request)
        .with_state(EgressState {
            authenticator,
            allowlist,
            forwarder,
        })
}

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/proxy([^/]+)/([A-Za-z0-9_]+)$").expect("path pattern is valid"))
}

fn parse_path(path: &str) -> Option<(&str, &str)> {
    let caps = path_re().captures(path)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

async fn proxy_request(State(state): State<EgressState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    let Some((token, method)) = parse_path(&path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let client = match state.authenticator.authenticate(token) {
        Ok(client) => client,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    if !state.allowlist.allowed(method) {
        warn!(client = %client.name, method, "blocked bot API method");
        return StatusCode::FORBIDDEN.into_response();
    }

    info!(client = %client.name, method, "forwarding bot API call");
    state.forwarder.forward(method, request).await
}
