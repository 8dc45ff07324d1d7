//! Proxy configuration loaded from a TOML file.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::auth::Client;
use crate::error::MuxError;

/// Top-level botmux configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub grpc: GrpcConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mux: MuxConfig,
    /// Handler clients allowed on the control plane and the egress proxy.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

/// Telegram Bot API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    #[serde(default = "default_telegram_endpoint")]
    pub endpoint: String,
}

/// Control-plane listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcConfig {
    #[serde(default = "default_grpc_listen")]
    pub listen: String,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            listen: default_grpc_listen(),
        }
    }
}

/// Egress HTTP proxy for outbound bot API calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_listen")]
    pub listen: String,
    /// Endpoint advertised to handlers via GetConfig. Usually the address
    /// this proxy is reachable at from the handlers' network.
    #[serde(default)]
    pub advertised_endpoint: String,
    /// Bot API methods handlers may call through the egress proxy.
    #[serde(default = "default_allowed_methods")]
    pub allow: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            advertised_endpoint: String::new(),
            allow: default_allowed_methods(),
        }
    }
}

/// Multiplexer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Per-subscription channel capacity. Kept small on purpose so a slow
    /// handler shows up as backpressure instead of unbounded memory.
    #[serde(default = "default_buffer_len")]
    pub buffer_len: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            buffer_len: default_buffer_len(),
        }
    }
}

/// One handler client: its display name and auth token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    pub token: String,
}

fn default_telegram_endpoint() -> String {
    "https://api.telegram.org".to_string()
}
fn default_grpc_listen() -> String {
    "127.0.0.1:8843".to_string()
}
fn default_http_listen() -> String {
    "127.0.0.1:8880".to_string()
}
fn default_allowed_methods() -> Vec<String> {
    vec![
        "sendMessage".into(),
        "sendSticker".into(),
        "sendChatAction".into(),
    ]
}
fn default_buffer_len() -> usize {
    1
}

impl Config {
    /// Build the token table consumed by the authenticator.
    pub fn client_table(&self) -> HashMap<String, Client> {
        self.clients
            .iter()
            .map(|c| (c.token.clone(), Client { name: c.name.clone() }))
            .collect()
    }

    /// Reject configurations the proxy cannot run with.
    pub fn validate(&self) -> Result<(), MuxError> {
        if self.telegram.token.is_empty() {
            return Err(MuxError::Config("telegram.token must be set".into()));
        }
        if self.http.advertised_endpoint.is_empty() {
            return Err(MuxError::Config(
                "http.advertised_endpoint must be set so handlers can reach the egress proxy"
                    .into(),
            ));
        }
        for client in &self.clients {
            if client.name.is_empty() || client.token.is_empty() {
                return Err(MuxError::Config(
                    "every client needs both a name and a token".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Load configuration from a TOML file. Unlike softer services there is no
/// default fallback: the proxy is useless without a bot token.
pub fn load(path: &str) -> Result<Config, MuxError> {
    let path = Path::new(path);
    let content = std::fs::read_to_string(path)
        .map_err(|e| MuxError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| MuxError::Config(format!("failed to parse config: {e}")))?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[telegram]
token = "12345:AAbbCC"

[http]
advertised_endpoint = "http://proxy.internal:8880"

[[clients]]
name = "echo"
token = "echo-token"

[[clients]]
name = "clock"
token = "clock-token"
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.telegram.endpoint, "https://api.telegram.org");
        assert_eq!(config.grpc.listen, "127.0.0.1:8843");
        assert_eq!(config.mux.buffer_len, 1);
        assert!(config.http.allow.contains(&"sendMessage".to_string()));
        assert_eq!(config.clients.len(), 2);
    }

    #[test]
    fn test_client_table() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let table = config.client_table();
        assert_eq!(table.get("echo-token").unwrap().name, "echo");
        assert_eq!(table.get("clock-token").unwrap().name, "clock");
    }

    #[test]
    fn test_validate_requires_advertised_endpoint() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.http.advertised_endpoint.clear();
        assert!(matches!(config.validate(), Err(MuxError::Config(_))));
    }

    #[test]
    fn test_validate_requires_telegram_token() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.telegram.token.clear();
        assert!(matches!(config.validate(), Err(MuxError::Config(_))));
    }
}
