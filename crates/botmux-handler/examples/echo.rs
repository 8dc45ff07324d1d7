//! Minimal handler: replies to `/echo <text>` with the text.
//!
//! Configuration comes from the environment:
//!   BOTMUX_TOKEN          auth token registered with the proxy
//!   BOTMUX_GRPC_ENDPOINT  control plane, e.g. http://127.0.0.1:8843

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use botmux_core::update::Update;
use botmux_handler::{ProxyApi, ProxyHandler, UpdateHandler};

struct EchoHandler;

#[async_trait::async_trait]
impl UpdateHandler for EchoHandler {
    async fn handle(&self, api: Arc<ProxyApi>, update: Update) {
        let Some(message) = update.message else { return };
        let Some(text) = message.text.as_deref() else { return };

        let reply = text.strip_prefix("/echo").unwrap_or("").trim();
        let reply = if reply.is_empty() { "echo" } else { reply };
        if let Err(e) = api.reply_to(&message, reply).await {
            error!("failed to reply: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let token = std::env::var("BOTMUX_TOKEN")?;
    let grpc_endpoint = std::env::var("BOTMUX_GRPC_ENDPOINT")
        .unwrap_or_else(|_| "http://127.0.0.1:8843".to_string());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
        shutdown.cancel();
    });

    let handler = ProxyHandler {
        name: "echo".into(),
        matchers: vec!["^/echo(\\s|$)".into()],
        token,
        grpc_endpoint,
    };
    handler.run(Arc::new(EchoHandler), cancel).await?;
    Ok(())
}
