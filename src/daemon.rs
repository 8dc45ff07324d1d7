//! Wiring: ingestion -> multiplexer serve loop, plus the control plane and
//! egress servers, under one shutdown token.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use botmux_core::auth::StaticAuthenticator;
use botmux_core::config::Config;
use botmux_core::stream::DEFAULT_CAPACITY;
use botmux_core::update::decoded;
use botmux_core::MuxError;
use botmux_rpc::auth::ServerAuthInterceptor;
use botmux_rpc::pb::multiplexer_service_server::MultiplexerServiceServer;
use botmux_server::egress::{self, StaticAllowlist, TelegramForwarder};
use botmux_server::longpoll::{LongPollOptions, LongPollStreamer};
use botmux_server::mux::Multiplexer;
use botmux_server::registrar::RegistrarService;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let root = CancellationToken::new();
    let authenticator = Arc::new(StaticAuthenticator::new(&config.client_table()));
    let mux = Arc::new(Multiplexer::new(config.mux.buffer_len));

    // Control plane.
    let grpc_addr: SocketAddr = config
        .grpc
        .listen
        .parse()
        .context("invalid grpc.listen address")?;
    let registrar = RegistrarService::new(mux.clone(), config.http.advertised_endpoint.clone());
    let interceptor = ServerAuthInterceptor::new(authenticator.clone());
    let grpc_shutdown = root.child_token();
    let grpc_server = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(MultiplexerServiceServer::with_interceptor(
                registrar,
                interceptor,
            ))
            .serve_with_shutdown(grpc_addr, grpc_shutdown.cancelled())
            .await
    });
    info!("control plane listening on {grpc_addr}");

    // Egress proxy.
    let router = egress::router(
        authenticator,
        Arc::new(StaticAllowlist::new(&config.http.allow)),
        Arc::new(TelegramForwarder::new(
            &config.telegram.endpoint,
            &config.telegram.token,
        )),
    );
    let http_listener = tokio::net::TcpListener::bind(&config.http.listen)
        .await
        .context("binding egress listener")?;
    let http_shutdown = root.child_token();
    let http_server = tokio::spawn(async move {
        axum::serve(http_listener, router)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await
    });
    info!(
        "egress proxy listening on {} (advertised as {})",
        config.http.listen, config.http.advertised_endpoint
    );

    // Ingestion pipeline: raw long poll stream, decoded in parallel.
    let streamer = LongPollStreamer::new(
        &config.telegram.endpoint,
        &config.telegram.token,
        LongPollOptions::default(),
    )?;
    let raw = streamer.stream(root.child_token());
    let mut updates = decoded(raw, DEFAULT_CAPACITY);

    let shutdown = root.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    // The serve loop is the single task driving the multiplexer.
    info!("botmux running");
    let mut failure: Option<MuxError> = None;
    while let Some(item) = updates.recv().await {
        match item {
            Ok(update) => {
                debug!(update_id = update.update_id, "dispatching update");
                mux.serve(&update).await;
            }
            Err(MuxError::PollTimeout) => {
                debug!("long poll expired with no updates");
            }
            Err(e) => {
                error!("update stream failed: {e}");
                failure = Some(e);
                break;
            }
        }
    }
    root.cancel();

    let _ = grpc_server.await;
    let _ = http_server.await;

    match failure {
        Some(e) => Err(e.into()),
        None => {
            info!("botmux stopped");
            Ok(())
        }
    }
}
