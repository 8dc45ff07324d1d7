//! Registration service binding the control plane to the multiplexer.
//!
//! A thin adapter: validation, one subscription per stream, and a pump task
//! serializing matched updates onto the wire. Retries and buffering live in
//! the client and the multiplexer respectively.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info};

use botmux_core::matcher::MatcherGroup;
use botmux_rpc::auth::client_from_request;
use botmux_rpc::pb;
use botmux_rpc::pb::multiplexer_service_server::MultiplexerService;

use crate::mux::Multiplexer;

pub struct RegistrarService {
    mux: Arc<Multiplexer>,
    advertised_endpoint: String,
}

impl RegistrarService {
    /// `advertised_endpoint` is handed to handlers via `GetConfig` so they
    /// know where to send outbound bot API calls.
    pub fn new(mux: Arc<Multiplexer>, advertised_endpoint: String) -> Self {
        Self {
            mux,
            advertised_endpoint,
        }
    }
}

#[tonic::async_trait]
impl MultiplexerService for RegistrarService {
    async fn get_config(
        &self,
        _request: Request<pb::ConfigRequest>,
    ) -> Result<Response<pb::ConfigResponse>, Status> {
        Ok(Response::new(pb::ConfigResponse {
            config: Some(pb::Config {
                proxy_endpoint: self.advertised_endpoint.clone(),
            }),
        }))
    }

    type RegisterHandlerStream = ReceiverStream<Result<pb::Update, Status>>;

    async fn register_handler(
        &self,
        request: Request<pb::RegisterRequest>,
    ) -> Result<Response<Self::RegisterHandlerStream>, Status> {
        let client = client_from_request(&request)
            .map_err(|e| Status::unauthenticated(e.to_string()))?;
        let req = request.into_inner();

        if req.matchers.is_empty() {
            return Err(Status::invalid_argument("cannot register with zero matchers"));
        }
        let matchers = MatcherGroup::compile(&req.matchers)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let cancel = CancellationToken::new();
        let mut updates = self
            .mux
            .register(cancel.clone(), matchers)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let name = if req.name.is_empty() {
            client.name.clone()
        } else {
            req.name
        };
        info!(client = %client.name, handler = %name, matchers = req.matchers.len(), "handler registered");

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            // Cancelling on exit is what tells the multiplexer this
            // subscription is dead, whichever side ended the stream.
            let _cancel_on_exit = cancel.drop_guard();
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    next = updates.recv() => {
                        let Some(update) = next else { break };
                        let json = match serde_json::to_vec(&update) {
                            Ok(json) => json,
                            Err(e) => {
                                error!(handler = %name, "failed to serialize update: {e}");
                                break;
                            }
                        };
                        if tx.send(Ok(pb::Update { json })).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(handler = %name, "update stream closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
