//! # botmux-handler
//!
//! SDK for handler processes. A handler subscribes to the proxy control
//! plane with a set of matchers, receives its slice of the update stream,
//! and answers through the egress proxy under its own token — the bot token
//! never leaves the proxy.
//!
//! The subscription is kept alive across transient failures: the initial
//! dial backs off exponentially, and a dropped stream is reopened after a
//! fixed delay for as long as the failure looks like a connectivity issue.

pub mod api;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::{debug, info, warn};

use botmux_core::matcher::MatcherGroup;
use botmux_core::retry::{self, RetryError};
use botmux_core::update::Update;
use botmux_core::MuxError;
use botmux_rpc::auth::AuthInterceptor;
use botmux_rpc::pb;
use botmux_rpc::pb::multiplexer_service_client::MultiplexerServiceClient;
use botmux_rpc::status;

pub use api::ProxyApi;

/// Deadline for control-plane unary calls.
const UNARY_TIMEOUT: Duration = Duration::from_secs(5);

type MuxClient = MultiplexerServiceClient<InterceptedService<Channel, AuthInterceptor>>;

/// Receives every update matched by the handler's subscription.
///
/// Invoked on its own task per update; expected to finish in bounded time,
/// though no bound is enforced here.
#[async_trait::async_trait]
pub trait UpdateHandler: Send + Sync + 'static {
    async fn handle(&self, api: Arc<ProxyApi>, update: Update);
}

/// A handler process's connection to the proxy.
pub struct ProxyHandler {
    /// Name reported to the proxy, for its logs.
    pub name: String,
    /// Regex matchers selecting which updates this handler receives.
    pub matchers: Vec<String>,
    /// Auth token identifying this handler on both planes.
    pub token: String,
    /// Control plane endpoint, e.g. `http://proxy.internal:8843`.
    pub grpc_endpoint: String,
}

/// How one lifetime of the update stream ended.
enum StreamEnd {
    Clean,
    Reconnect(MuxError),
    Fatal(MuxError),
}

impl ProxyHandler {
    /// Run until `cancel` fires or a fatal error occurs.
    ///
    /// Transient connectivity failures are retried internally and never
    /// surface; the first fatal error is returned as-is.
    pub async fn run(
        self,
        handler: Arc<dyn UpdateHandler>,
        cancel: CancellationToken,
    ) -> Result<(), MuxError> {
        if self.matchers.is_empty() {
            return Err(MuxError::NoMatchers);
        }
        MatcherGroup::compile(&self.matchers)?;

        let endpoint = Endpoint::from_shared(self.grpc_endpoint.clone())
            .map_err(|e| MuxError::Config(format!("invalid control plane endpoint: {e}")))?;
        let interceptor = AuthInterceptor::new(&self.token)?;
        let client = MultiplexerServiceClient::with_interceptor(
            endpoint.connect_lazy(),
            interceptor,
        );

        let proxy_endpoint = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = fetch_config(client.clone()) => result?,
        };
        info!(name = %self.name, egress = %proxy_endpoint, "received proxy configuration");
        let api = Arc::new(ProxyApi::new(&proxy_endpoint, &self.token));

        let request = pb::RegisterRequest {
            name: self.name.clone(),
            matchers: self.matchers.clone(),
        };

        // Outer loop: every stream lifetime ends in a classification, and
        // connectivity losses reopen the stream after the static delay.
        tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = retry::with_static(|| {
                let client = client.clone();
                let request = request.clone();
                let api = api.clone();
                let handler = handler.clone();
                let cancel = cancel.clone();
                async move {
                    match run_stream(client, request, api, handler, cancel).await {
                        StreamEnd::Clean => Ok(()),
                        StreamEnd::Reconnect(e) => {
                            info!("reconnecting update stream: {e}");
                            Err(RetryError::Recoverable(e))
                        }
                        StreamEnd::Fatal(e) => Err(RetryError::Unrecoverable(e)),
                    }
                }
            }) => result,
        }
    }
}

async fn fetch_config(client: MuxClient) -> Result<String, MuxError> {
    let config = retry::with_backoff(|| {
        let mut client = client.clone();
        async move {
            let mut request = Request::new(pb::ConfigRequest {});
            request.set_timeout(UNARY_TIMEOUT);
            match client.get_config(request).await {
                Ok(response) => Ok(response.into_inner().config.unwrap_or_default()),
                Err(s) if status::is_unavailable(&s) => {
                    warn!("control plane unavailable, retrying: {s}");
                    Err(RetryError::Recoverable(rpc_error(&s)))
                }
                Err(s) => Err(RetryError::Unrecoverable(rpc_error(&s))),
            }
        }
    })
    .await?;

    if config.proxy_endpoint.is_empty() {
        return Err(MuxError::Config(
            "control plane advertised no egress endpoint".into(),
        ));
    }
    Ok(config.proxy_endpoint)
}

/// One lifetime of the registration stream: open (with backoff while the
/// server is unreachable), then pump updates until something ends it.
async fn run_stream(
    client: MuxClient,
    request: pb::RegisterRequest,
    api: Arc<ProxyApi>,
    handler: Arc<dyn UpdateHandler>,
    cancel: CancellationToken,
) -> StreamEnd {
    let opened = retry::with_backoff(|| {
        let mut client = client.clone();
        let request = request.clone();
        async move {
            match client.register_handler(request).await {
                Ok(response) => Ok(response.into_inner()),
                Err(s) if status::is_unavailable(&s) => {
                    info!("retrying connection to control plane: {s}");
                    Err(RetryError::Recoverable(s))
                }
                Err(s) => Err(RetryError::Unrecoverable(s)),
            }
        }
    })
    .await;

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(s) if status::is_canceled(&s) => return StreamEnd::Clean,
        Err(s) => return StreamEnd::Fatal(rpc_error(&s)),
    };

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Clean,
            message = stream.message() => message,
        };
        match message {
            Ok(Some(wire)) => {
                // The proxy is trusted to produce valid update JSON; a
                // decode failure means the contract is broken and is fatal.
                let update: Update = match serde_json::from_slice(&wire.json) {
                    Ok(update) => update,
                    Err(e) => return StreamEnd::Fatal(e.into()),
                };
                debug!(update_id = update.update_id, "dispatching update");
                let api = api.clone();
                let handler = handler.clone();
                tokio::spawn(async move { handler.handle(api, update).await });
            }
            Ok(None) => return StreamEnd::Fatal(MuxError::Closed),
            Err(s) if status::is_canceled(&s) => return StreamEnd::Clean,
            Err(s) if status::is_unavailable(&s) => return StreamEnd::Reconnect(rpc_error(&s)),
            Err(s) => return StreamEnd::Fatal(rpc_error(&s)),
        }
    }
}

fn rpc_error(status: &Status) -> MuxError {
    MuxError::Transport(format!("rpc failed: {status}"))
}
