//! Control-plane authentication interceptors.
//!
//! The client side attaches its bearer token to every outgoing call; the
//! server side validates it and re-encodes the resolved [`Client`] into the
//! request metadata, where service handlers pick it up with
//! [`client_from_request`].

use std::sync::Arc;

use tonic::metadata::MetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::error;

use botmux_core::auth::{Authenticator, Client};
use botmux_core::MuxError;

/// Metadata key carrying the bearer token.
pub const TOKEN_KEY: &str = "authorization";
/// Metadata key carrying the authenticated client, set by the server
/// interceptor only. Requests arriving with it already present are forged.
pub const CLIENT_KEY: &str = "authenticated-client";

/// Client-side interceptor attaching the auth token to unary and streaming
/// calls alike.
#[derive(Clone)]
pub struct AuthInterceptor {
    token: MetadataValue<tonic::metadata::Ascii>,
}

impl AuthInterceptor {
    pub fn new(token: &str) -> Result<Self, MuxError> {
        let token = MetadataValue::try_from(token)
            .map_err(|e| MuxError::Config(format!("auth token is not valid metadata: {e}")))?;
        Ok(Self { token })
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request.metadata_mut().insert(TOKEN_KEY, self.token.clone());
        Ok(request)
    }
}

/// Server-side interceptor authenticating every incoming call.
#[derive(Clone)]
pub struct ServerAuthInterceptor {
    authenticator: Arc<dyn Authenticator>,
}

impl ServerAuthInterceptor {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl Interceptor for ServerAuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let client = {
            let metadata = request.metadata();

            let mut tokens = metadata.get_all(TOKEN_KEY).iter();
            let token = match (tokens.next(), tokens.next()) {
                (Some(token), None) => token,
                _ => {
                    return Err(Status::unauthenticated(
                        "request must carry exactly one auth token",
                    ))
                }
            };
            if metadata.get(CLIENT_KEY).is_some() {
                return Err(Status::unauthenticated(
                    "illegal metadata contained in request",
                ));
            }

            let token = token
                .to_str()
                .map_err(|_| Status::unauthenticated("malformed auth token"))?;
            self.authenticator
                .authenticate(token)
                .map_err(|e| Status::unauthenticated(e.to_string()))?
        };

        let encoded = serde_json::to_string(&client).map_err(|e| {
            error!("failed to encode authenticated client into metadata: {e}");
            Status::internal("internal error while authenticating client")
        })?;
        let value = MetadataValue::try_from(encoded.as_str()).map_err(|e| {
            error!("authenticated client does not fit into metadata: {e}");
            Status::internal("internal error while authenticating client")
        })?;
        request.metadata_mut().insert(CLIENT_KEY, value);
        Ok(request)
    }
}

/// Retrieve the client stored by [`ServerAuthInterceptor`].
///
/// Calling this on a request that did not pass the interceptor is a
/// programmer error and yields `Unauthenticated`.
pub fn client_from_request<T>(request: &Request<T>) -> Result<Client, MuxError> {
    let value = request.metadata().get(CLIENT_KEY).ok_or_else(|| {
        MuxError::Unauthenticated(
            "client_from_request called on a request without authentication".into(),
        )
    })?;
    let text = value
        .to_str()
        .map_err(|_| MuxError::Unauthenticated("malformed authenticated client metadata".into()))?;
    Ok(serde_json::from_str(text)?)
}
