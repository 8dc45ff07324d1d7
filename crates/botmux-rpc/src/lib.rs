//! # botmux-rpc
//!
//! The gRPC control plane: generated protocol types, the token auth
//! interceptors for both sides of the connection, and status classification
//! helpers consumed by the retry layer.

pub mod auth;
pub mod status;

/// Generated control-plane protocol, package `mux`.
pub mod pb {
    tonic::include_proto!("mux");
}
