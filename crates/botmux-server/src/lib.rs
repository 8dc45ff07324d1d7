//! # botmux-server
//!
//! The proxy side of botmux: the long-polling ingestion client, the matcher
//! multiplexer fanning updates out to subscriptions, the registration gRPC
//! service, and the egress auth boundary for outbound bot API calls.

pub mod egress;
pub mod longpoll;
pub mod mux;
pub mod registrar;
