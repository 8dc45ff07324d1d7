use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Top-level error type for botmux.
#[derive(Debug, Error)]
pub enum MuxError {
    /// A matcher pattern failed to compile.
    #[error("invalid matcher: {0}")]
    InvalidMatcher(#[from] regex::Error),

    /// Registration was attempted with an empty matcher group.
    #[error("cannot register with zero matchers")]
    NoMatchers,

    /// A long poll request hit its own deadline. Expected during normal
    /// operation whenever Telegram has no updates to deliver.
    #[error("temporary timeout while polling")]
    PollTimeout,

    /// Network-level failure. The message is already scrubbed of tokens.
    #[error("transport error: {0}")]
    Transport(String),

    /// Telegram (or the proxy in front of it) rejected the request.
    #[error("telegram API error: {0}")]
    Api(String),

    /// The presented authentication token is unknown.
    #[error("invalid authentication token provided")]
    InvalidToken,

    /// Authentication metadata is missing, duplicated or malformed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream or subscription on the other side has ended.
    #[error("stream closed")]
    Closed,
}

impl MuxError {
    /// Whether this error is the benign long-poll expiry.
    pub fn is_poll_timeout(&self) -> bool {
        matches!(self, MuxError::PollTimeout)
    }
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"bot[^/\s]+").expect("token pattern is valid"))
}

/// Remove bot tokens from error text before it is surfaced anywhere.
///
/// Transport errors stringify the request URL, and the long-poll URL carries
/// the bot token as a path segment. The `bot<token>` segment is replaced
/// wholesale rather than trying to preserve any part of it.
pub fn scrub_token(text: &str) -> String {
    token_re().replace_all(text, "bot<token>").into_owned()
}
