//! Long-polling `getUpdates` client producing a raw update stream.
//!
//! One producer task per stream. Telegram holds the request open until an
//! update arrives or the poll timeout elapses, so a request-level timeout
//! here is part of normal operation, not a failure.

use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use botmux_core::error::{scrub_token, MuxError};
use botmux_core::stream::{Item, DEFAULT_CAPACITY};
use botmux_core::update::RawUpdate;

/// Default long poll hold, mirroring what Telegram recommends.
pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra slack on the HTTP client timeout so a healthy long poll is never
/// cut off by our own deadline before the server answers.
const POLL_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Options for [`LongPollStreamer`]. `offset`, `limit` and `timeout` map to
/// the query parameters of `getUpdates`.
pub struct LongPollOptions {
    pub offset: i64,
    pub limit: usize,
    pub timeout: Duration,
    /// HTTP client to poll with; a fresh one is built when unset.
    pub client: Option<reqwest::Client>,
}

impl Default for LongPollOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_CAPACITY,
            timeout: DEFAULT_LONG_POLL_TIMEOUT,
            client: None,
        }
    }
}

/// Streams raw updates from `{endpoint}/bot{token}/getUpdates`.
#[derive(Debug)]
pub struct LongPollStreamer {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    limit: usize,
    offset: i64,
}

impl LongPollStreamer {
    pub fn new(endpoint: &str, token: &str, opts: LongPollOptions) -> Result<Self, MuxError> {
        reqwest::Url::parse(endpoint)
            .map_err(|e| MuxError::Config(format!("invalid long poll endpoint: {e}")))?;
        Ok(Self {
            client: opts.client.unwrap_or_default(),
            url: format!("{}/bot{}/getUpdates", endpoint.trim_end_matches('/'), token),
            timeout: opts.timeout,
            limit: opts.limit.max(1),
            offset: opts.offset,
        })
    }

    /// Launch the producer. The stream ends when `cancel` fires, the
    /// receiver is dropped, or a non-recoverable error is emitted; poll
    /// timeouts are emitted as [`MuxError::PollTimeout`] and polling
    /// continues.
    pub fn stream(self, cancel: CancellationToken) -> mpsc::Receiver<Item<RawUpdate>> {
        let (tx, rx) = mpsc::channel(self.limit);
        tokio::spawn(self.produce(tx, cancel));
        rx
    }

    async fn produce(mut self, tx: mpsc::Sender<Item<RawUpdate>>, cancel: CancellationToken) {
        loop {
            let body = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.poll() => match result {
                    Ok(body) => body,
                    Err(MuxError::PollTimeout) => {
                        debug!("long poll expired with no updates");
                        if tx.send(Err(MuxError::PollTimeout)).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                },
            };

            let (batch, next_offset) = match self.parse_batch(&body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            for raw in batch {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(Ok(raw)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            if let Some(next) = next_offset {
                // Never move the offset backwards.
                self.offset = self.offset.max(next);
            }
        }
    }

    async fn poll(&self) -> Result<Bytes, MuxError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("timeout", self.timeout.as_secs().to_string()),
                ("limit", self.limit.to_string()),
                ("offset", self.offset.to_string()),
            ])
            .timeout(self.timeout + POLL_TIMEOUT_SLACK)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MuxError::PollTimeout
                } else {
                    MuxError::Transport(scrub_token(&e.to_string()))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MuxError::Api(format!(
                "bad response code while polling: {status}"
            )));
        }

        // One allocation per batch: reqwest sizes the buffer from
        // Content-Length, and every emitted fragment aliases into it.
        response
            .bytes()
            .await
            .map_err(|e| MuxError::Transport(scrub_token(&e.to_string())))
    }

    /// Parse the API wrapper and alias each raw fragment into `body`.
    /// Returns the batch and the offset to use for the next poll.
    fn parse_batch(&self, body: &Bytes) -> Result<(Vec<RawUpdate>, Option<i64>), MuxError> {
        #[derive(Deserialize)]
        struct ApiResponse<'a> {
            ok: bool,
            #[serde(default)]
            description: Option<String>,
            #[serde(borrow, default)]
            result: Vec<&'a RawValue>,
        }

        let response: ApiResponse = serde_json::from_slice(body)?;
        if !response.ok {
            return Err(MuxError::Api(format!(
                "getUpdates response is not ok: {}",
                response.description.unwrap_or_default()
            )));
        }

        let mut batch = Vec::with_capacity(response.result.len());
        for fragment in response.result {
            batch.push(RawUpdate::alias(body, fragment)?);
        }
        let next_offset = match batch.last() {
            Some(last) => Some(last.update_id()? + 1),
            None => None,
        };
        Ok((batch, next_offset))
    }
}
