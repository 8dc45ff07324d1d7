//! Fan-out of updates to registered subscriptions based on matcher groups.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use botmux_core::matcher::MatcherGroup;
use botmux_core::update::Update;
use botmux_core::MuxError;

struct Subscription {
    cancel: CancellationToken,
    matchers: MatcherGroup,
    tx: mpsc::Sender<Update>,
}

/// Routes each served update to every live subscription whose matcher group
/// matches the message text.
///
/// [`register`](Multiplexer::register) is safe to call from any task at any
/// time. [`serve`](Multiplexer::serve) must be driven by a single task:
/// that is what keeps per-subscription delivery ordered without a delivery
/// lock, and it matches the single producer the ingestion pipeline runs.
pub struct Multiplexer {
    next_key: AtomicU64,
    buffer_len: usize,
    subs: DashMap<u64, Subscription>,
}

impl Multiplexer {
    /// `buffer_len` is the capacity of every subscription channel created
    /// by this multiplexer.
    pub fn new(buffer_len: usize) -> Self {
        Self {
            next_key: AtomicU64::new(0),
            buffer_len: buffer_len.max(1),
            subs: DashMap::new(),
        }
    }

    /// Register a subscription that receives matching updates until
    /// `cancel` fires or the receiver is dropped. Empty groups are refused.
    pub fn register(
        &self,
        cancel: CancellationToken,
        matchers: MatcherGroup,
    ) -> Result<mpsc::Receiver<Update>, MuxError> {
        if matchers.is_empty() {
            return Err(MuxError::NoMatchers);
        }

        let key = self.next_key.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.buffer_len);
        self.subs.insert(
            key,
            Subscription {
                cancel,
                matchers,
                tx,
            },
        );
        Ok(rx)
    }

    /// Number of currently registered subscriptions.
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Fan `update` out to every matching subscription.
    ///
    /// Contract: called from exactly one task. A subscription whose buffer
    /// is full blocks this call until it drains or the subscription is
    /// cancelled; slow handlers surface as backpressure here by design of
    /// the deployment knob (`buffer_len`).
    pub async fn serve(&self, update: &Update) {
        // Only text messages are dispatched for now.
        let Some(text) = update.text() else { return };

        let keys: Vec<u64> = self.subs.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            // Snapshot what we need and let go of the shard before awaiting.
            let (cancel, matchers_hit, tx) = match self.subs.get(&key) {
                Some(sub) => (
                    sub.cancel.clone(),
                    sub.matchers.matches(text),
                    sub.tx.clone(),
                ),
                None => continue,
            };

            if cancel.is_cancelled() {
                self.remove(key);
                continue;
            }
            if !matchers_hit {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => self.remove(key),
                sent = tx.send(update.clone()) => {
                    // A dropped receiver means the subscriber is gone.
                    if sent.is_err() {
                        self.remove(key);
                    }
                }
            }
        }
    }

    /// Removing the subscription drops its sender, which is what closes the
    /// channel; the map entry is the sender's only owner, so the close
    /// happens exactly once.
    fn remove(&self, key: u64) {
        if self.subs.remove(&key).is_some() {
            debug!(key, "subscription removed");
        }
    }
}
