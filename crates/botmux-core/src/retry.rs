//! Generic retry primitives with pluggable delay schedules.
//!
//! Both the control-plane client and the ingestion loop recover from
//! transient failures through this module, which keeps reconnection
//! behavior uniform across the proxy.

use std::future::Future;
use std::time::Duration;

/// Classified operation error. The operation closure decides on every
/// attempt whether its error is worth retrying.
#[derive(Debug)]
pub enum RetryError<E> {
    Recoverable(E),
    Unrecoverable(E),
}

impl<E> RetryError<E> {
    /// Classify `err` as recoverable when `recoverable` holds.
    pub fn recoverable_if(recoverable: bool, err: E) -> Self {
        if recoverable {
            RetryError::Recoverable(err)
        } else {
            RetryError::Unrecoverable(err)
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Recoverable(e) | RetryError::Unrecoverable(e) => e,
        }
    }
}

/// A delay schedule consumed by [`recover`].
pub trait Schedule {
    fn next_delay(&mut self) -> Duration;
}

pub const DEFAULT_BACKOFF_MIN_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_BACKOFF_MAX_DELAY: Duration = Duration::from_secs(600);
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

/// Exponential backoff: 50 ms, doubled on every attempt, capped at 10 min.
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            next: DEFAULT_BACKOFF_MIN_DELAY,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule for Backoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * DEFAULT_BACKOFF_FACTOR).min(DEFAULT_BACKOFF_MAX_DELAY);
        delay
    }
}

pub const DEFAULT_STATIC_DELAY: Duration = Duration::from_secs(1);

/// Constant one second delay.
#[derive(Debug, Default)]
pub struct Static;

impl Schedule for Static {
    fn next_delay(&mut self) -> Duration {
        DEFAULT_STATIC_DELAY
    }
}

/// Repeatedly invoke `op` until it succeeds or fails unrecoverably.
///
/// On [`RetryError::Unrecoverable`] the inner error is returned as-is. On
/// [`RetryError::Recoverable`] the next delay of `schedule` is slept through
/// and the operation is retried. The sleep is a plain tokio sleep, so
/// cancellation is a matter of dropping the returned future (callers race
/// it against their cancellation token).
pub async fn recover<T, E, F, Fut, S>(mut op: F, mut schedule: S) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
    S: Schedule,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(RetryError::Unrecoverable(e)) => return Err(e),
            Err(RetryError::Recoverable(_)) => {
                tokio::time::sleep(schedule.next_delay()).await;
            }
        }
    }
}

/// [`recover`] with the default exponential backoff schedule.
pub async fn with_backoff<T, E, F, Fut>(op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
{
    recover(op, Backoff::new()).await
}

/// [`recover`] with the static one second schedule.
pub async fn with_static<T, E, F, Fut>(op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
{
    recover(op, Static).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_op(
        calls: Arc<AtomicUsize>,
        succeed_on: usize,
    ) -> impl FnMut() -> std::future::Ready<Result<usize, RetryError<String>>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n >= succeed_on {
                Ok(n)
            } else {
                Err(RetryError::Recoverable(format!("attempt {n} failed")))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_retries_until_success() {
        for succeed_on in 1..4 {
            let calls = Arc::new(AtomicUsize::new(0));
            let got = with_backoff(counting_op(calls.clone(), succeed_on))
                .await
                .unwrap();
            assert_eq!(got, succeed_on);
            assert_eq!(calls.load(Ordering::SeqCst), succeed_on);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_returns_unrecoverable_inner_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err: Result<(), String> = with_static(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n < 3 {
                Err(RetryError::Recoverable(format!("transient {n}")))
            } else {
                Err(RetryError::Unrecoverable("fatal".to_string()))
            })
        })
        .await;
        assert_eq!(err.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_immediate_unrecoverable_single_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err: Result<(), &str> = with_backoff(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(RetryError::Unrecoverable("nope")))
        })
        .await;
        assert_eq!(err.unwrap_err(), "nope");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        let mut schedule = Backoff::new();
        assert_eq!(schedule.next_delay(), Duration::from_millis(50));
        assert_eq!(schedule.next_delay(), Duration::from_millis(100));
        assert_eq!(schedule.next_delay(), Duration::from_millis(200));
        for _ in 0..32 {
            schedule.next_delay();
        }
        assert_eq!(schedule.next_delay(), DEFAULT_BACKOFF_MAX_DELAY);
    }

    #[test]
    fn test_static_schedule_is_constant() {
        let mut schedule = Static;
        assert_eq!(schedule.next_delay(), DEFAULT_STATIC_DELAY);
        assert_eq!(schedule.next_delay(), DEFAULT_STATIC_DELAY);
    }

    #[test]
    fn test_recoverable_if() {
        assert!(matches!(
            RetryError::recoverable_if(true, "e"),
            RetryError::Recoverable("e")
        ));
        assert!(matches!(
            RetryError::recoverable_if(false, "e"),
            RetryError::Unrecoverable("e")
        ));
    }
}
