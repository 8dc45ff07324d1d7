//! Channel-backed streams of `Result` items with a parallel map combinator.
//!
//! A stream here is a bounded `mpsc::Receiver<Result<T, MuxError>>` with a
//! single consumer. An `Err` item terminates the logical value at that
//! position but does not close the channel by itself; producers close the
//! channel by dropping their sender.

use std::sync::Arc;
use std::thread::available_parallelism;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::MuxError;

/// Default capacity for update streams. Telegram's long polling API caps
/// the number of updates per response at 100.
pub const DEFAULT_CAPACITY: usize = 100;

/// A single position in a stream: a value or the error that replaced it.
pub type Item<T> = Result<T, MuxError>;

/// Consume `rx` to completion so that blocked producers can unwind.
///
/// Required of any consumer that abandons a stream early.
pub async fn drain<T>(mut rx: mpsc::Receiver<T>) {
    while rx.recv().await.is_some() {}
}

/// Map `input` to a new stream by applying `f` to every successful value in
/// parallel across one worker per CPU core. Errors pass through unchanged.
///
/// Output preserves input order: each accepted item gets a completion
/// channel that is placed on an ordered hand-off queue before the item is
/// dispatched to the worker pool, and a re-ordering task forwards completed
/// results strictly in queue order. Producers suspend when `capacity` is
/// reached; closing `input` closes the output once in-flight work drains.
pub fn mapped<T, K, F>(mut input: mpsc::Receiver<Item<T>>, f: F, capacity: usize) -> mpsc::Receiver<Item<K>>
where
    T: Send + 'static,
    K: Send + 'static,
    F: Fn(T) -> Result<K, MuxError> + Send + Sync + 'static,
{
    let capacity = capacity.max(1);
    let workers = available_parallelism().map(|n| n.get()).unwrap_or(1);

    let (out_tx, out_rx) = mpsc::channel::<Item<K>>(capacity);
    let (job_tx, job_rx) = mpsc::channel::<(Item<T>, oneshot::Sender<Item<K>>)>(workers);
    let (order_tx, mut order_rx) = mpsc::channel::<oneshot::Receiver<Item<K>>>(capacity);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let f = Arc::new(f);

    // Demultiplexer: enqueue the completion slot before dispatching so the
    // hand-off queue order is exactly the input order.
    tokio::spawn(async move {
        while let Some(item) = input.recv().await {
            let (done_tx, done_rx) = oneshot::channel();
            if order_tx.send(done_rx).await.is_err() {
                return;
            }
            if job_tx.send((item, done_tx)).await.is_err() {
                return;
            }
        }
    });

    for _ in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let f = Arc::clone(&f);
        tokio::spawn(async move {
            loop {
                let job = { job_rx.lock().await.recv().await };
                let Some((item, done_tx)) = job else { return };
                let result = match item {
                    Ok(value) => f(value),
                    Err(e) => Err(e),
                };
                // The re-ordering task may already be gone; nothing to do then.
                let _ = done_tx.send(result);
            }
        });
    }

    // Re-ordering task: forward results in hand-off order.
    tokio::spawn(async move {
        while let Some(done_rx) = order_rx.recv().await {
            // A dropped completion sender means the worker pool is shutting
            // down mid-item; skip the slot.
            let Ok(result) = done_rx.await else { continue };
            if out_tx.send(result).await.is_err() {
                return;
            }
        }
    });

    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn collect<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mapped_preserves_input_order() {
        let (tx, rx) = mpsc::channel::<Item<u32>>(8);
        let producer = tokio::spawn(async move {
            for i in 0..200u32 {
                tx.send(Ok(i)).await.unwrap();
            }
        });

        // Uneven per-item work so that parallel workers finish out of order.
        let out = mapped(
            rx,
            |i| {
                std::thread::sleep(Duration::from_micros(u64::from((i % 7) * 150)));
                Ok(i * 2)
            },
            8,
        );

        let got = collect(out).await;
        producer.await.unwrap();
        let values: Vec<u32> = got.into_iter().map(|r| r.unwrap()).collect();
        let want: Vec<u32> = (0..200).map(|i| i * 2).collect();
        assert_eq!(values, want);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mapped_passes_errors_through_in_position() {
        let (tx, rx) = mpsc::channel::<Item<u32>>(4);
        tokio::spawn(async move {
            tx.send(Ok(1)).await.unwrap();
            tx.send(Err(MuxError::Transport("connection reset".into())))
                .await
                .unwrap();
            tx.send(Ok(3)).await.unwrap();
        });

        let out = mapped(rx, |i| Ok(i + 10), 4);
        let got = collect(out).await;
        assert_eq!(got.len(), 3);
        assert_eq!(*got[0].as_ref().unwrap(), 11);
        assert!(matches!(got[1], Err(MuxError::Transport(_))));
        assert_eq!(*got[2].as_ref().unwrap(), 13);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mapped_mapper_errors_replace_values() {
        let (tx, rx) = mpsc::channel::<Item<u32>>(4);
        tokio::spawn(async move {
            for i in 0..4u32 {
                tx.send(Ok(i)).await.unwrap();
            }
        });

        let out = mapped(
            rx,
            |i| {
                if i % 2 == 0 {
                    Ok(i)
                } else {
                    Err(MuxError::Api(format!("odd value {i}")))
                }
            },
            4,
        );

        let got = collect(out).await;
        assert_eq!(got.len(), 4);
        assert!(got[0].is_ok() && got[2].is_ok());
        assert!(got[1].is_err() && got[3].is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mapped_closes_output_after_input_closes() {
        let (tx, rx) = mpsc::channel::<Item<u32>>(2);
        let mut out = mapped(rx, |v| Ok(v), 2);

        tx.send(Ok(7)).await.unwrap();
        assert_eq!(out.recv().await.unwrap().unwrap(), 7);

        drop(tx);
        assert!(out.recv().await.is_none(), "output should close with input");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drain_unblocks_producer() {
        let (tx, rx) = mpsc::channel::<Item<u32>>(1);
        let producer = tokio::spawn(async move {
            for i in 0..64u32 {
                if tx.send(Ok(i)).await.is_err() {
                    return;
                }
            }
        });

        drain(rx).await;
        producer.await.unwrap();
    }
}
