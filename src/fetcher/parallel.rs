use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Pages resolved at once per chapter.
pub const DEFAULT_WORKERS: usize = 4;

/// Runs futures on the tokio runtime with at most `workers` of them in
/// flight; the rest wait for a permit.
#[derive(Clone)]
pub struct ParallelFetcher {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl ParallelFetcher {
    pub fn new() -> Self {
        Self::with_workers(DEFAULT_WORKERS)
    }

    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawn `fut` once a permit is free. Yields `None` if the pool was
    /// closed before the permit was granted.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            Some(fut.await)
        })
    }

    /// Run one future per item and collect the outputs in input order.
    pub async fn fetch_all<I, F, Fut>(&self, items: I, f: F) -> Vec<Fut::Output>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let handles: Vec<_> = items.into_iter().map(|item| self.spawn(f(item))).collect();

        let mut results = Vec::with_capacity(handles.len());
        for outcome in futures::future::join_all(handles).await {
            match outcome {
                Ok(Some(result)) => results.push(result),
                Ok(None) => tracing::debug!("Fetch pool closed before task ran"),
                Err(e) => {
                    tracing::error!("Task join error: {}", e);
                }
            }
        }

        results
    }

    /// Stop granting permits. Queued tasks finish with `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for ParallelFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let pool = ParallelFetcher::with_workers(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = pool
            .fetch_all(0..12, |i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    i * 2
                }
            })
            .await;

        assert_eq!(results, (0..12).map(|i| i * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_closed_pool_skips_tasks() {
        let pool = ParallelFetcher::with_workers(1);
        pool.close();
        let out = pool.spawn(async { 1 }).await.unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_zero_workers_clamped() {
        assert_eq!(ParallelFetcher::with_workers(0).workers(), 1);
    }
}
