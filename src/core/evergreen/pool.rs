use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Number of concurrent lookups per fetch.
pub const FETCH_WORKERS: usize = 16;

/// Everything a pooled run produced, joined at one point.
#[derive(Debug)]
pub struct PoolOutcome<T, E> {
    pub results: Vec<T>,
    pub errors: Vec<(String, E)>,
    /// Work units never attempted, because of cancellation or a worker panic.
    pub unprocessed: usize,
}

/// Run `work` once per ID on `workers` tasks.
///
/// Workers pull the next ID from a shared cursor and check `cancel` before
/// each unit. Every result travels over a channel to this function, which is
/// the only place results are accumulated. All workers are joined before
/// returning.
pub async fn run_pool<T, E, F, Fut>(
    ids: Vec<String>,
    workers: usize,
    cancel: &CancellationToken,
    work: F,
) -> PoolOutcome<T, E>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let total = ids.len();
    let ids: Arc<[String]> = ids.into();
    let cursor = Arc::new(AtomicUsize::new(0));
    let work = Arc::new(work);
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Result<T, E>)>();

    let mut set = JoinSet::new();
    for _ in 0..workers.max(1).min(total) {
        let ids = Arc::clone(&ids);
        let cursor = Arc::clone(&cursor);
        let work = Arc::clone(&work);
        let tx = tx.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                let idx = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(id) = ids.get(idx) else {
                    return;
                };
                let result = work(id.clone()).await;
                if tx.send((id.clone(), result)).is_err() {
                    return;
                }
            }
        });
    }
    drop(tx);

    let mut outcome = PoolOutcome {
        results: Vec::new(),
        errors: Vec::new(),
        unprocessed: 0,
    };
    while let Some((id, result)) = rx.recv().await {
        match result {
            Ok(value) => outcome.results.push(value),
            Err(e) => outcome.errors.push((id, e)),
        }
    }
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "fetch worker terminated abnormally");
        }
    }

    outcome.unprocessed = total - outcome.results.len() - outcome.errors.len();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("d{}", i)).collect()
    }

    #[tokio::test]
    async fn processes_every_id_once() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let outcome = run_pool(ids(50), 16, &CancellationToken::new(), move |id| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(id)
            }
        })
        .await;

        assert_eq!(seen.load(Ordering::SeqCst), 50);
        let mut results = outcome.results;
        results.sort();
        results.dedup();
        assert_eq!(results.len(), 50);
        assert_eq!(outcome.unprocessed, 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let outcome = run_pool(ids(64), 16, &CancellationToken::new(), move |_| {
            let (f, p) = (Arc::clone(&f), Arc::clone(&p));
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        })
        .await;

        assert_eq!(outcome.results.len(), 64);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 16, "peak concurrency {} exceeds pool size", peak);
        assert!(peak > 1, "work was not spread across workers");
    }

    #[tokio::test]
    async fn errors_do_not_stop_other_work() {
        let outcome = run_pool(ids(20), 4, &CancellationToken::new(), |id| async move {
            if id == "d3" || id == "d11" {
                Err(format!("{} failed", id))
            } else {
                Ok(id)
            }
        })
        .await;

        assert_eq!(outcome.results.len(), 18);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.unprocessed, 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_pool(ids(10), 16, &cancel, |id| async move { Ok::<_, String>(id) }).await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.unprocessed, 10);
    }

    #[tokio::test]
    async fn cancel_mid_run_stops_pulling_work() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let outcome = run_pool(ids(100), 2, &cancel, move |id| {
            let trigger = trigger.clone();
            async move {
                if id == "d1" {
                    trigger.cancel();
                }
                Ok::<_, String>(id)
            }
        })
        .await;

        assert!(outcome.unprocessed > 0);
        assert!(outcome.results.len() < 100);
    }

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let outcome = run_pool(Vec::new(), 16, &CancellationToken::new(), |id| async move {
            Ok::<_, String>(id)
        })
        .await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.unprocessed, 0);
    }
}
