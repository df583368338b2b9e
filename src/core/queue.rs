use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("job '{0}' already exists in the queue")]
    Duplicate(String),
    #[error("queue has not been started")]
    NotStarted,
    #[error("queue is closed")]
    Closed,
    #[error("queue needs at least one worker")]
    InvalidWorkers,
}

/// A unit of work with a stable identity.
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} pending={} running={} completed={} failed={}",
            self.total, self.pending, self.running, self.completed, self.failed
        )
    }
}

/// Accepts jobs and runs them in the background.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Start the workers. They stop when `cancel` fires.
    async fn start(&self, cancel: CancellationToken) -> Result<(), QueueError>;

    /// Enqueue `job`. A job whose id was already submitted is rejected.
    async fn submit(&self, job: Arc<dyn Job>) -> Result<(), QueueError>;

    async fn stats(&self) -> QueueStats;
}

#[derive(Default)]
struct QueueState {
    seen: HashSet<String>,
    stats: QueueStats,
    cancel: Option<CancellationToken>,
}

type JobReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<dyn Job>>>>;

/// In-process queue with a fixed number of workers. Job ids are remembered
/// for the lifetime of the queue.
pub struct LocalQueue {
    workers: usize,
    state: Arc<Mutex<QueueState>>,
    tx: mpsc::UnboundedSender<Arc<dyn Job>>,
    rx: JobReceiver,
}

impl LocalQueue {
    pub fn new(workers: usize) -> Result<Self, QueueError> {
        if workers == 0 {
            return Err(QueueError::InvalidWorkers);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            workers,
            state: Arc::new(Mutex::new(QueueState::default())),
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn worker(
    n: usize,
    rx: JobReceiver,
    state: Arc<Mutex<QueueState>>,
    cancel: CancellationToken,
) {
    debug!(worker = n, "queue worker started");
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            job = async { rx.lock().await.recv().await } => job,
        };
        let Some(job) = next else { break };

        {
            let mut s = lock(&state);
            s.stats.pending = s.stats.pending.saturating_sub(1);
            s.stats.running += 1;
        }
        // A panicking job must not take its worker down with it.
        let handle = {
            let job = Arc::clone(&job);
            let cancel = cancel.clone();
            tokio::spawn(async move { job.run(&cancel).await })
        };
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context("job task aborted")),
        };
        {
            let mut s = lock(&state);
            s.stats.running = s.stats.running.saturating_sub(1);
            match &result {
                Ok(()) => s.stats.completed += 1,
                Err(_) => s.stats.failed += 1,
            }
        }
        match result {
            Ok(()) => debug!(job = %job.id(), "job completed"),
            Err(e) => error!(job = %job.id(), error = %format!("{:#}", e), "job failed"),
        }
    }
    debug!(worker = n, "queue worker stopped");
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn start(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        {
            let mut s = self.state();
            if s.cancel.is_some() {
                return Ok(());
            }
            s.cancel = Some(cancel.clone());
        }
        for n in 0..self.workers {
            tokio::spawn(worker(
                n,
                Arc::clone(&self.rx),
                Arc::clone(&self.state),
                cancel.clone(),
            ));
        }
        info!(workers = self.workers, "started local queue");
        Ok(())
    }

    async fn submit(&self, job: Arc<dyn Job>) -> Result<(), QueueError> {
        let mut s = self.state();
        match &s.cancel {
            None => return Err(QueueError::NotStarted),
            Some(c) if c.is_cancelled() => return Err(QueueError::Closed),
            Some(_) => {}
        }
        if !s.seen.insert(job.id().to_string()) {
            return Err(QueueError::Duplicate(job.id().to_string()));
        }
        self.tx.send(job).map_err(|_| QueueError::Closed)?;
        s.stats.total += 1;
        s.stats.pending += 1;
        Ok(())
    }

    async fn stats(&self) -> QueueStats {
        self.state().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingJob {
        id: String,
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("job {} failed on purpose", self.id);
            }
            Ok(())
        }
    }

    struct PanickingJob;

    #[async_trait]
    impl Job for PanickingJob {
        fn id(&self) -> &str {
            "boom"
        }

        async fn run(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
            panic!("report build blew up");
        }
    }

    fn job(id: &str, runs: &Arc<AtomicUsize>, fail: bool) -> Arc<dyn Job> {
        Arc::new(CountingJob {
            id: id.to_string(),
            runs: Arc::clone(runs),
            fail,
        })
    }

    async fn wait_idle(queue: &LocalQueue) -> QueueStats {
        for _ in 0..200 {
            let stats = queue.stats().await;
            if stats.pending == 0 && stats.running == 0 {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue did not drain");
    }

    #[test]
    fn zero_workers_rejected() {
        assert_eq!(LocalQueue::new(0).err(), Some(QueueError::InvalidWorkers));
    }

    #[tokio::test]
    async fn submit_before_start_fails() {
        let queue = LocalQueue::new(1).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        assert_eq!(
            queue.submit(job("a", &runs, false)).await,
            Err(QueueError::NotStarted)
        );
    }

    #[tokio::test]
    async fn duplicate_ids_rejected_even_after_completion() {
        let queue = LocalQueue::new(2).unwrap();
        queue.start(CancellationToken::new()).await.unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        queue.submit(job("brc-h1", &runs, false)).await.unwrap();
        wait_idle(&queue).await;
        assert_eq!(
            queue.submit(job("brc-h1", &runs, false)).await,
            Err(QueueError::Duplicate("brc-h1".to_string()))
        );

        let stats = queue.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_counted_and_workers_continue() {
        let queue = LocalQueue::new(1).unwrap();
        queue.start(CancellationToken::new()).await.unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        queue.submit(job("bad", &runs, true)).await.unwrap();
        queue.submit(job("good", &runs, false)).await.unwrap();
        let stats = wait_idle(&queue).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_job_counts_as_failed_and_worker_survives() {
        let queue = LocalQueue::new(1).unwrap();
        queue.start(CancellationToken::new()).await.unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        queue.submit(Arc::new(PanickingJob)).await.unwrap();
        queue.submit(job("after", &runs, false)).await.unwrap();
        let stats = wait_idle(&queue).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_after_cancel() {
        let queue = LocalQueue::new(1).unwrap();
        let cancel = CancellationToken::new();
        queue.start(cancel.clone()).await.unwrap();
        cancel.cancel();

        let runs = Arc::new(AtomicUsize::new(0));
        assert_eq!(queue.submit(job("late", &runs, false)).await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let queue = LocalQueue::new(1).unwrap();
        queue.start(CancellationToken::new()).await.unwrap();
        queue.start(CancellationToken::new()).await.unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        queue.submit(job("once", &runs, false)).await.unwrap();
        wait_idle(&queue).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
