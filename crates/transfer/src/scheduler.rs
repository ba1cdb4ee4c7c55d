//! Bounded-parallelism chunk scheduler.
//!
//! One counting semaphore is the only admission control: a chunk task is
//! created only after a permit is acquired, and the permit moves into the
//! task so it is released exactly once when the task finishes, whatever the
//! result. Retry backoff is waited out without a permit. Completion order is
//! arbitrary; callers key results by hash.

use crate::outcome::{ChunkFailure, FailureReason};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use larder_core::config::TransferConfig;
use larder_core::{ChunkHash, ChunkRef};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry bound and backoff curve for transient chunk failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for RetryPolicy {
    fn from(config: &TransferConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failed_attempts` failures:
    /// `base * 2^(failed_attempts - 1)`, capped at `backoff_max`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(20);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }

    /// Run a single non-chunk operation with the same policy.
    ///
    /// Used for manifest and existence requests, which are not scheduled
    /// but still deserve a second chance on a transient error.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> larder_client::WireResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = larder_client::WireResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(what, attempt, error = %e, ?delay, "transient error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// What the scheduler returns for one batch of chunks.
#[derive(Debug)]
pub struct SchedulerRun<T> {
    /// Successful chunks with their value and the attempt that succeeded.
    pub completed: HashMap<ChunkHash, (T, u32)>,
    /// Chunks that ended failed.
    pub failures: Vec<ChunkFailure>,
    /// Whether cancellation stopped admission.
    pub canceled: bool,
    /// Chunks left unfinished because of cancellation.
    pub remaining: Vec<ChunkHash>,
    /// Highest number of chunk tasks in flight at once.
    pub peak_in_flight: usize,
}

impl<T> Default for SchedulerRun<T> {
    fn default() -> Self {
        Self {
            completed: HashMap::new(),
            failures: Vec::new(),
            canceled: false,
            remaining: Vec::new(),
            peak_in_flight: 0,
        }
    }
}

async fn run_attempt<T, Fut>(
    chunk: ChunkRef,
    attempt: u32,
    permit: OwnedSemaphorePermit,
    fut: Fut,
) -> (ChunkRef, u32, Result<T, FailureReason>)
where
    Fut: Future<Output = Result<T, FailureReason>>,
{
    let _permit = permit;
    let result = fut.await;
    (chunk, attempt, result)
}

/// Resolves once `delay` has passed, or right away on cancellation.
async fn backoff_elapsed(
    chunk: ChunkRef,
    attempt: u32,
    delay: Duration,
    cancel: CancellationToken,
) -> (ChunkRef, u32) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => {}
    }
    (chunk, attempt)
}

/// Runs per-chunk operations with at most `concurrency` in flight.
#[derive(Clone, Debug)]
pub struct Scheduler {
    concurrency: usize,
    retry: RetryPolicy,
}

impl Scheduler {
    pub fn new(concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `op` once per chunk (plus retries).
    ///
    /// A failed chunk never stops its siblings. Transient failures wait out
    /// their backoff, holding no permit, then rejoin the back of the queue
    /// until the retry bound; anything else is final.
    /// On cancellation no further chunk is admitted, in-flight chunks run to
    /// completion, and whatever did not finish is reported in `remaining`.
    pub async fn run<T, F, Fut>(
        &self,
        chunks: Vec<ChunkRef>,
        cancel: &CancellationToken,
        op: F,
    ) -> SchedulerRun<T>
    where
        F: Fn(ChunkRef) -> Fut,
        Fut: Future<Output = Result<T, FailureReason>>,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut pending: VecDeque<(ChunkRef, u32)> = chunks.into_iter().map(|c| (c, 1)).collect();
        let mut in_flight = FuturesUnordered::new();
        let mut waiting = FuturesUnordered::new();
        let mut run = SchedulerRun::default();
        let mut stopped = false;

        debug!(
            chunks = pending.len(),
            concurrency = self.concurrency,
            "scheduling chunk transfers"
        );

        while (!stopped && !pending.is_empty()) || !in_flight.is_empty() || !waiting.is_empty() {
            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !stopped => {
                    stopped = true;
                    run.canceled = true;
                    debug!(
                        in_flight = in_flight.len(),
                        pending = pending.len(),
                        waiting = waiting.len(),
                        "cancellation requested, draining in-flight chunks"
                    );
                }

                Some((chunk, attempt, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                    let chunk: ChunkRef = chunk;
                    let attempt: u32 = attempt;
                    let outcome: Result<T, FailureReason> = outcome;
                    match outcome {
                        Ok(value) => {
                            debug!(chunk = %chunk.hash, attempt, "chunk complete");
                            run.completed.insert(chunk.hash, (value, attempt));
                        }
                        Err(reason) if reason.is_retryable() && attempt < self.retry.max_attempts => {
                            if stopped {
                                run.remaining.push(chunk.hash);
                            } else {
                                let delay = self.retry.backoff(attempt);
                                warn!(chunk = %chunk.hash, attempt, %reason, ?delay, "chunk failed, retrying after backoff");
                                waiting.push(backoff_elapsed(chunk, attempt + 1, delay, cancel.clone()));
                            }
                        }
                        Err(reason) => {
                            warn!(chunk = %chunk.hash, attempt, %reason, "chunk failed");
                            run.failures.push(ChunkFailure {
                                hash: chunk.hash,
                                reason,
                                attempts: attempt,
                            });
                        }
                    }
                }

                Some((chunk, attempt)) = waiting.next(), if !waiting.is_empty() => {
                    let chunk: ChunkRef = chunk;
                    if stopped {
                        run.remaining.push(chunk.hash);
                    } else {
                        pending.push_back((chunk, attempt));
                    }
                }

                permit = semaphore.clone().acquire_owned(), if !stopped && !pending.is_empty() => {
                    let Ok(permit) = permit else { break };
                    if let Some((chunk, attempt)) = pending.pop_front() {
                        in_flight.push(run_attempt(chunk, attempt, permit, op(chunk)));
                        run.peak_in_flight = run.peak_in_flight.max(in_flight.len());
                    }
                }
            }
        }

        run.remaining.extend(pending.into_iter().map(|(c, _)| c.hash));
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_client::ErrorKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn chunks(n: usize) -> Vec<ChunkRef> {
        (0..n)
            .map(|i| ChunkRef::new(ChunkHash::compute(&i.to_le_bytes()), i as u64, 1))
            .collect()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        }
    }

    fn transient() -> FailureReason {
        FailureReason::Wire {
            kind: ErrorKind::Transient,
            message: "reset".into(),
        }
    }

    #[test]
    fn test_backoff_curve() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_never_exceeds_concurrency() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(3, fast_retry());

        let run = scheduler
            .run(chunks(40), &CancellationToken::new(), |_| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, FailureReason>(())
                }
            })
            .await;

        assert_eq!(run.completed.len(), 40);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(run.peak_in_flight <= 3);
    }

    #[tokio::test]
    async fn test_transient_retried_until_bound() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(2, fast_retry());
        let run = scheduler
            .run(chunks(1), &CancellationToken::new(), |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(1, fast_retry());
        let run = scheduler
            .run(chunks(1), &CancellationToken::new(), |_| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(transient())
                    } else {
                        Ok(7u8)
                    }
                }
            })
            .await;

        assert!(run.failures.is_empty());
        let (value, attempts) = run.completed.values().next().unwrap();
        assert_eq!((*value, *attempts), (7, 2));
    }

    #[tokio::test]
    async fn test_backoff_does_not_hold_a_permit() {
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_millis(200),
        };
        let seen = Arc::new(Mutex::new(HashMap::<ChunkHash, usize>::new()));
        let retried_at = Arc::new(Mutex::new(Vec::new()));
        let scheduler = Scheduler::new(1, policy);

        let run = scheduler
            .run(chunks(2), &CancellationToken::new(), |chunk| {
                let seen = seen.clone();
                let retried_at = retried_at.clone();
                async move {
                    let calls = {
                        let mut seen = seen.lock().unwrap();
                        let calls = seen.entry(chunk.hash).or_default();
                        *calls += 1;
                        *calls
                    };
                    if calls == 1 {
                        Err(transient())
                    } else {
                        retried_at.lock().unwrap().push(Instant::now());
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(run.completed.len(), 2);
        let retried_at = retried_at.lock().unwrap();
        assert_eq!(retried_at.len(), 2);
        // Both backoffs ran side by side; a held permit would serialize them.
        let gap = retried_at[1].duration_since(retried_at[0]);
        assert!(gap < Duration::from_millis(150), "second retry lagged by {gap:?}");
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_reports_remaining() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(30),
        };
        let scheduler = Scheduler::new(2, policy);
        let trigger = cancel.clone();

        let started = Instant::now();
        let run = scheduler
            .run(chunks(1), &cancel, |_| {
                let trigger = trigger.clone();
                async move {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        trigger.cancel();
                    });
                    Err::<(), _>(transient())
                }
            })
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(run.canceled);
        assert!(run.failures.is_empty());
        assert_eq!(run.remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(1, fast_retry());
        let run = scheduler
            .run(chunks(1), &CancellationToken::new(), |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(FailureReason::Wire {
                        kind: ErrorKind::Permanent,
                        message: "forbidden".into(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.failures[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_admits_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler = Scheduler::new(4, fast_retry());
        let run = scheduler
            .run(chunks(5), &cancel, |_| async { Ok::<_, FailureReason>(()) })
            .await;

        assert!(run.canceled);
        assert!(run.completed.is_empty());
        assert_eq!(run.remaining.len(), 5);
    }
}
