//! Bounded Parallel Executor
//!
//! Runs independent units of work with a concurrency cap and collects one
//! [`ProcessResult`] per submitted task.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cap used for bulk operations unless configured otherwise
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Outcome of a single work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
    pub item: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ProcessResult {
    pub fn ok(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(item: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Executor with a fixed concurrency budget.
///
/// Tasks are spawned on the current tokio runtime as soon as they are
/// submitted; a semaphore permit gates when each one actually starts.
/// [`Executor::wait`] returns results in submission order.
pub struct Executor {
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    task_timeout: Option<Duration>,
    handles: Vec<(String, JoinHandle<ProcessResult>)>,
}

impl Executor {
    /// Create an executor running at most `max_concurrency` tasks at once.
    /// A cap of zero is treated as one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            cancel: CancellationToken::new(),
            task_timeout: None,
            handles: Vec::new(),
        }
    }

    /// Abandon queued and running tasks when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail any task that runs longer than `timeout`
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Submit a task. Returns immediately.
    pub fn execute<F>(&mut self, key: impl Into<String>, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let key = key.into();
        let semaphore = Arc::clone(&self.semaphore);
        let cancel = self.cancel.clone();
        let task_timeout = self.task_timeout;
        let item = key.clone();

        let handle = tokio::spawn(async move {
            let _permit = tokio::select! {
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return ProcessResult::failed(item, "executor closed"),
                },
                _ = cancel.cancelled() => {
                    return ProcessResult::failed(item, "cancelled before start");
                }
            };

            let outcome = tokio::select! {
                outcome = run_with_timeout(task, task_timeout) => outcome,
                _ = cancel.cancelled() => Err(anyhow::anyhow!("cancelled")),
            };

            match outcome {
                Ok(()) => ProcessResult::ok(item),
                Err(e) => {
                    let message = format!("{:#}", e);
                    tracing::warn!(item = %item, error = %message, "Task failed");
                    ProcessResult::failed(item, message)
                }
            }
        });

        self.handles.push((key, handle));
    }

    /// Wait for every submitted task and return one result per task.
    ///
    /// Panicking tasks are recorded as failures; they never abort the batch.
    pub async fn wait(self) -> Vec<ProcessResult> {
        let mut results = Vec::with_capacity(self.handles.len());

        for (key, handle) in self.handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    tracing::error!(item = %key, "Task panicked: {}", message);
                    ProcessResult::failed(key, format!("task panicked: {}", message))
                }
                Err(e) => ProcessResult::failed(key, format!("task aborted: {}", e)),
            };
            results.push(result);
        }

        results
    }
}

async fn run_with_timeout<F>(task: F, timeout: Option<Duration>) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!("timed out after {:?}", limit)),
        },
        None => task.await,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `action` over every item with at most `max_concurrency` in flight.
pub async fn run_all<T, K, A, Fut>(
    max_concurrency: usize,
    cancel: &CancellationToken,
    items: Vec<T>,
    key: K,
    action: A,
) -> Vec<ProcessResult>
where
    K: Fn(&T) -> String,
    A: Fn(T) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut executor = Executor::new(max_concurrency).with_cancellation(cancel.clone());
    for item in items {
        let k = key(&item);
        executor.execute(k, action(item));
    }
    executor.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn run_batch(cap: usize, n: usize, failing: &[usize]) -> Vec<ProcessResult> {
        let mut executor = Executor::new(cap);
        for i in 0..n {
            let fail = failing.contains(&i);
            executor.execute(format!("item-{}", i), async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if fail {
                    anyhow::bail!("item {} failed", i);
                }
                Ok(())
            });
        }
        executor.wait().await
    }

    #[tokio::test]
    async fn test_completeness_across_caps() {
        let n = 10;
        let failing = [1, 4, 7];
        for cap in [1, n / 2, n] {
            let results = run_batch(cap, n, &failing).await;
            assert_eq!(results.len(), n, "cap={}", cap);
            assert_eq!(results.iter().filter(|r| !r.success).count(), failing.len());
            assert_eq!(
                results.iter().filter(|r| r.success).count(),
                n - failing.len()
            );
        }
    }

    #[tokio::test]
    async fn test_results_follow_submission_order() {
        let results = run_batch(3, 6, &[]).await;
        let items: Vec<_> = results.iter().map(|r| r.item.as_str()).collect();
        assert_eq!(
            items,
            vec!["item-0", "item-1", "item-2", "item-3", "item-4", "item-5"]
        );
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let mut executor = Executor::new(2);
        for i in 0..5 {
            executor.execute(format!("item-{}", i), async move {
                if i == 2 {
                    panic!("boom");
                }
                Ok(())
            });
        }
        let results = executor.wait().await;

        assert_eq!(results.len(), 5);
        let panicked = &results[2];
        assert!(!panicked.success);
        assert!(panicked.error.as_deref().unwrap().contains("boom"));
        assert_eq!(results.iter().filter(|r| r.success).count(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cap_is_never_exceeded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut executor = Executor::new(3);

        for i in 0..12 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            executor.execute(format!("item-{}", i), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let results = executor.wait().await;

        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_zero_cap_still_runs() {
        let results = run_batch(0, 3, &[]).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_is_recorded() {
        let mut executor = Executor::new(2).with_task_timeout(Duration::from_secs(1));
        executor.execute("slow", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        executor.execute("fast", async { Ok(()) });
        let results = executor.wait().await;

        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn test_cancellation_fails_pending_tasks() {
        let cancel = CancellationToken::new();
        let mut executor = Executor::new(1).with_cancellation(cancel.clone());
        for i in 0..3 {
            executor.execute(format!("item-{}", i), async {
                std::future::pending::<()>().await;
                Ok(())
            });
        }
        cancel.cancel();
        let results = executor.wait().await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn test_run_all_keys_items() {
        let cancel = CancellationToken::new();
        let results = run_all(
            2,
            &cancel,
            vec!["a", "b", "c"],
            |s| format!("bucket {}", s),
            |s| async move {
                if s == "b" {
                    anyhow::bail!("not empty");
                }
                Ok(())
            },
        )
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[1], ProcessResult::failed("bucket b", "not empty"));
    }
}
