//! Bounded-concurrency off-reactor task executor.
//!
//! Task bodies run on `tokio`'s blocking-thread pool, gated by a
//! `Semaphore` so at most `max_concurrent` run at once; results are
//! delivered back to the reactor thread the moment the submitting task's
//! `.await` resumes — `tokio`'s own cross-thread waker is the
//! cross-thread signalling primitive, so there is nothing bespoke to
//! build there. Grounded on `task::spawn_blocking` usage elsewhere in
//! this workspace, generalized into an explicit bounded pool instead of
//! one ad hoc blocking call per request.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};

use reactor::error::{Error, ErrorKind};

/// A result cell resolved at most once by the worker that runs its task,
/// and read either by polling [`Promise::get`] or by awaiting
/// [`Promise::wait`].
pub struct Promise<T> {
    inner: Arc<PromiseInner<T>>,
}

struct PromiseInner<T> {
    result: parking_lot::Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Self { inner: Arc::new(PromiseInner { result: parking_lot::Mutex::new(None), notify: Notify::new() }) }
    }

    fn resolve(&self, value: T) {
        *self.inner.result.lock() = Some(value);
        self.inner.notify.notify_waiters();
    }

    /// Non-blocking: `Some` once the task has completed.
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.result.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.result.lock().is_some()
    }

    /// Await completion and take the value. Resolves immediately if the
    /// result already landed.
    pub async fn wait(&self) -> T
    where
        T: Clone,
    {
        loop {
            if let Some(v) = self.inner.result.lock().clone() {
                return v;
            }
            self.inner.notify.notified().await;
        }
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of [`Scheduler::wait_all`]: whether every submitted task had
/// completed before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    AllCompleted,
    /// Deadline passed with tasks still in flight. They are **not**
    /// cancelled: a timed-out wait reports partial completion but leaves
    /// every in-flight task running to completion on its own.
    Partial,
}

/// The bounded-concurrency executor itself.
pub struct Scheduler {
    semaphore: Arc<Semaphore>,
    inflight: Arc<parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl Scheduler {
    /// `max_concurrent` caps how many task bodies may run simultaneously;
    /// further submissions queue on the semaphore rather than spawning
    /// unbounded OS threads.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            inflight: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// Enqueue one task. `f` runs on a blocking-pool thread; its result is
    /// written into `promise` once it returns. Must be called from inside
    /// a tokio runtime (the reactor's `Runtime`).
    pub fn submit<F, T>(&self, f: F, promise: Promise<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + Clone + 'static,
    {
        let semaphore = self.semaphore.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("scheduler semaphore never closes");
            let result = tokio::task::spawn_blocking(f).await;
            if let Ok(value) = result {
                promise.resolve(value);
            }
            // A panicking task body leaves its promise unresolved forever:
            // there is no cancellation/failure channel for task bodies to
            // report through.
        });
        self.inflight.lock().push(handle);
    }

    /// Enqueue many tasks at once; `tasks.len()` must equal
    /// `promises.len()`.
    pub fn submit_batch<F, T>(&self, tasks: Vec<F>, promises: Vec<Promise<T>>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + Clone + 'static,
    {
        for (f, promise) in tasks.into_iter().zip(promises.into_iter()) {
            self.submit(f, promise);
        }
    }

    /// Drive the reactor until every submitted task has completed or
    /// `timeout_ms` elapses, whichever comes first.
    pub async fn wait_all(&self, timeout_ms: u64) -> WaitOutcome {
        let handles = std::mem::take(&mut *self.inflight.lock());
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        match tokio::time::timeout(Duration::from_millis(timeout_ms), join_all).await {
            Ok(()) => WaitOutcome::AllCompleted,
            Err(_) => WaitOutcome::Partial,
        }
    }

    /// Blocking convenience: submit one task and wait for its result or
    /// `timeout_ms`, whichever comes first.
    pub async fn submit_and_wait<F, T>(&self, f: F, timeout_ms: u64) -> Result<T, Error>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + Clone + 'static,
    {
        let promise = Promise::new();
        self.submit(f, promise.clone());
        tokio::time::timeout(Duration::from_millis(timeout_ms), promise.wait())
            .await
            .map_err(|_| Error::new(ErrorKind::Timeout, "submit_and_wait deadline exceeded"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_resolves_the_promise() {
        let scheduler = Scheduler::new(2);
        let promise = Promise::new();
        scheduler.submit(|| 21 * 2, promise.clone());
        assert_eq!(promise.wait().await, 42);
    }

    #[tokio::test]
    async fn wait_all_reports_completion() {
        let scheduler = Scheduler::new(4);
        for _ in 0..5 {
            scheduler.submit(|| (), Promise::new());
        }
        assert_eq!(scheduler.wait_all(1_000).await, WaitOutcome::AllCompleted);
    }

    #[tokio::test]
    async fn submit_and_wait_returns_the_result() {
        let scheduler = Scheduler::new(1);
        let result = scheduler.submit_and_wait(|| "done".to_string(), 1_000).await.unwrap();
        assert_eq!(result, "done");
    }

    #[tokio::test]
    async fn submit_and_wait_times_out_on_a_slow_task() {
        let scheduler = Scheduler::new(1);
        let err = scheduler
            .submit_and_wait(
                || {
                    std::thread::sleep(Duration::from_millis(200));
                },
                10,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), reactor::error::ErrorKind::Timeout);
    }
}
