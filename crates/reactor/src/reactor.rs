//! The reactor: a single-threaded event loop every other component binds to.
//!
//! A libuv-style event loop built on a `tokio` current-thread runtime
//! instead of a raw callback queue. The runtime drives exactly one OS
//! thread, so every state machine bound to it (transport, bus, pending
//! table) only ever runs there — with one documented exception, the
//! INPROC registry (`transport::inproc`), which is process-wide by design
//! and therefore `Arc`/`Mutex`-guarded rather than reactor-local. Because
//! of that exception, every callback type in this runtime is `Send +
//! Sync`: tasks are spawned with `tokio::spawn`, not `spawn_local`, even
//! though in practice only INPROC ever calls one from a thread other than
//! the reactor's own.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::error::{Error, ErrorKind};

/// Owns the event loop. Create one per logical reactor instance; every
/// transport, bus, and RPC endpoint bound to it must be driven from calls
/// into this struct's methods.
pub struct Reactor {
    rt: Runtime,
}

impl Reactor {
    pub fn new() -> Result<Self, Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::with_source(ErrorKind::NoMemory, "failed to build reactor runtime", e))?;
        Ok(Self { rt })
    }

    /// A cloneable handle usable from worker threads (the async
    /// scheduler's one sanctioned cross-thread surface).
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle { inner: Arc::new(self.rt.handle().clone()) }
    }

    /// Spawn a task onto this reactor's runtime. Must be called from
    /// inside `block_on` (or any task already running on it) — `tokio`
    /// panics otherwise.
    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.rt.spawn(fut)
    }

    /// Drive the reactor, running `fut` to completion alongside every
    /// previously spawned task. This is the only way the reactor thread
    /// blocks: spinning the event loop, never a kernel-level block.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }

    /// Convenience used by `call_sync`/`wait_all`-style wrappers: drive the
    /// reactor until `fut` resolves or `timeout` elapses.
    pub fn block_on_timeout<F: Future>(&self, timeout: std::time::Duration, fut: F) -> Result<F::Output, Error> {
        self.block_on(async move {
            tokio::time::timeout(timeout, fut).await.map_err(|_| Error::new(ErrorKind::Timeout, "deadline exceeded"))
        })
    }
}

/// A `Send + Sync` reference to a reactor, usable to schedule work back
/// onto it from another thread (see `scheduler::Scheduler`) or simply as a
/// cheap-to-clone spawn handle passed around the reactor thread itself.
#[derive(Clone)]
pub struct ReactorHandle {
    inner: Arc<tokio::runtime::Handle>,
}

impl ReactorHandle {
    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.spawn(fut)
    }
}
