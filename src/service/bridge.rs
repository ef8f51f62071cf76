//! Blocking-to-async bridge
//!
//! Database calls block. [`AsyncBridge`] runs them on a dedicated tokio
//! runtime's blocking pool so the caller's thread (often an event loop)
//! never waits on the database, and hands back a [`PendingOperation`].
//!
//! The bridge is also where the two client signals callers must tell
//! apart are translated:
//! - `ClientError::SessionQueueEmpty` becomes `ServiceError::SessionUnavailable`
//! - `ClientError::Aborted` becomes `ServiceError::TransactionTimeout`
//!
//! Everything else passes through as `ServiceError::Client`.

use crate::config::BridgeSettings;
use crate::error::{ClientError, ClientResult, ServiceError, ServiceResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Executor for blocking database calls
pub struct AsyncBridge {
    name: String,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    closed: AtomicBool,
    in_flight: Arc<InFlight>,
    drain_timeout: Duration,
}

/// Count of scheduled calls that have not finished or been dropped
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard(Arc::clone(self))
    }

    fn pending(&self) -> usize {
        *self.count.lock()
    }

    /// Block until nothing is in flight; false if `timeout` ran out first
    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl AsyncBridge {
    /// Start the bridge's runtime.
    ///
    /// `blocking_threads` caps how many database calls run at once; calls
    /// beyond that queue until a thread frees up. The worker threads drive
    /// connection I/O for clients that use [`AsyncBridge::handle`].
    pub fn new(settings: &BridgeSettings) -> ServiceResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.worker_threads.max(1))
            .max_blocking_threads(settings.blocking_threads.max(1))
            .thread_keep_alive(settings.keep_alive())
            .thread_name(settings.thread_name.clone())
            .enable_all()
            .build()?;

        debug!(
            name = %settings.thread_name,
            workers = settings.worker_threads,
            blocking = settings.blocking_threads,
            "Started blocking bridge"
        );

        Ok(Self {
            name: settings.thread_name.clone(),
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            closed: AtomicBool::new(false),
            in_flight: Arc::new(InFlight::default()),
            drain_timeout: settings.drain_timeout(),
        })
    }

    /// Handle to the bridge's runtime, for clients that need to drive I/O
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Schedule `blocking_fn` on the blocking pool and return immediately.
    ///
    /// If the returned operation is cancelled before `blocking_fn` starts,
    /// it never runs. Once started it runs to completion; cancelling then
    /// discards the result.
    pub fn run_as_non_blocking<T, F>(&self, blocking_fn: F) -> PendingOperation<T>
    where
        F: FnOnce() -> ClientResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return PendingOperation::ready(Err(ServiceError::Closed));
        }
        // The guard is dropped with the closure, whether it ran or not.
        let guard = self.in_flight.enter();
        let join = self.handle.spawn_blocking(move || {
            let _guard = guard;
            blocking_fn().map_err(translate)
        });
        PendingOperation::running(join)
    }

    /// Number of scheduled calls that have not finished yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.pending()
    }

    /// Stop accepting work, wait up to `BridgeSettings::drain_timeout` for
    /// calls already scheduled, then stop the runtime. Calls still running
    /// after the timeout lose their connection I/O and fail.
    ///
    /// Blocks the calling thread while draining. Later calls are no-ops.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.in_flight.wait_idle(self.drain_timeout) {
            warn!(
                name = %self.name,
                pending = self.in_flight.pending(),
                timeout = ?self.drain_timeout,
                "Drain timed out, abandoning in-flight calls"
            );
        }
        self.stop_runtime();
    }

    fn stop_runtime(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            info!(name = %self.name, "Blocking bridge shut down");
        }
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        // Never drains. Drop may run inside async code, where blocking
        // is not allowed.
        self.closed.store(true, Ordering::Release);
        self.stop_runtime();
    }
}

impl fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBridge")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Map the two distinguished client signals to their service errors
pub(crate) fn translate(err: ClientError) -> ServiceError {
    match err {
        ClientError::SessionQueueEmpty(_) => {
            debug!(error = %err, "Session pool exhausted");
            ServiceError::SessionUnavailable(err)
        }
        ClientError::Aborted(_) => {
            debug!(error = %err, "Transaction retries exhausted");
            ServiceError::TransactionTimeout(err)
        }
        other => ServiceError::Client(other),
    }
}

/// Result of a call scheduled on the bridge.
///
/// Await it from async code, or call [`PendingOperation::wait`] from a
/// plain thread. Dropping it does not cancel the call.
#[must_use = "a pending operation does nothing useful unless awaited or waited on"]
pub struct PendingOperation<T> {
    state: State<T>,
    cancelled: AtomicBool,
}

enum State<T> {
    Running(JoinHandle<ServiceResult<T>>),
    Ready(Option<ServiceResult<T>>),
}

impl<T> PendingOperation<T> {
    fn running(join: JoinHandle<ServiceResult<T>>) -> Self {
        Self {
            state: State::Running(join),
            cancelled: AtomicBool::new(false),
        }
    }

    pub(crate) fn ready(result: ServiceResult<T>) -> Self {
        Self {
            state: State::Ready(Some(result)),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Cancel the call. It resolves to `ServiceError::Cancelled` unless it
    /// had already finished.
    pub fn cancel(&self) {
        if let State::Running(join) = &self.state {
            if !join.is_finished() {
                self.cancelled.store(true, Ordering::Release);
                join.abort();
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            State::Running(join) => join.is_finished(),
            State::Ready(_) => true,
        }
    }

    /// Block the current thread until the call completes
    pub fn wait(self) -> ServiceResult<T> {
        futures::executor::block_on(self)
    }
}

// The join handle is Unpin and a finished result is never pinned.
impl<T> Unpin for PendingOperation<T> {}

impl<T> Future for PendingOperation<T> {
    type Output = ServiceResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Running(join) => match Pin::new(join).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(_)) if this.cancelled.load(Ordering::Acquire) => {
                    Poll::Ready(Err(ServiceError::Cancelled))
                }
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                // A task is also cancelled when the runtime is shutting down
                Poll::Ready(Err(e)) if e.is_cancelled() => {
                    if this.cancelled.load(Ordering::Acquire) {
                        Poll::Ready(Err(ServiceError::Cancelled))
                    } else {
                        Poll::Ready(Err(ServiceError::Closed))
                    }
                }
                Poll::Ready(Err(e)) => std::panic::resume_unwind(e.into_panic()),
            },
            State::Ready(result) => Poll::Ready(
                result
                    .take()
                    .expect("PendingOperation polled after completion"),
            ),
        }
    }
}

impl<T> fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("finished", &self.is_finished())
            .finish()
    }
}
