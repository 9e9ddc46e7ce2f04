//! Worker pool and call lifecycle.
//!
//! # Design
//! Each started call becomes one tokio task. The task first waits for one of
//! `workers` slots, then moves the blocking round trip onto the runtime's
//! blocking pool and races it against `tokio::time::timeout`. The deadline
//! starts once the slot is taken, so time spent queued behind other calls does
//! not count against it. The slot travels with the blocking job and is freed
//! when the round trip returns; the transport enforces the same deadline on
//! the socket.
//!
//! Delivery goes through a per-call state cell. The handler runs only if the
//! cell moves from `PENDING` to `DELIVERED`; `CallHandle::cancel` moves it to
//! `CANCELLED` instead. The transition happens on the caller's context right
//! before the handler runs, so a cancel issued from that context always wins
//! over a delivery that has not started yet. A blocking job that finds its
//! call no longer pending skips the round trip.
//!
//! If the task is dropped before it delivers (the client was dropped and the
//! runtime shut down), `Delivery` fails the call with a shutdown error so a
//! started call still gets its one outcome.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::context::{self, CallerContext, Handler, Outcome};
use crate::error::{ClientError, ClientResult};

const PENDING: u8 = 0;
const DELIVERED: u8 = 1;
const CANCELLED: u8 = 2;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Owns the runtime that executes calls.
pub(crate) struct Dispatcher {
    runtime: Option<Runtime>,
    slots: Arc<Semaphore>,
}

impl Dispatcher {
    pub(crate) fn new(workers: usize) -> ClientResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .max_blocking_threads(workers)
            .thread_name("gridmi-worker")
            .enable_time()
            .build()
            .map_err(ClientError::Startup)?;
        Ok(Self {
            runtime: Some(runtime),
            slots: Arc::new(Semaphore::new(workers)),
        })
    }

    /// Run `work` off the caller's thread and deliver its outcome to `handler`
    /// through `context`.
    pub(crate) fn submit<W>(
        &self,
        work: W,
        timeout: Duration,
        context: Arc<dyn CallerContext>,
        handler: Box<dyn Handler>,
    ) -> CallHandle
    where
        W: FnOnce() -> Outcome + Send + 'static,
    {
        let state = Arc::new(CallState::new());
        let handle = CallHandle {
            state: state.clone(),
            abort: None,
        };
        let delivery = Delivery {
            context,
            state: state.clone(),
            handler: Some(handler),
        };
        let Some(runtime) = self.runtime.as_ref() else {
            // Only reachable while the dispatcher is being dropped.
            delivery.finish(Err(shutdown_error()));
            return handle;
        };

        let id = state.id;
        let slots = self.slots.clone();
        debug!(call = id, "dispatching");
        let task = runtime.spawn(async move {
            let outcome = run(work, timeout, slots, state).await;
            debug!(call = id, ok = outcome.is_ok(), "call finished");
            delivery.finish(outcome);
        });

        CallHandle {
            abort: Some(task.abort_handle()),
            ..handle
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Non-blocking, so a client may be dropped from inside a handler.
            runtime.shutdown_background();
        }
    }
}

async fn run<W>(work: W, timeout: Duration, slots: Arc<Semaphore>, state: Arc<CallState>) -> Outcome
where
    W: FnOnce() -> Outcome + Send + 'static,
{
    let Ok(slot) = slots.acquire_owned().await else {
        return Err(shutdown_error());
    };
    let blocking = tokio::task::spawn_blocking(move || {
        let _slot = slot;
        if !state.is_pending() {
            debug!(call = state.id, "call was cancelled before it ran");
            return Err(cancelled_error());
        }
        work()
    });
    let abort = blocking.abort_handle();
    match tokio::time::timeout(timeout, blocking).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => {
            warn!(error = %join_error, "worker failed before completing the call");
            Err(ClientError::network(format!("worker failed: {join_error}")))
        }
        Err(_elapsed) => {
            // Stops the job if no thread has picked it up yet.
            abort.abort();
            Err(ClientError::Timeout(timeout))
        }
    }
}

/// The not-yet-delivered half of a call. Dropping it undelivered fails the
/// call with a shutdown error.
struct Delivery {
    context: Arc<dyn CallerContext>,
    state: Arc<CallState>,
    handler: Option<Box<dyn Handler>>,
}

impl Delivery {
    fn finish(mut self, outcome: Outcome) {
        if let Some(handler) = self.handler.take() {
            deliver(self.context.as_ref(), self.state.clone(), handler, outcome);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        let Some(handler) = self.handler.take() else {
            return;
        };
        if self.state.is_pending() {
            debug!(call = self.state.id, "call dropped before completing");
            deliver(
                self.context.as_ref(),
                self.state.clone(),
                handler,
                Err(shutdown_error()),
            );
        }
    }
}

fn deliver(
    context: &dyn CallerContext,
    state: Arc<CallState>,
    handler: Box<dyn Handler>,
    outcome: Outcome,
) {
    let id = state.id;
    let task = Box::new(move || {
        if state.finish() {
            context::complete(handler, outcome);
        } else {
            debug!(call = state.id, "call was cancelled, dropping outcome");
        }
    });
    if context.post(task).is_err() {
        debug!(call = id, "caller context is gone, dropping outcome");
    }
}

fn shutdown_error() -> ClientError {
    ClientError::network("client is shutting down")
}

fn cancelled_error() -> ClientError {
    ClientError::network("call was cancelled")
}

struct CallState {
    id: u64,
    phase: AtomicU8,
}

impl CallState {
    fn new() -> Self {
        Self {
            id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
            phase: AtomicU8::new(PENDING),
        }
    }

    fn finish(&self) -> bool {
        self.transition(DELIVERED)
    }

    fn cancel(&self) -> bool {
        self.transition(CANCELLED)
    }

    fn transition(&self, to: u8) -> bool {
        self.phase
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn phase(&self) -> u8 {
        self.phase.load(Ordering::Acquire)
    }

    fn is_pending(&self) -> bool {
        self.phase() == PENDING
    }
}

/// Handle to a started call.
pub struct CallHandle {
    state: Arc<CallState>,
    abort: Option<AbortHandle>,
}

impl CallHandle {
    /// Process-unique id, matching the `call` field in log events.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Prevent delivery. Returns `false` if the handler already ran (or the
    /// call was already cancelled).
    pub fn cancel(&self) -> bool {
        let cancelled = self.state.cancel();
        if cancelled {
            if let Some(abort) = &self.abort {
                abort.abort();
            }
            debug!(call = self.state.id, "cancelled");
        }
        cancelled
    }

    /// Whether the handler has run.
    pub fn is_delivered(&self) -> bool {
        self.state.phase() == DELIVERED
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.phase() == CANCELLED
    }

    /// Delivered or cancelled.
    pub fn is_finished(&self) -> bool {
        self.state.phase() != PENDING
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("id", &self.state.id)
            .field("phase", &self.state.phase())
            .finish()
    }
}
