//! Caller contexts and completion handlers.
//!
//! # Design
//! A call finishes on a worker thread, but its handler must run wherever the
//! caller wants it to (a UI loop, a dedicated thread, or right there on the
//! worker). `CallerContext` is that seam. A context that has been torn down
//! hands the task back from `post`, and the outcome is dropped without being
//! delivered anywhere else.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::error::ClientError;
use crate::response::Response;

/// Unit of work posted to a caller context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The result of one call.
pub type Outcome = Result<Response, ClientError>;

pub trait CallerContext: Send + Sync {
    /// Schedule `task` on this context. Returns the task back if the context
    /// is gone.
    fn post(&self, task: Task) -> Result<(), Task>;
}

/// Runs handlers on the worker that completed the call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl CallerContext for Inline {
    fn post(&self, task: Task) -> Result<(), Task> {
        task();
        Ok(())
    }
}

/// A single-threaded queue drained by its owner, standing in for a UI loop.
///
/// Handlers posted through a `LoopHandle` run only inside `run_pending` or
/// `run_once`, on the thread that owns the loop. Dropping the loop tears the
/// context down.
pub struct EventLoop {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run every task that is already queued. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one task and run it.
    pub fn run_once(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Posting side of an `EventLoop`.
#[derive(Clone)]
pub struct LoopHandle {
    tx: Sender<Task>,
}

impl CallerContext for LoopHandle {
    fn post(&self, task: Task) -> Result<(), Task> {
        self.tx.send(task).map_err(|mpsc::SendError(task)| task)
    }
}

/// Success and failure continuations for one call. Exactly one of them runs,
/// at most once, which the by-value receiver enforces.
pub trait Handler: Send + 'static {
    fn on_success(self: Box<Self>, response: Response);

    fn on_failure(self: Box<Self>, error: ClientError);
}

impl<F> Handler for F
where
    F: FnOnce(Outcome) + Send + 'static,
{
    fn on_success(self: Box<Self>, response: Response) {
        (*self)(Ok(response))
    }

    fn on_failure(self: Box<Self>, error: ClientError) {
        (*self)(Err(error))
    }
}

/// A handler built from two separate closures.
pub struct Callbacks<S, E> {
    success: S,
    failure: E,
}

impl<S, E> Callbacks<S, E>
where
    S: FnOnce(Response) + Send + 'static,
    E: FnOnce(ClientError) + Send + 'static,
{
    pub fn new(success: S, failure: E) -> Self {
        Self { success, failure }
    }
}

impl<S, E> Handler for Callbacks<S, E>
where
    S: FnOnce(Response) + Send + 'static,
    E: FnOnce(ClientError) + Send + 'static,
{
    fn on_success(self: Box<Self>, response: Response) {
        (self.success)(response)
    }

    fn on_failure(self: Box<Self>, error: ClientError) {
        (self.failure)(error)
    }
}

pub(crate) fn complete(handler: Box<dyn Handler>, outcome: Outcome) {
    match outcome {
        Ok(response) => handler.on_success(response),
        Err(error) => handler.on_failure(error),
    }
}
