//! Cancellable units of work and their completion delivery.
//!
//! An `Operation` wraps an async closure and a completion. It is run at most
//! once, and its completion fires exactly once with one of `Success`,
//! `Failure` or `Cancelled`. Completions are handed to a `CallbackContext`
//! when one is bound, so callers observe results one at a time in the order
//! they were produced.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

/// Run-state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    NotStarted,
    Executing,
    Finished,
}

/// The single completion of an operation.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Success(T),
    Failure(E),
    /// Finished without a value and without an error.
    Cancelled,
}

impl<T, E> Outcome<T, E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// `None` for a cancelled operation.
    pub fn into_result(self) -> Option<Result<T, E>> {
        match self {
            Outcome::Success(value) => Some(Ok(value)),
            Outcome::Failure(err) => Some(Err(err)),
            Outcome::Cancelled => None,
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        }
    }
}

struct StatusInner {
    id: Uuid,
    label: String,
    state: Mutex<OperationState>,
    cancel: CancellationToken,
}

/// Cloneable view of an operation's run-state, usable after the operation
/// itself has been handed to a queue.
#[derive(Clone)]
pub struct OperationStatus {
    inner: Arc<StatusInner>,
}

impl OperationStatus {
    fn new(label: String) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                id: Uuid::new_v4(),
                label,
                state: Mutex::new(OperationState::NotStarted),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn state(&self) -> OperationState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_finished(&self) -> bool {
        self.state() == OperationState::Finished
    }

    /// Mark the operation cancelled. Work that already started keeps running.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await;
    }

    fn set_state(&self, state: OperationState) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl fmt::Debug for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationStatus")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type Work<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;
type Callback<T, E> = Box<dyn FnOnce(Outcome<T, E>) + Send>;

/// A cancellable unit of work with exactly one completion.
pub struct Operation<T, E> {
    status: OperationStatus,
    work: Work<T, E>,
    callback: Callback<T, E>,
    context: Option<CallbackContext>,
}

impl<T, E> Operation<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create an operation whose completion is passed to `on_complete`.
    pub fn new<F, Fut, C>(label: impl Into<String>, work: F, on_complete: C) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        C: FnOnce(Outcome<T, E>) + Send + 'static,
    {
        Self {
            status: OperationStatus::new(label.into()),
            work: Box::new(move || work().boxed()),
            callback: Box::new(on_complete),
            context: None,
        }
    }

    /// Create an operation whose completion resolves the returned handle.
    pub fn with_handle<F, Fut>(label: impl Into<String>, work: F) -> (Self, OperationHandle<T, E>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let op = Self::new(label, work, move |outcome| {
            let _ = tx.send(outcome);
        });
        let handle = OperationHandle {
            status: op.status.clone(),
            rx,
        };
        (op, handle)
    }

    /// Deliver the completion on `context` instead of the finishing thread.
    pub fn on_context(mut self, context: CallbackContext) -> Self {
        self.context = Some(context);
        self
    }

    pub(crate) fn bind(&mut self, context: &CallbackContext) {
        if self.context.is_none() {
            self.context = Some(context.clone());
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.status.clone()
    }

    pub fn cancel(&self) {
        self.status.cancel();
    }

    /// Execute the work unless the operation was cancelled first.
    pub async fn run(self) {
        if self.status.is_cancelled() {
            self.finish(Outcome::Cancelled);
            return;
        }

        let Operation {
            status,
            work,
            callback,
            context,
        } = self;
        status.set_state(OperationState::Executing);
        debug!(operation_id = %status.id(), label = status.label(), "operation executing");

        let outcome = Outcome::from(work().await);
        deliver(status, callback, context, outcome);
    }

    /// Finish without running, delivering `outcome`.
    pub fn finish(self, outcome: Outcome<T, E>) {
        deliver(self.status, self.callback, self.context, outcome);
    }
}

fn deliver<T, E>(
    status: OperationStatus,
    callback: Callback<T, E>,
    context: Option<CallbackContext>,
    outcome: Outcome<T, E>,
) where
    T: Send + 'static,
    E: Send + 'static,
{
    status.set_state(OperationState::Finished);
    debug!(
        operation_id = %status.id(),
        label = status.label(),
        cancelled = outcome.is_cancelled(),
        "operation finished"
    );
    match context {
        Some(context) => context.post(move || callback(outcome)),
        None => callback(outcome),
    }
}

impl<T, E> fmt::Debug for Operation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Future resolving to an operation's `Outcome`.
///
/// Resolves to `Cancelled` if the operation is dropped without finishing.
#[derive(Debug)]
pub struct OperationHandle<T, E> {
    status: OperationStatus,
    rx: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> OperationHandle<T, E> {
    pub fn status(&self) -> &OperationStatus {
        &self.status
    }
}

impl<T, E> Future for OperationHandle<T, E> {
    type Output = Outcome<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Outcome::Cancelled))
    }
}

type Delivery = Box<dyn FnOnce() + Send>;

/// A single task that runs completion closures one at a time, in order.
#[derive(Clone, Debug)]
pub struct CallbackContext {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl CallbackContext {
    /// Spawn the context task. Must be called from within a Tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                run_guarded(delivery);
            }
        });
        Self { tx }
    }

    /// Queue `f` on the context. Runs inline if the context task is gone.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(mpsc::error::SendError(delivery)) = self.tx.send(Box::new(f)) {
            run_guarded(delivery);
        }
    }
}

/// A panicking callback must not take the context task down with it.
fn run_guarded(delivery: Delivery) {
    if let Err(panic_info) = catch_unwind(AssertUnwindSafe(delivery)) {
        let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic_info.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        error!(panic_msg = %panic_msg, "completion callback panicked");
    }
}

/// Type-erased operation as stored by a queue.
pub(crate) trait Job: Send {
    fn status(&self) -> &OperationStatus;
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
    /// Finish as `Cancelled` without running.
    fn abandon(self: Box<Self>);
}

impl<T, E> Job for Operation<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn status(&self) -> &OperationStatus {
        &self.status
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        (*self).run().boxed()
    }

    fn abandon(self: Box<Self>) {
        self.status.cancel();
        (*self).finish(Outcome::Cancelled);
    }
}
