//! Routing of operations onto the sequential, concurrent and custom queues.
//!
//! # Design
//! The dispatcher owns two standing queues and a registry of named custom
//! queues. Every operation it accepts is bound to the dispatcher's
//! `CallbackContext`, so completions from all queues are observed one at a
//! time. A name maps to at most one queue: registering over an existing name
//! cancels and drops the previous occupant first.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::error::DispatchError;
use crate::operation::{CallbackContext, Operation, OperationStatus, Outcome};
use crate::queue::WorkQueue;

pub const SEQUENTIAL_QUEUE: &str = "sequential";
pub const CONCURRENT_QUEUE: &str = "concurrent";

/// Which queue an operation is submitted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueSelector {
    Sequential,
    Concurrent,
    Custom(String),
}

impl QueueSelector {
    pub fn custom(name: impl Into<String>) -> Self {
        QueueSelector::Custom(name.into())
    }
}

/// Dual-queue dispatcher with named custom queues.
#[derive(Debug)]
pub struct Dispatcher {
    sequential: WorkQueue,
    concurrent: WorkQueue,
    custom: Mutex<HashMap<String, WorkQueue>>,
    callbacks: CallbackContext,
}

impl Dispatcher {
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        Self::with_callback_context(CallbackContext::spawn())
    }

    pub fn with_callback_context(callbacks: CallbackContext) -> Self {
        Self {
            sequential: WorkQueue::sequential(SEQUENTIAL_QUEUE),
            concurrent: WorkQueue::concurrent(CONCURRENT_QUEUE),
            custom: Mutex::new(HashMap::new()),
            callbacks,
        }
    }

    pub fn callback_context(&self) -> &CallbackContext {
        &self.callbacks
    }

    /// Submit `op` to the selected queue.
    ///
    /// An unknown custom queue finishes the operation with
    /// `DispatchError::QueueNotFound` without enqueueing it.
    pub fn submit<T, E>(&self, mut op: Operation<T, E>, selector: QueueSelector) -> OperationStatus
    where
        T: Send + 'static,
        E: From<DispatchError> + Send + 'static,
    {
        op.bind(&self.callbacks);
        match selector {
            QueueSelector::Sequential => self.sequential.submit(op),
            QueueSelector::Concurrent => self.concurrent.submit(op),
            QueueSelector::Custom(name) => {
                let custom = self.custom();
                match custom.get(&name) {
                    Some(queue) => queue.submit(op),
                    None => {
                        warn!(queue = %name, "submit to unknown queue");
                        let status = op.status();
                        op.finish(Outcome::Failure(E::from(DispatchError::QueueNotFound(name))));
                        status
                    }
                }
            }
        }
    }

    /// Install `queue` under `name`, cancelling any previous occupant.
    pub fn register_queue(&self, name: impl Into<String>, queue: WorkQueue) {
        let name = name.into();
        let mut custom = self.custom();
        if let Some(previous) = custom.remove(&name) {
            previous.cancel_all();
            info!(queue = %name, "replaced custom queue");
        }
        custom.insert(name, queue);
    }

    /// Remove and cancel one custom queue. Returns whether it existed.
    pub fn cancel_queue(&self, name: &str) -> bool {
        let removed = self.custom().remove(name);
        match removed {
            Some(queue) => {
                queue.cancel_all();
                true
            }
            None => false,
        }
    }

    /// Suspend or resume every queue.
    pub fn suspend_all(&self, suspended: bool) {
        self.sequential.set_suspended(suspended);
        self.concurrent.set_suspended(suspended);
        for queue in self.custom().values() {
            queue.set_suspended(suspended);
        }
    }

    /// Cancel the work held by every queue.
    pub fn cancel_all(&self) {
        self.sequential.cancel_all();
        self.concurrent.cancel_all();
        for queue in self.custom().values() {
            queue.cancel_all();
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.custom().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.custom().contains_key(name)
    }

    fn custom(&self) -> MutexGuard<'_, HashMap<String, WorkQueue>> {
        self.custom.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
