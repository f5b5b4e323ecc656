//! Work queues with a concurrency bound and a suspend flag.
//!
//! # Design
//! Each `WorkQueue` owns a runner task that keeps the waiting operations in
//! FIFO order. The head starts only while the queue is resumed *and* a
//! concurrency permit is held; a queue bounded to one permit is therefore
//! strictly sequential. Cancelling any waiting operation, not just the head,
//! finishes it immediately as `Cancelled`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::select_all;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};
use uuid::Uuid;

use crate::operation::{Job, Operation, OperationStatus};

type Live = Arc<Mutex<HashMap<Uuid, OperationStatus>>>;

/// An ordered work list with an optional concurrency bound.
///
/// Dropping the queue cancels every operation it still holds.
#[derive(Debug)]
pub struct WorkQueue {
    name: String,
    max_concurrent: Option<usize>,
    tx: mpsc::UnboundedSender<Box<dyn Job>>,
    suspended: watch::Sender<bool>,
    live: Live,
}

impl WorkQueue {
    /// A queue running one operation at a time in submission order.
    pub fn sequential(name: impl Into<String>) -> Self {
        Self::with_limit(name, Some(1))
    }

    /// A queue with no concurrency bound and no ordering guarantee.
    pub fn concurrent(name: impl Into<String>) -> Self {
        Self::with_limit(name, None)
    }

    /// Spawn the runner task. Must be called from within a Tokio runtime.
    pub fn with_limit(name: impl Into<String>, max_concurrent: Option<usize>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let (suspended, suspended_rx) = watch::channel(false);
        let live: Live = Arc::new(Mutex::new(HashMap::new()));
        let limit = max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1))));

        tokio::spawn(drive(name.clone(), rx, suspended_rx, limit, live.clone()));
        debug!(queue = %name, ?max_concurrent, "queue started");

        Self {
            name,
            max_concurrent,
            tx,
            suspended,
            live,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent(&self) -> Option<usize> {
        self.max_concurrent
    }

    /// Append an operation to the queue.
    pub fn submit<T, E>(&self, op: Operation<T, E>) -> OperationStatus
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let status = op.status();
        lock(&self.live).insert(status.id(), status.clone());
        if let Err(mpsc::error::SendError(job)) = self.tx.send(Box::new(op)) {
            lock(&self.live).remove(&status.id());
            job.abandon();
        }
        status
    }

    /// Halt or resume dequeuing. Executing operations are unaffected.
    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.send_replace(suspended);
        debug!(queue = %self.name, suspended, "queue suspension changed");
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.borrow()
    }

    /// Mark every pending and executing operation cancelled.
    pub fn cancel_all(&self) {
        let live = lock(&self.live);
        for status in live.values() {
            status.cancel();
        }
        info!(queue = %self.name, operations = live.len(), "queue cancelled");
    }

    /// Operations submitted and not yet finished.
    pub fn operation_count(&self) -> usize {
        lock(&self.live).len()
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        for status in lock(&self.live).values() {
            status.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn drive(
    name: String,
    mut rx: mpsc::UnboundedReceiver<Box<dyn Job>>,
    mut suspended: watch::Receiver<bool>,
    limit: Option<Arc<Semaphore>>,
    live: Live,
) {
    let mut pending: VecDeque<Box<dyn Job>> = VecDeque::new();
    let mut open = true;

    loop {
        prune_cancelled(&mut pending, &live);
        if !open && pending.is_empty() {
            break;
        }

        tokio::select! {
            received = rx.recv(), if open => match received {
                Some(job) => pending.push_back(job),
                None => open = false,
            },
            () = any_cancelled(&pending) => {}
            permit = ready(&mut suspended, limit.as_ref()), if !pending.is_empty() => {
                if let Some(job) = pending.pop_front() {
                    start(job, permit, &live);
                }
            }
        }
    }
    debug!(queue = %name, "queue runner stopped");
}

/// Finish every cancelled job still waiting in `pending`, keeping the order
/// of the rest.
fn prune_cancelled(pending: &mut VecDeque<Box<dyn Job>>, live: &Live) {
    if !pending.iter().any(|job| job.status().is_cancelled()) {
        return;
    }
    let (cancelled, kept): (Vec<Box<dyn Job>>, Vec<Box<dyn Job>>) =
        pending.drain(..).partition(|job| job.status().is_cancelled());
    pending.extend(kept);
    for job in cancelled {
        lock(live).remove(&job.status().id());
        job.abandon();
    }
}

/// Resolves when any waiting job is cancelled.
fn any_cancelled(pending: &VecDeque<Box<dyn Job>>) -> impl std::future::Future<Output = ()> + Send + 'static {
    let statuses: Vec<OperationStatus> = pending.iter().map(|job| job.status().clone()).collect();
    async move {
        if statuses.is_empty() {
            return std::future::pending().await;
        }
        select_all(statuses.iter().map(|status| Box::pin(status.cancelled()))).await;
    }
}

/// Resolves once the queue is resumed and a permit is held at the same time.
///
/// A permit obtained while the queue was suspended in the meantime is handed
/// back and the wait starts over. A closed suspend channel counts as resumed.
async fn ready(
    suspended: &mut watch::Receiver<bool>,
    limit: Option<&Arc<Semaphore>>,
) -> Option<OwnedSemaphorePermit> {
    loop {
        while *suspended.borrow_and_update() {
            if suspended.changed().await.is_err() {
                break;
            }
        }
        let permit = match limit {
            Some(limit) => limit.clone().acquire_owned().await.ok(),
            None => None,
        };
        if !*suspended.borrow() || suspended.has_changed().is_err() {
            return permit;
        }
        drop(permit);
    }
}

fn start(job: Box<dyn Job>, permit: Option<OwnedSemaphorePermit>, live: &Live) {
    let id = job.status().id();
    if job.status().is_cancelled() {
        lock(live).remove(&id);
        job.abandon();
        return;
    }
    let live = live.clone();
    tokio::spawn(async move {
        job.run().await;
        lock(&live).remove(&id);
        drop(permit);
    });
}
