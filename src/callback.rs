//! Execution contexts for terminal callbacks
//!
//! A transcode finishes on a background worker; the caller chooses where its
//! completion runs:
//! - a tokio runtime `Handle` runs it on the runtime's blocking pool
//! - a `MainQueue` hands it to whichever thread drains the matching
//!   `MainQueueReceiver` (typically a UI thread), one job at a time
//! - `Immediate` runs it on the notifying worker itself

use std::sync::Arc;

use tokio::sync::mpsc;

/// A unit of work dispatched to a callback context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where terminal callbacks are run
pub trait CallbackContext: Send + Sync + 'static {
    /// Hand `job` to this context to run.
    fn dispatch(&self, job: Job);
}

impl CallbackContext for tokio::runtime::Handle {
    fn dispatch(&self, job: Job) {
        drop(self.spawn_blocking(job));
    }
}

impl<C: CallbackContext + ?Sized> CallbackContext for Arc<C> {
    fn dispatch(&self, job: Job) {
        (**self).dispatch(job)
    }
}

/// Runs jobs on the dispatching thread
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl CallbackContext for Immediate {
    fn dispatch(&self, job: Job) {
        job()
    }
}

/// Serial queue drained by the embedding application
#[derive(Clone)]
pub struct MainQueue {
    tx: mpsc::UnboundedSender<Job>,
}

/// Draining side of a `MainQueue`
pub struct MainQueueReceiver {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl MainQueue {
    pub fn new() -> (Self, MainQueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MainQueueReceiver { rx })
    }
}

impl CallbackContext for MainQueue {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::warn!("main queue receiver dropped; callback discarded");
        }
    }
}

impl MainQueueReceiver {
    /// Run every job queued so far. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait for the next job and run it. `false` once every `MainQueue`
    /// handle has been dropped and the queue is empty.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Blocking variant of `run_next` for threads outside the runtime.
    pub fn run_next_blocking(&mut self) -> bool {
        match self.rx.blocking_recv() {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}
