//! Serial execution contexts
//!
//! A `SerialQueue` runs submitted jobs one at a time, in submission order,
//! on a dedicated named thread.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// FIFO execution context backed by one OS thread
///
/// The thread exits once the queue is dropped and every pending job has
/// run. Dropping never joins, so the last owner may drop the queue from
/// inside one of its own jobs.
pub struct SerialQueue {
    label: String,
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> io::Result<Self> {
        let label = label.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let thread_label = label.clone();
        thread::Builder::new().name(label.clone()).spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("Job panicked on queue {}", thread_label);
                }
            }
        })?;

        Ok(Self { label, tx })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Submit a job. Returns false if the queue thread is gone.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Block until every job submitted before this call has run.
    ///
    /// Must not be called from a job running on this queue.
    pub fn flush(&self) {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        if self.execute(move || {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.recv();
        }
    }
}
