//! Background conversion workers for deferred mode

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use tracing::{debug, error};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named threads pulling conversion jobs off a shared channel
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let (tx, rx) = flume::unbounded::<Job>();

        let handles = (0..threads.max(1))
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("frameflow-convert-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            // A panicking job drops its result sender; the waiter sees WorkerGone
                            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!("conversion job panicked");
                            }
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        debug!(threads = handles.len(), "conversion workers started");
        Ok(Self {
            tx: Some(tx),
            handles,
        })
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Queue `work` and return a handle to its eventual output
    pub fn spawn<T, F>(&self, work: F) -> Result<Pending<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (done_tx, done_rx) = flume::bounded(1);
        let job: Job = Box::new(move || {
            let _ = done_tx.send(work());
        });
        self.tx
            .as_ref()
            .ok_or(Error::WorkerGone)?
            .send(job)
            .map_err(|_| Error::WorkerGone)?;
        Ok(Pending::Waiting(done_rx))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets every worker fall out of its loop
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.handles.len())
            .finish()
    }
}

/// Output of a conversion job that may still be running
pub enum Pending<T> {
    Ready(T),
    Waiting(Receiver<T>),
}

impl<T> Pending<T> {
    /// Non-blocking poll
    pub fn is_done(&self) -> bool {
        match self {
            Pending::Ready(_) => true,
            Pending::Waiting(rx) => !rx.is_empty() || rx.is_disconnected(),
        }
    }

    /// Block until the job has finished
    pub fn wait(self) -> Result<T> {
        match self {
            Pending::Ready(value) => Ok(value),
            Pending::Waiting(rx) => rx.recv().map_err(|_| Error::WorkerGone),
        }
    }
}

/// Where a strategy runs its conversion work
#[derive(Debug, Clone)]
pub enum Executor {
    /// On the calling thread, before `convert` returns
    Inline,
    Deferred(Arc<WorkerPool>),
}

impl Executor {
    pub fn run<T, F>(&self, work: F) -> Result<Pending<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        match self {
            Executor::Inline => Ok(Pending::Ready(work())),
            Executor::Deferred(pool) => pool.spawn(work),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Executor::Deferred(_))
    }
}
