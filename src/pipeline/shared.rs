//! Thread-safe dispatcher handle for drivers that submit and tick from different threads

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use arc_swap::ArcSwapOption;
use tracing::warn;

use super::dispatcher::{Dispatcher, DrainReport};
use super::{ConnectionId, ProcessedResult, ResultSink, SubmitOutcome};
use crate::error::{Error, Result, SinkError};
use crate::frame::Frame;
use crate::texture::TextureBackend;
use crate::PipelineConfig;

/// Cloneable handle around a locked [`Dispatcher`].
///
/// The sink runs while the lock is held. A call made from inside the sink on
/// the same thread fails with [`Error::ReentrantCall`] instead of deadlocking.
#[derive(Clone)]
pub struct SharedDispatcher {
    inner: Arc<Mutex<Dispatcher>>,
    delivering: Arc<ArcSwapOption<ThreadId>>,
}

struct GuardedSink<S> {
    inner: S,
    delivering: Arc<ArcSwapOption<ThreadId>>,
}

/// Clears the delivering marker even if the sink panics
struct DeliveryMark<'a>(&'a ArcSwapOption<ThreadId>);

impl Drop for DeliveryMark<'_> {
    fn drop(&mut self) {
        self.0.store(None);
    }
}

impl<S: ResultSink> ResultSink for GuardedSink<S> {
    fn deliver(&mut self, result: &ProcessedResult<'_>) -> std::result::Result<(), SinkError> {
        self.delivering.store(Some(Arc::new(thread::current().id())));
        let _mark = DeliveryMark(&self.delivering);
        self.inner.deliver(result)
    }
}

impl SharedDispatcher {
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn TextureBackend>,
        sink: impl ResultSink + 'static,
    ) -> Result<Self> {
        let delivering = Arc::new(ArcSwapOption::empty());
        let sink = GuardedSink {
            inner: sink,
            delivering: delivering.clone(),
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(Dispatcher::new(config, backend, sink)?)),
            delivering,
        })
    }

    fn lock(&self, operation: &'static str, connection: Option<&ConnectionId>) -> Result<MutexGuard<'_, Dispatcher>> {
        let current = self.delivering.load();
        if current.as_deref() == Some(&thread::current().id()) {
            warn!(operation, connection = ?connection, "reentrant dispatcher call from result sink");
            return Err(Error::ReentrantCall {
                operation,
                connection: connection.cloned(),
            });
        }
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn submit(&self, id: impl Into<ConnectionId>, frame: Frame) -> Result<SubmitOutcome> {
        let id = id.into();
        let mut dispatcher = self.lock("submit", Some(&id))?;
        dispatcher.submit(id, frame)
    }

    pub fn drain_all(&self) -> Result<DrainReport> {
        Ok(self.lock("drain_all", None)?.drain_all())
    }

    pub fn tick(&self) -> Result<DrainReport> {
        Ok(self.lock("tick", None)?.tick())
    }

    pub fn teardown(&self, id: &ConnectionId) -> Result<bool> {
        Ok(self.lock("teardown", Some(id))?.teardown(id))
    }

    pub fn teardown_all(&self) -> Result<()> {
        self.lock("teardown_all", None)?.teardown_all();
        Ok(())
    }

    /// Run `f` with the dispatcher locked, e.g. to read delivered results
    pub fn with<R>(&self, f: impl FnOnce(&mut Dispatcher) -> R) -> Result<R> {
        let mut dispatcher = self.lock("with", None)?;
        Ok(f(&mut dispatcher))
    }
}

impl std::fmt::Debug for SharedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDispatcher").finish_non_exhaustive()
    }
}
