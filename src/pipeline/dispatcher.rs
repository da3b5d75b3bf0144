//! Routes frames to per-connection pipelines, creating them on first use

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use super::connection::ConnectionPipeline;
use super::stats::{Counters, DispatcherStats};
use super::{ConnectionId, ProcessedResult, ResultSink, SubmitOutcome};
use crate::convert::{Executor, StrategySelector, WorkerPool};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::texture::TextureBackend;
use crate::PipelineConfig;

/// Outcome of draining in-flight conversions
#[derive(Debug, Default)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: Vec<(ConnectionId, Error)>,
}

/// Connection table: an arena of pipeline slots plus an id → slot index.
pub struct Dispatcher {
    config: PipelineConfig,
    backend: Arc<dyn TextureBackend>,
    selector: StrategySelector,
    slots: Vec<Option<ConnectionPipeline>>,
    free: Vec<usize>,
    index: HashMap<ConnectionId, usize>,
    sink: Box<dyn ResultSink>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn TextureBackend>,
        sink: impl ResultSink + 'static,
    ) -> Result<Self> {
        config.validate()?;

        let executor = if config.deferred_mode {
            Executor::Deferred(Arc::new(WorkerPool::new(config.worker_threads)?))
        } else {
            Executor::Inline
        };
        info!(
            backend = backend.name(),
            deferred = config.deferred_mode,
            policy = ?config.overload_policy,
            pool_depth = config.pool_depth,
            "dispatcher ready"
        );

        Ok(Self {
            selector: StrategySelector::new(backend.clone(), executor),
            config,
            backend,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            sink: Box::new(sink),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_deferred(&self) -> bool {
        self.config.deferred_mode
    }

    /// Route `frame` to its connection's pipeline
    pub fn submit(&mut self, id: impl Into<ConnectionId>, frame: Frame) -> Result<SubmitOutcome> {
        self.submit_to(id.into(), frame)
    }

    #[instrument(level = "debug", skip(self, frame), fields(connection = %id, sequence = frame.sequence()))]
    fn submit_to(&mut self, id: ConnectionId, frame: Frame) -> Result<SubmitOutcome> {
        let slot = self.slot_for(id);
        let pipeline = self.slots[slot].as_mut().expect("slot_for fills the slot it returns");
        pipeline.submit(frame, self.sink.as_mut())
    }

    fn slot_for(&mut self, id: ConnectionId) -> usize {
        if let Some(&slot) = self.index.get(&id) {
            return slot;
        }

        let pipeline = ConnectionPipeline::new(
            id.clone(),
            &self.config,
            self.selector.clone(),
            self.backend.clone(),
            self.counters.clone(),
        );
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(pipeline);
                slot
            }
            None => {
                self.slots.push(Some(pipeline));
                self.slots.len() - 1
            }
        };
        info!(connection = %id, slot, "pipeline created");
        self.index.insert(id, slot);
        slot
    }

    /// Force completion of every busy pipeline, delivering each result
    #[instrument(level = "debug", skip(self))]
    pub fn drain_all(&mut self) -> DrainReport {
        self.drain(false)
    }

    /// Like [`Dispatcher::drain_all`] but skips conversions that are still running
    pub fn drain_ready(&mut self) -> DrainReport {
        self.drain(true)
    }

    fn drain(&mut self, only_ready: bool) -> DrainReport {
        let mut report = DrainReport::default();
        for pipeline in self.slots.iter_mut().flatten() {
            if !pipeline.is_busy() {
                continue;
            }
            let completed = if only_ready {
                pipeline.complete_if_ready(self.sink.as_mut())
            } else {
                pipeline.complete(self.sink.as_mut())
            };
            match completed {
                Ok(true) => report.delivered += 1,
                Ok(false) => {}
                Err(e) => report.failed.push((pipeline.id().clone(), e)),
            }
        }
        if !report.failed.is_empty() {
            error!(failed = report.failed.len(), "some conversions failed while draining");
        }
        report
    }

    /// Periodic driver hook: drains in deferred mode, no-op otherwise
    pub fn tick(&mut self) -> DrainReport {
        if self.config.deferred_mode {
            self.drain_all()
        } else {
            DrainReport::default()
        }
    }

    /// Remove one connection and release its textures. Unknown ids are ignored.
    pub fn teardown(&mut self, id: &ConnectionId) -> bool {
        let Some(slot) = self.index.remove(id) else {
            debug!(connection = %id, "teardown of unknown connection");
            return false;
        };
        if let Some(mut pipeline) = self.slots[slot].take() {
            pipeline.release();
        }
        self.free.push(slot);
        info!(connection = %id, "pipeline torn down");
        true
    }

    /// Release every pipeline. Safe to call repeatedly.
    pub fn teardown_all(&mut self) {
        let count = self.index.len();
        for mut pipeline in self.slots.drain(..).flatten() {
            pipeline.release();
        }
        self.index.clear();
        self.free.clear();
        if count > 0 {
            info!(connections = count, "all pipelines torn down");
        }
    }

    pub fn pipeline(&self, id: &ConnectionId) -> Option<&ConnectionPipeline> {
        let slot = *self.index.get(id)?;
        self.slots.get(slot)?.as_ref()
    }

    /// Latest result for a connection, for render-time lookups
    pub fn delivered(&self, id: &ConnectionId) -> Option<ProcessedResult<'_>> {
        self.pipeline(id)?.delivered()
    }

    pub fn connection_count(&self) -> usize {
        self.index.len()
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionId> {
        self.index.keys()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Pipelines go before the worker pool they may still be waiting on
        self.teardown_all();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .field("connections", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelFormat, Plane};
    use crate::pipeline::sink_fn;
    use crate::texture::HostBackend;

    fn rgb(seq: u64) -> Frame {
        Frame::packed(PixelFormat::Rgb24, 2, 2, Plane::new(vec![1u8; 12], 6))
            .unwrap()
            .with_sequence(seq)
    }

    #[test]
    fn slots_are_reused_after_teardown() {
        let backend = Arc::new(HostBackend::new());
        let mut d = Dispatcher::new(PipelineConfig::default(), backend, sink_fn(|_| Ok(()))).unwrap();

        d.submit("a", rgb(1)).unwrap();
        d.submit("b", rgb(1)).unwrap();
        assert_eq!(d.slots.len(), 2);

        assert!(d.teardown(&ConnectionId::from("a")));
        d.submit("c", rgb(1)).unwrap();
        assert_eq!(d.slots.len(), 2);
        assert_eq!(d.connection_count(), 2);
    }

    #[test]
    fn teardown_all_is_idempotent() {
        let backend = Arc::new(HostBackend::new());
        let mut d = Dispatcher::new(PipelineConfig::default(), backend.clone(), sink_fn(|_| Ok(()))).unwrap();
        d.teardown_all();
        d.submit("a", rgb(1)).unwrap();
        d.teardown_all();
        d.teardown_all();
        assert_eq!(d.connection_count(), 0);
        assert_eq!(backend.live(), 0);
        assert!(!d.teardown(&ConnectionId::from("a")));
    }

    #[test]
    fn tick_is_a_noop_inline() {
        let backend = Arc::new(HostBackend::new());
        let mut d = Dispatcher::new(PipelineConfig::default(), backend, sink_fn(|_| Ok(()))).unwrap();
        d.submit("a", rgb(1)).unwrap();
        let report = d.tick();
        assert_eq!(report.delivered, 0);
        assert!(report.failed.is_empty());
        assert_eq!(d.stats().delivered, 1);
    }
}
