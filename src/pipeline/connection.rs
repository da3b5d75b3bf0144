//! Busy/complete state machine for one connection

use std::mem;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use super::pool::ResourcePool;
use super::stats::Counters;
use super::{ConnectionId, OverloadPolicy, ProcessedResult, ResultSink, SubmitOutcome};
use crate::convert::{ConversionStrategy, MaterialTag, StrategyId, StrategyKind, StrategySelector};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameMetadata};
use crate::texture::{OutputTexture, TextureBackend};
use crate::PipelineConfig;

enum Stage {
    Idle,
    /// Between `convert` and the consumption of its completion
    Busy(Frame),
}

/// The texture referenced by the latest processed result
struct Delivered {
    texture: OutputTexture,
    material: Option<MaterialTag>,
    meta: Arc<FrameMetadata>,
    timestamp: Instant,
}

/// Owns one connection's strategy, texture pool and in-flight conversion
pub struct ConnectionPipeline {
    id: ConnectionId,
    selector: StrategySelector,
    backend: Arc<dyn TextureBackend>,
    strategy: Option<Box<dyn ConversionStrategy>>,
    stage: Stage,
    delivered: Option<Delivered>,
    pool: ResourcePool,
    policy: OverloadPolicy,
    deferred: bool,
    counters: Arc<Counters>,
}

impl ConnectionPipeline {
    pub fn new(
        id: ConnectionId,
        config: &PipelineConfig,
        selector: StrategySelector,
        backend: Arc<dyn TextureBackend>,
        counters: Arc<Counters>,
    ) -> Self {
        let pool = ResourcePool::new(config.pool_depth, backend.clone(), id.clone(), counters.clone());
        Self {
            id,
            deferred: selector.executor().is_deferred(),
            selector,
            backend,
            strategy: None,
            stage: Stage::Idle,
            delivered: None,
            pool,
            policy: config.overload_policy,
            counters,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.stage, Stage::Busy(_))
    }

    pub fn strategy_id(&self) -> Option<StrategyId> {
        self.strategy.as_ref().map(|s| s.id())
    }

    pub fn strategy_kind(&self) -> Option<StrategyKind> {
        self.strategy.as_ref().map(|s| s.kind())
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Latest processed result, if any frame has been delivered
    pub fn delivered(&self) -> Option<ProcessedResult<'_>> {
        self.delivered.as_ref().map(|d| ProcessedResult {
            connection: &self.id,
            texture: &d.texture,
            material: d.material,
            width: d.meta.width,
            height: d.meta.height,
            sequence: d.meta.sequence,
            timestamp: d.timestamp,
            device_timestamp: d.meta.device_timestamp,
        })
    }

    /// Accept a frame. Results produced along the way go to `sink`.
    pub fn submit(&mut self, frame: Frame, sink: &mut dyn ResultSink) -> Result<SubmitOutcome> {
        self.counters.record_submitted();

        if self.is_busy() {
            match self.policy {
                OverloadPolicy::Drop => {
                    debug!(connection = %self.id, sequence = frame.sequence(), "pipeline busy, dropping frame");
                    frame.dispose();
                    self.counters.record_dropped();
                    return Ok(SubmitOutcome::Dropped);
                }
                OverloadPolicy::ForceComplete => {
                    debug!(connection = %self.id, "pipeline busy, forcing completion");
                    // The failure is already logged and counted; the new frame still starts
                    let _ = self.complete(sink);
                }
            }
        }

        if let Err(e) = self.start(&frame) {
            if matches!(e, Error::InvalidInput { .. }) {
                self.counters.record_invalid_input();
            }
            warn!(connection = %self.id, error = %e, "frame rejected");
            frame.dispose();
            return Err(e);
        }
        self.stage = Stage::Busy(frame);

        if self.deferred {
            return Ok(SubmitOutcome::Started);
        }
        self.complete(sink)?;
        Ok(SubmitOutcome::Delivered)
    }

    /// Select a strategy, allocate a target and begin converting
    fn start(&mut self, frame: &Frame) -> Result<()> {
        let (format, layout) = (frame.format(), frame.layout());

        if let Some(next) = self.selector.select(frame, self.strategy.as_deref())? {
            if let Some(mut previous) = self.strategy.replace(next) {
                debug!(
                    connection = %self.id,
                    from = %previous.kind(),
                    to = ?self.strategy_kind(),
                    "conversion strategy changed"
                );
                previous.dispose();
            }
        }

        let Some(strategy) = self.strategy.as_mut() else {
            return Err(Error::InvalidInput { format, layout });
        };
        if !strategy.is_valid_input(frame) {
            error!(connection = %self.id, strategy = %strategy.kind(), ?format, ?layout, "strategy rejects selected input");
            return Err(Error::StrategyMismatch {
                strategy: strategy.kind().name(),
                format,
                layout,
            });
        }

        let target = strategy.allocate(frame, self.pool.take_reusable())?;
        strategy.convert(frame, target)
    }

    /// Force the in-flight conversion to finish and deliver it.
    ///
    /// Returns `false` when the pipeline was idle.
    pub fn complete(&mut self, sink: &mut dyn ResultSink) -> Result<bool> {
        let Stage::Busy(frame) = mem::replace(&mut self.stage, Stage::Idle) else {
            return Ok(false);
        };

        let outcome = match self.strategy.as_mut() {
            Some(strategy) => strategy.complete().map(|texture| (texture, strategy.material())),
            None => Err(Error::NotConverting),
        };

        let (texture, material) = match outcome {
            Ok(done) => done,
            Err(e) => {
                error!(connection = %self.id, sequence = frame.sequence(), error = %e, "conversion failed");
                self.counters.record_failed();
                frame.dispose();
                if let Some(mut strategy) = self.strategy.take() {
                    if let Some(texture) = strategy.take_recovered() {
                        self.pool.retire(texture);
                    }
                    strategy.dispose();
                }
                return Err(e);
            }
        };

        let latency = frame.timestamp.elapsed();
        let next = Delivered {
            texture,
            material,
            meta: frame.meta.clone(),
            timestamp: frame.timestamp,
        };
        if let Some(previous) = self.delivered.replace(next) {
            self.pool.retire(previous.texture);
        }
        frame.dispose();

        metrics::histogram!("frameflow_frame_latency_ms").record(latency.as_secs_f64() * 1000.0);
        self.counters.record_delivered();
        self.deliver(sink);
        Ok(true)
    }

    /// Complete only when the strategy reports its work finished
    pub fn complete_if_ready(&mut self, sink: &mut dyn ResultSink) -> Result<bool> {
        let ready = self.is_busy() && self.strategy.as_ref().map_or(true, |s| s.is_done());
        if !ready {
            return Ok(false);
        }
        self.complete(sink)
    }

    fn deliver(&mut self, sink: &mut dyn ResultSink) {
        let Some(result) = self.delivered() else {
            return;
        };
        if let Err(source) = sink.deliver(&result) {
            let err = Error::CallbackFailure {
                connection: self.id.clone(),
                source,
            };
            warn!(error = %err, "result sink failed");
            self.counters.record_callback_failure();
        }
    }

    /// Finish any in-flight work and destroy every texture this pipeline owns
    pub fn release(&mut self) {
        if let Stage::Busy(frame) = mem::replace(&mut self.stage, Stage::Idle) {
            if let Some(strategy) = self.strategy.as_mut() {
                match strategy.complete() {
                    Ok(texture) => self.backend.destroy(texture),
                    Err(e) => warn!(connection = %self.id, error = %e, "in-flight conversion failed during teardown"),
                }
            }
            frame.dispose();
        }
        if let Some(mut strategy) = self.strategy.take() {
            strategy.dispose();
        }
        if let Some(delivered) = self.delivered.take() {
            self.backend.destroy(delivered.texture);
        }
        self.pool.clear();
    }
}

impl Drop for ConnectionPipeline {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ConnectionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPipeline")
            .field("id", &self.id)
            .field("strategy", &self.strategy_kind())
            .field("busy", &self.is_busy())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{Executor, WorkerPool};
    use crate::error::SinkError;
    use crate::frame::{NativeHandle, PixelFormat, Plane};
    use crate::pipeline::sink_fn;
    use crate::texture::{HostBackend, TextureId};

    fn pipeline(config: PipelineConfig) -> (ConnectionPipeline, Arc<HostBackend>) {
        let backend = Arc::new(HostBackend::new());
        let selector = StrategySelector::new(backend.clone(), Executor::Inline);
        let pipeline = ConnectionPipeline::new(
            ConnectionId::from("peer-1"),
            &config,
            selector,
            backend.clone(),
            Arc::new(Counters::default()),
        );
        (pipeline, backend)
    }

    fn bgra(seq: u64) -> Frame {
        Frame::packed(PixelFormat::Bgra, 4, 2, Plane::new(vec![seq as u8; 32], 16))
            .unwrap()
            .with_sequence(seq)
    }

    #[test]
    fn inline_submit_delivers_before_returning() {
        let (mut p, _backend) = pipeline(PipelineConfig::default());
        let mut seen = Vec::new();
        let mut sink = sink_fn(|r| {
            seen.push((r.sequence, r.texture.id()));
            Ok(())
        });

        assert_eq!(p.submit(bgra(1), &mut sink).unwrap(), SubmitOutcome::Delivered);
        assert!(!p.is_busy());
        drop(sink);
        assert_eq!(seen.len(), 1);
        assert_eq!(p.delivered().unwrap().material, Some(MaterialTag::StraightAlpha));
    }

    #[test]
    fn recycles_the_previous_texture() {
        let (mut p, backend) = pipeline(PipelineConfig::default());
        let mut ids: Vec<TextureId> = Vec::new();
        let mut sink = sink_fn(|r| {
            ids.push(r.texture.id());
            Ok(())
        });

        for seq in 0..3 {
            p.submit(bgra(seq), &mut sink).unwrap();
        }
        drop(sink);

        // Third frame reuses the first texture, never the one still live
        assert_eq!(ids[2], ids[0]);
        assert_ne!(ids[2], ids[1]);
        assert_eq!(backend.created(), 2);
        assert_eq!(p.pool_len(), 1);
    }

    #[test]
    fn sink_failure_leaves_pipeline_consistent() {
        let (mut p, _backend) = pipeline(PipelineConfig::default());
        let mut sink = sink_fn(|_| -> std::result::Result<(), SinkError> { Err("renderer gone".into()) });

        p.submit(bgra(1), &mut sink).unwrap();
        p.submit(bgra(2), &mut sink).unwrap();
        assert!(!p.is_busy());
        assert_eq!(p.delivered().unwrap().sequence, 2);
        assert_eq!(p.counters.snapshot().callback_failures, 2);
    }

    #[test]
    fn invalid_frame_keeps_pipeline_usable() {
        let (mut p, _backend) = pipeline(PipelineConfig::default());
        let mut sink = sink_fn(|_| Ok(()));
        p.submit(bgra(1), &mut sink).unwrap();
        let strategy = p.strategy_id();

        let yuyv = Frame::packed(PixelFormat::Yuyv4, 4, 2, Plane::new(vec![0u8; 16], 8)).unwrap();
        assert!(matches!(p.submit(yuyv, &mut sink), Err(Error::InvalidInput { .. })));
        assert_eq!(p.strategy_id(), strategy);

        p.submit(bgra(2), &mut sink).unwrap();
        assert_eq!(p.delivered().unwrap().sequence, 2);
    }

    #[test]
    fn relabelled_frame_fails_without_leaking() {
        for deferred in [false, true] {
            let backend = Arc::new(HostBackend::new());
            let executor = if deferred {
                Executor::Deferred(Arc::new(WorkerPool::new(1).unwrap()))
            } else {
                Executor::Inline
            };
            let counters = Arc::new(Counters::default());
            let mut p = ConnectionPipeline::new(
                ConnectionId::from("p"),
                &PipelineConfig::default(),
                StrategySelector::new(backend.clone(), executor),
                backend.clone(),
                counters.clone(),
            );
            let mut sink = sink_fn(|_| Ok(()));

            // Claims far more rows than the buffer holds
            let mut frame = bgra(1);
            Arc::make_mut(&mut frame.meta).height = 64;
            let outcome = p.submit(frame, &mut sink);
            if deferred {
                assert_eq!(outcome.unwrap(), SubmitOutcome::Started);
                assert!(matches!(p.complete(&mut sink), Err(Error::Conversion(_))));
            } else {
                assert!(matches!(outcome, Err(Error::Conversion(_))));
            }

            assert!(!p.is_busy());
            assert!(p.strategy_id().is_none());
            assert_eq!(p.pool_len(), 1);
            assert_eq!(counters.snapshot().failed, 1);

            p.submit(bgra(2), &mut sink).unwrap();
            p.complete(&mut sink).unwrap();
            assert_eq!(p.delivered().unwrap().sequence, 2);

            p.release();
            assert_eq!(backend.live(), 0);
        }
    }

    #[test]
    fn release_destroys_everything() {
        let (mut p, backend) = pipeline(PipelineConfig::default());
        let mut sink = sink_fn(|_| Ok(()));
        for seq in 0..4 {
            p.submit(bgra(seq), &mut sink).unwrap();
        }
        p.submit(Frame::native(PixelFormat::Nv12, 4, 2, NativeHandle::new(3)).unwrap(), &mut sink)
            .unwrap();
        assert!(backend.live() > 0);

        p.release();
        assert_eq!(backend.live(), 0);
        assert!(p.delivered().is_none());
        assert!(p.strategy_id().is_none());
    }
}
