//! CPU-resident planar YUV frames, converted to RGBA and uploaded

use std::sync::Arc;

use super::kernels::planar_yuv_to_rgba;
use super::upload::UploadStage;
use super::worker::Executor;
use super::{ConversionStrategy, StrategyId, StrategyKind};
use crate::error::{Error, Result};
use crate::frame::{Frame, FramePayload, MemoryLayout};
use crate::texture::{OutputTexture, TextureBackend, TextureDesc};

#[derive(Debug)]
pub struct PlanarUpload {
    id: StrategyId,
    stage: UploadStage,
}

impl PlanarUpload {
    pub fn new(backend: Arc<dyn TextureBackend>, executor: Executor) -> Self {
        Self {
            id: StrategyId::next(),
            stage: UploadStage::new(backend, executor),
        }
    }

    /// Bytes held by the cached RGBA scratch buffer
    pub fn scratch_capacity(&self) -> usize {
        self.stage.scratch_capacity()
    }
}

impl ConversionStrategy for PlanarUpload {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PlanarUpload
    }

    fn id(&self) -> StrategyId {
        self.id
    }

    fn is_valid_input(&self, frame: &Frame) -> bool {
        frame.format().is_planar_yuv() && frame.layout() == MemoryLayout::Planar
    }

    fn allocate(&mut self, frame: &Frame, existing: Option<OutputTexture>) -> Result<OutputTexture> {
        self.stage
            .reuse_or_create(TextureDesc::rgba(frame.width(), frame.height()), existing)
    }

    fn convert(&mut self, frame: &Frame, target: OutputTexture) -> Result<()> {
        let FramePayload::Planar(planes) = frame.payload() else {
            self.stage.discard(target);
            return Err(Error::Conversion("planar upload needs planar frame data".into()));
        };
        let planes = planes.clone();
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        self.stage.start(target, move |rgba| {
            planar_yuv_to_rgba(format, &planes, width, height, rgba)
        })
    }

    fn is_done(&self) -> bool {
        self.stage.is_done()
    }

    fn complete(&mut self) -> Result<OutputTexture> {
        self.stage.finish()
    }

    fn take_recovered(&mut self) -> Option<OutputTexture> {
        self.stage.take_recovered()
    }

    fn dispose(&mut self) {
        self.stage.dispose();
    }
}
