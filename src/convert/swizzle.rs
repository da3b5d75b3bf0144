//! Fallback for packed RGB-family frames: reorder channels into RGBA

use std::sync::Arc;

use super::kernels::{is_swizzlable, swizzle_to_rgba};
use super::upload::UploadStage;
use super::worker::Executor;
use super::{ConversionStrategy, MaterialTag, StrategyId, StrategyKind};
use crate::error::{Error, Result};
use crate::frame::{Frame, FramePayload, MemoryLayout, PixelFormat};
use crate::texture::{OutputTexture, TextureBackend, TextureDesc};

#[derive(Debug)]
pub struct ChannelSwizzle {
    id: StrategyId,
    stage: UploadStage,
    last_format: Option<PixelFormat>,
}

impl ChannelSwizzle {
    pub fn new(backend: Arc<dyn TextureBackend>, executor: Executor) -> Self {
        Self {
            id: StrategyId::next(),
            stage: UploadStage::new(backend, executor),
            last_format: None,
        }
    }
}

impl ConversionStrategy for ChannelSwizzle {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ChannelSwizzle
    }

    fn id(&self) -> StrategyId {
        self.id
    }

    fn is_valid_input(&self, frame: &Frame) -> bool {
        frame.layout() == MemoryLayout::Packed && is_swizzlable(frame.format())
    }

    fn material(&self) -> Option<MaterialTag> {
        match self.last_format? {
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb => Some(MaterialTag::StraightAlpha),
            _ => None,
        }
    }

    fn allocate(&mut self, frame: &Frame, existing: Option<OutputTexture>) -> Result<OutputTexture> {
        self.stage
            .reuse_or_create(TextureDesc::rgba(frame.width(), frame.height()), existing)
    }

    fn convert(&mut self, frame: &Frame, target: OutputTexture) -> Result<()> {
        let FramePayload::Packed(plane) = frame.payload() else {
            self.stage.discard(target);
            return Err(Error::Conversion("channel swizzle needs a packed frame".into()));
        };
        let plane = plane.clone();
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        self.stage.start(target, move |rgba| {
            swizzle_to_rgba(format, &plane, width, height, rgba)
        })?;
        self.last_format = Some(format);
        Ok(())
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
        self.last_format = None;
    }
}
