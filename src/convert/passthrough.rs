//! Native surfaces are bound as external textures without copying

use std::sync::Arc;

use super::upload::reuse_or_create;
use super::{ConversionStrategy, MaterialTag, StrategyId, StrategyKind};
use crate::error::{Error, Result};
use crate::frame::{Frame, FramePayload, MemoryLayout};
use crate::texture::{OutputTexture, TextureBackend, TextureDesc};

#[derive(Debug)]
pub struct NativePassthrough {
    id: StrategyId,
    backend: Arc<dyn TextureBackend>,
    in_flight: Option<OutputTexture>,
}

impl NativePassthrough {
    pub fn new(backend: Arc<dyn TextureBackend>) -> Self {
        Self {
            id: StrategyId::next(),
            backend,
            in_flight: None,
        }
    }
}

impl ConversionStrategy for NativePassthrough {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NativePassthrough
    }

    fn id(&self) -> StrategyId {
        self.id
    }

    fn is_valid_input(&self, frame: &Frame) -> bool {
        frame.layout() == MemoryLayout::Native
    }

    fn material(&self) -> Option<MaterialTag> {
        Some(MaterialTag::ExternalSurface)
    }

    fn allocate(&mut self, frame: &Frame, existing: Option<OutputTexture>) -> Result<OutputTexture> {
        reuse_or_create(
            self.backend.as_ref(),
            TextureDesc::external(frame.width(), frame.height()),
            existing,
        )
    }

    fn convert(&mut self, frame: &Frame, mut target: OutputTexture) -> Result<()> {
        let FramePayload::Native(handle) = frame.payload() else {
            self.backend.destroy(target);
            return Err(Error::Conversion("passthrough needs a native frame".into()));
        };
        if self.in_flight.is_some() || !target.bind_native(handle.clone()) {
            self.backend.destroy(target);
            return Err(Error::Conversion("cannot bind native surface".into()));
        }
        self.in_flight = Some(target);
        Ok(())
    }

    fn is_done(&self) -> bool {
        true
    }

    fn complete(&mut self) -> Result<OutputTexture> {
        self.in_flight.take().ok_or(Error::NotConverting)
    }

    fn dispose(&mut self) {
        if let Some(texture) = self.in_flight.take() {
            self.backend.destroy(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{NativeHandle, PixelFormat};
    use crate::texture::HostBackend;

    #[test]
    fn binds_the_frame_surface() {
        let backend = Arc::new(HostBackend::new());
        let mut strategy = NativePassthrough::new(backend.clone());
        let handle = NativeHandle::new(0xbeef);
        let frame = Frame::native(PixelFormat::Nv12, 64, 32, handle.clone()).unwrap();

        let target = strategy.allocate(&frame, None).unwrap();
        strategy.convert(&frame, target).unwrap();
        assert!(strategy.is_done());
        let texture = strategy.complete().unwrap();
        assert_eq!(texture.native_handle().map(NativeHandle::raw), Some(0xbeef));
        assert_eq!(texture.width(), 64);
        assert!(matches!(strategy.complete(), Err(Error::NotConverting)));
    }

    #[test]
    fn reallocates_on_size_change() {
        let backend = Arc::new(HostBackend::new());
        let mut strategy = NativePassthrough::new(backend.clone());
        let small = Frame::native(PixelFormat::Bgra, 16, 16, NativeHandle::new(1)).unwrap();
        let large = Frame::native(PixelFormat::Bgra, 32, 16, NativeHandle::new(2)).unwrap();

        let first = strategy.allocate(&small, None).unwrap();
        let first_id = first.id();
        let same = strategy.allocate(&small, Some(first)).unwrap();
        assert_eq!(same.id(), first_id);

        let resized = strategy.allocate(&large, Some(same)).unwrap();
        assert_ne!(resized.id(), first_id);
        assert_eq!(backend.destroyed(), 1);
        assert_eq!(backend.live(), 1);
    }
}
