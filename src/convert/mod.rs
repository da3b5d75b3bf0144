//! Conversion strategies and the selector that picks one per frame

pub mod kernels;
pub mod passthrough;
pub mod planar;
pub mod swizzle;
pub mod worker;

mod upload;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::frame::{Frame, MemoryLayout, PixelFormat};
use crate::texture::{OutputTexture, TextureBackend};

pub use passthrough::NativePassthrough;
pub use planar::PlanarUpload;
pub use swizzle::ChannelSwizzle;
pub use worker::{Executor, Pending, WorkerPool};

static NEXT_STRATEGY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one strategy instance; equal ids mean the same cached state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrategyId(u64);

impl StrategyId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STRATEGY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    PlanarUpload,
    NativePassthrough,
    ChannelSwizzle,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::PlanarUpload => "planar-upload",
            StrategyKind::NativePassthrough => "native-passthrough",
            StrategyKind::ChannelSwizzle => "channel-swizzle",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the renderer should bind a delivered texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialTag {
    /// Sample through the platform's external-texture path
    ExternalSurface,
    /// RGBA with a meaningful, non-premultiplied alpha channel
    StraightAlpha,
}

/// One way of turning frames of a given format and layout into a texture.
///
/// Call order per frame: `allocate`, `convert`, then `complete` exactly once.
/// `is_done` may be polled in between without blocking.
pub trait ConversionStrategy: Send + fmt::Debug {
    fn kind(&self) -> StrategyKind;

    fn id(&self) -> StrategyId;

    fn is_valid_input(&self, frame: &Frame) -> bool;

    /// Binding hint for the most recently converted frame
    fn material(&self) -> Option<MaterialTag> {
        None
    }

    /// Produce a target for `frame`, reusing `existing` when its shape fits
    fn allocate(&mut self, frame: &Frame, existing: Option<OutputTexture>) -> Result<OutputTexture>;

    /// Begin converting `frame` into `target`; may return before the work finishes
    fn convert(&mut self, frame: &Frame, target: OutputTexture) -> Result<()>;

    fn is_done(&self) -> bool;

    /// Block until the conversion finishes and hand back the filled texture
    fn complete(&mut self) -> Result<OutputTexture>;

    /// Target of a conversion whose `complete` failed, if it is still usable
    fn take_recovered(&mut self) -> Option<OutputTexture> {
        None
    }

    /// Release scratch buffers and anything still in flight
    fn dispose(&mut self);
}

/// Ordered selection rules; the last arm catches everything else
pub fn select_kind(format: PixelFormat, layout: MemoryLayout) -> StrategyKind {
    match (format, layout) {
        (format, MemoryLayout::Planar) if format.is_planar_yuv() => StrategyKind::PlanarUpload,
        (_, MemoryLayout::Native) => StrategyKind::NativePassthrough,
        _ => StrategyKind::ChannelSwizzle,
    }
}

/// Builds strategies bound to a connection's backend and executor
#[derive(Debug, Clone)]
pub struct StrategySelector {
    backend: Arc<dyn TextureBackend>,
    executor: Executor,
}

impl StrategySelector {
    pub fn new(backend: Arc<dyn TextureBackend>, executor: Executor) -> Self {
        Self { backend, executor }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn build(&self, kind: StrategyKind) -> Box<dyn ConversionStrategy> {
        match kind {
            StrategyKind::PlanarUpload => {
                Box::new(PlanarUpload::new(self.backend.clone(), self.executor.clone()))
            }
            StrategyKind::NativePassthrough => Box::new(NativePassthrough::new(self.backend.clone())),
            StrategyKind::ChannelSwizzle => {
                Box::new(ChannelSwizzle::new(self.backend.clone(), self.executor.clone()))
            }
        }
    }

    /// Returns `None` when `current` already accepts the frame, else a fresh strategy
    pub fn select(
        &self,
        frame: &Frame,
        current: Option<&dyn ConversionStrategy>,
    ) -> Result<Option<Box<dyn ConversionStrategy>>> {
        if current.is_some_and(|strategy| strategy.is_valid_input(frame)) {
            return Ok(None);
        }

        let (format, layout) = (frame.format(), frame.layout());
        let kind = select_kind(format, layout);
        let candidate = self.build(kind);
        if candidate.is_valid_input(frame) {
            debug!(strategy = %kind, ?format, ?layout, "strategy selected");
            return Ok(Some(candidate));
        }

        match kind {
            StrategyKind::ChannelSwizzle => Err(Error::InvalidInput { format, layout }),
            _ => {
                error!(strategy = %kind, ?format, ?layout, "selected strategy rejects its own input");
                Err(Error::StrategyMismatch {
                    strategy: kind.name(),
                    format,
                    layout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{NativeHandle, Plane};
    use crate::texture::HostBackend;

    fn selector() -> StrategySelector {
        StrategySelector::new(Arc::new(HostBackend::new()), Executor::Inline)
    }

    fn rgba(w: u32, h: u32) -> Frame {
        Frame::packed(PixelFormat::Rgba, w, h, Plane::new(vec![0u8; (w * h * 4) as usize], w * 4)).unwrap()
    }

    #[test]
    fn rules_are_ordered() {
        assert_eq!(select_kind(PixelFormat::I420, MemoryLayout::Planar), StrategyKind::PlanarUpload);
        assert_eq!(select_kind(PixelFormat::Nv12, MemoryLayout::Native), StrategyKind::NativePassthrough);
        assert_eq!(select_kind(PixelFormat::Bgra, MemoryLayout::Native), StrategyKind::NativePassthrough);
        assert_eq!(select_kind(PixelFormat::Bgra, MemoryLayout::Packed), StrategyKind::ChannelSwizzle);
        assert_eq!(select_kind(PixelFormat::Nv12, MemoryLayout::Packed), StrategyKind::ChannelSwizzle);
    }

    #[test]
    fn reuses_a_strategy_that_accepts_the_frame() {
        let selector = selector();
        let first = selector.select(&rgba(4, 4), None).unwrap().unwrap();
        assert!(selector.select(&rgba(8, 2), Some(first.as_ref())).unwrap().is_none());
    }

    #[test]
    fn replaces_on_layout_change() {
        let selector = selector();
        let first = selector.select(&rgba(4, 4), None).unwrap().unwrap();
        let native = Frame::native(PixelFormat::Rgba, 4, 4, NativeHandle::new(1)).unwrap();
        let next = selector.select(&native, Some(first.as_ref())).unwrap().unwrap();
        assert_eq!(next.kind(), StrategyKind::NativePassthrough);
        assert_ne!(next.id(), first.id());
    }

    #[test]
    fn compressed_frames_have_no_strategy() {
        let jpeg = Frame::packed(PixelFormat::Mjpeg, 16, 16, Plane::new(vec![0xffu8, 0xd8], 0)).unwrap();
        let err = selector().select(&jpeg, None).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidInput {
                format: PixelFormat::Mjpeg,
                layout: MemoryLayout::Packed
            }
        ));
    }
}
