//! Input frames handed to the pipeline by the network layer

pub mod format;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

pub use format::{MemoryLayout, PixelFormat};

use crate::error::{Error, Result};

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Sender timestamp if available
}

/// One plane of CPU-resident pixel data
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    pub stride: u32,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, stride: u32) -> Self {
        Self {
            data: data.into(),
            stride,
        }
    }

    fn check(&self, row_bytes: u32, rows: u32, what: &str) -> Result<()> {
        if self.stride < row_bytes {
            return Err(Error::InvalidFrame(format!(
                "{what} stride {} is shorter than a row ({row_bytes} bytes)",
                self.stride
            )));
        }
        let needed = if rows == 0 {
            0
        } else {
            self.stride as usize * (rows as usize - 1) + row_bytes as usize
        };
        if self.data.len() < needed {
            return Err(Error::InvalidFrame(format!(
                "{what} holds {} bytes, {needed} required",
                self.data.len()
            )));
        }
        Ok(())
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidFrame(format!("empty {width}x{height} frame")));
    }
    Ok(())
}

/// Opaque platform-native surface handle, shared by reference count
#[derive(Debug, Clone)]
pub struct NativeHandle(Arc<NativeSurface>);

#[derive(Debug)]
struct NativeSurface {
    raw: u64,
}

impl NativeHandle {
    pub fn new(raw: u64) -> Self {
        Self(Arc::new(NativeSurface { raw }))
    }

    pub fn raw(&self) -> u64 {
        self.0.raw
    }

    /// Number of live references to the underlying surface
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

#[derive(Debug, Clone)]
pub enum FramePayload {
    Planar(Vec<Plane>),
    Packed(Plane),
    Native(NativeHandle),
}

/// A single-use video frame.
///
/// The disposal hook runs exactly once: either through [`Frame::dispose`] or
/// when the frame is dropped.
pub struct Frame {
    /// Fixed once the constructor has checked the payload against it
    pub(crate) meta: Arc<FrameMetadata>,
    /// Arrival timestamp for latency tracking
    pub timestamp: Instant,
    payload: FramePayload,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl Frame {
    /// Planar YUV frame, one buffer per plane (Y, U, V for I420; Y, UV for NV12)
    pub fn planar(format: PixelFormat, width: u32, height: u32, planes: Vec<Plane>) -> Result<Self> {
        check_dimensions(width, height)?;
        let expected = format.plane_count().ok_or_else(|| {
            Error::InvalidFrame(format!("{format:?} has no planar representation"))
        })?;
        if planes.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "{format:?} needs {expected} planes, got {}",
                planes.len()
            )));
        }

        let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
        planes[0].check(width, height, "luma plane")?;
        match format {
            PixelFormat::Nv12 => planes[1].check(cw * 2, ch, "chroma plane")?,
            _ => {
                planes[1].check(cw, ch, "U plane")?;
                planes[2].check(cw, ch, "V plane")?;
            }
        }

        Ok(Self::with_payload(format, width, height, FramePayload::Planar(planes)))
    }

    /// Single interleaved buffer. Compressed formats skip the geometry check.
    pub fn packed(format: PixelFormat, width: u32, height: u32, plane: Plane) -> Result<Self> {
        check_dimensions(width, height)?;
        if let Some(bpp) = format.packed_bytes_per_pixel() {
            plane.check(width * bpp, height, "packed buffer")?;
        }
        Ok(Self::with_payload(format, width, height, FramePayload::Packed(plane)))
    }

    /// Frame backed by a platform surface
    pub fn native(format: PixelFormat, width: u32, height: u32, handle: NativeHandle) -> Result<Self> {
        check_dimensions(width, height)?;
        Ok(Self::with_payload(format, width, height, FramePayload::Native(handle)))
    }

    fn with_payload(format: PixelFormat, width: u32, height: u32, payload: FramePayload) -> Self {
        Self {
            meta: Arc::new(FrameMetadata {
                sequence: 0,
                width,
                height,
                format,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
            payload,
            disposer: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        Arc::make_mut(&mut self.meta).sequence = sequence;
        self
    }

    pub fn with_device_timestamp(mut self, ts: Duration) -> Self {
        Arc::make_mut(&mut self.meta).device_timestamp = Some(ts);
        self
    }

    /// Hook run once the frame has been consumed
    pub fn with_disposer(mut self, disposer: impl FnOnce() + Send + 'static) -> Self {
        self.disposer = Some(Box::new(disposer));
        self
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn layout(&self) -> MemoryLayout {
        match self.payload {
            FramePayload::Planar(_) => MemoryLayout::Planar,
            FramePayload::Packed(_) => MemoryLayout::Packed,
            FramePayload::Native(_) => MemoryLayout::Native,
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn payload(&self) -> &FramePayload {
        &self.payload
    }

    /// Release the frame's source buffers
    pub fn dispose(mut self) {
        self.run_disposer();
    }

    fn run_disposer(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.run_disposer();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("format", &self.meta.format)
            .field("layout", &self.layout())
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .finish()
    }
}
