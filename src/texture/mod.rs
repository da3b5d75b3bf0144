//! Output textures and the backends that allocate them

pub mod host;

#[cfg(feature = "gpu")]
pub mod gpu;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::frame::NativeHandle;

pub use host::HostBackend;

#[cfg(feature = "gpu")]
pub use gpu::WgpuBackend;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one allocated texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    fn next() -> Self {
        Self(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA, sRGB encoded
    Rgba8,
    /// Wraps a platform surface; no pixel storage of its own
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn rgba(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba8,
        }
    }

    pub fn external(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::External,
        }
    }

    pub fn byte_len(&self) -> usize {
        match self.format {
            TextureFormat::Rgba8 => self.width as usize * self.height as usize * 4,
            TextureFormat::External => 0,
        }
    }
}

pub enum Storage {
    Host(Vec<u8>),
    #[cfg(feature = "gpu")]
    Gpu(wgpu::Texture),
    External(Option<NativeHandle>),
}

/// A reusable output texture with fixed dimensions and format
pub struct OutputTexture {
    id: TextureId,
    desc: TextureDesc,
    storage: Storage,
}

impl OutputTexture {
    /// Wrap backend storage; called by [`TextureBackend`] implementations
    pub fn new(desc: TextureDesc, storage: Storage) -> Self {
        Self {
            id: TextureId::next(),
            desc,
            storage,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// CPU pixels, when the texture lives in host memory
    pub fn host_pixels(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Host(pixels) => Some(pixels),
            _ => None,
        }
    }

    #[cfg(feature = "gpu")]
    pub fn gpu_texture(&self) -> Option<&wgpu::Texture> {
        match &self.storage {
            Storage::Gpu(texture) => Some(texture),
            _ => None,
        }
    }

    pub fn native_handle(&self) -> Option<&NativeHandle> {
        match &self.storage {
            Storage::External(handle) => handle.as_ref(),
            _ => None,
        }
    }

    /// Point an external texture at a new platform surface
    pub fn bind_native(&mut self, handle: NativeHandle) -> bool {
        match &mut self.storage {
            Storage::External(slot) => {
                *slot = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Drop any platform surface reference held by an external texture
    pub fn detach_native(&mut self) {
        if let Storage::External(slot) = &mut self.storage {
            slot.take();
        }
    }
}

impl fmt::Debug for OutputTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputTexture")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .finish()
    }
}

/// Allocates, fills and releases output textures.
///
/// Shared by every connection; implementations must be callable from
/// conversion worker threads.
pub trait TextureBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn create(&self, desc: TextureDesc) -> Result<OutputTexture>;

    /// Upload tightly packed RGBA rows into `texture`
    fn write(&self, texture: &mut OutputTexture, rgba: &[u8]) -> Result<()>;

    fn destroy(&self, texture: OutputTexture);
}
