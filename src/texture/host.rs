//! Host-memory texture backend for headless runs and tests

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;
use tracing::trace;

use super::{OutputTexture, Storage, TextureBackend, TextureDesc, TextureFormat};
use crate::error::{Error, Result};

/// Keeps texture pixels in plain `Vec<u8>`s and counts every allocation
#[derive(Debug, Default)]
pub struct HostBackend {
    stats: CachePadded<Stats>,
}

#[derive(Debug, Default)]
struct Stats {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    writes: AtomicUsize,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.stats.created.load(Ordering::Relaxed)
    }

    pub fn destroyed(&self) -> usize {
        self.stats.destroyed.load(Ordering::Relaxed)
    }

    /// Textures created and not yet destroyed
    pub fn live(&self) -> usize {
        self.created() - self.destroyed()
    }

    pub fn writes(&self) -> usize {
        self.stats.writes.load(Ordering::Relaxed)
    }
}

impl TextureBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn create(&self, desc: TextureDesc) -> Result<OutputTexture> {
        let storage = match desc.format {
            TextureFormat::Rgba8 => Storage::Host(vec![0; desc.byte_len()]),
            TextureFormat::External => Storage::External(None),
        };
        let texture = OutputTexture::new(desc, storage);
        self.stats.created.fetch_add(1, Ordering::Relaxed);
        trace!(texture = %texture.id(), ?desc, "host texture created");
        Ok(texture)
    }

    fn write(&self, texture: &mut OutputTexture, rgba: &[u8]) -> Result<()> {
        let expected = texture.desc().byte_len();
        match texture.storage_mut() {
            Storage::Host(pixels) if rgba.len() == expected => {
                pixels.copy_from_slice(rgba);
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Storage::Host(_) => Err(Error::Backend(format!(
                "upload of {} bytes into a {expected} byte texture",
                rgba.len()
            ))),
            _ => Err(Error::Backend("texture has no host storage".into())),
        }
    }

    fn destroy(&self, texture: OutputTexture) {
        trace!(texture = %texture.id(), "host texture destroyed");
        self.stats.destroyed.fetch_add(1, Ordering::Relaxed);
        drop(texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_live_textures() {
        let backend = HostBackend::new();
        let a = backend.create(TextureDesc::rgba(2, 2)).unwrap();
        let b = backend.create(TextureDesc::external(2, 2)).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(backend.live(), 2);
        backend.destroy(a);
        assert_eq!(backend.live(), 1);
        assert_eq!(backend.created(), 2);
    }

    #[test]
    fn rejects_mismatched_upload() {
        let backend = HostBackend::new();
        let mut tex = backend.create(TextureDesc::rgba(2, 2)).unwrap();
        assert!(backend.write(&mut tex, &[0u8; 15]).is_err());
        backend.write(&mut tex, &[7u8; 16]).unwrap();
        assert_eq!(tex.host_pixels().unwrap()[0], 7);
    }
}
