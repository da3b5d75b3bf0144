use serde::{Deserialize, Serialize};

/// Pixel formats a frame can arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
    Argb,
    Yuyv4,
    Mjpeg,
    Nv12,
    I420,
}

impl PixelFormat {
    /// 4:2:0 formats stored as separate luma and chroma planes
    pub fn is_planar_yuv(self) -> bool {
        matches!(self, PixelFormat::Nv12 | PixelFormat::I420)
    }

    /// Number of planes a planar frame of this format carries
    pub fn plane_count(self) -> Option<usize> {
        match self {
            PixelFormat::Nv12 => Some(2),
            PixelFormat::I420 => Some(3),
            _ => None,
        }
    }

    /// Bytes per pixel for uncompressed packed formats
    pub fn packed_bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb => Some(4),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg | PixelFormat::Nv12 | PixelFormat::I420 => None,
        }
    }
}

/// Where and how the pixel data of a frame lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryLayout {
    /// CPU-resident, one buffer per plane
    Planar,
    /// CPU-resident, single interleaved buffer
    Packed,
    /// Opaque platform handle (GPU surface, DMA-BUF, ...)
    Native,
}
