//! Synthetic frames for the demo driver and tests

use bytes::Bytes;

use crate::error::Result;
use crate::frame::{Frame, NativeHandle, PixelFormat, Plane};

/// Flat colour used by [`test_pattern`] for a given sequence number
pub fn pattern_rgb(sequence: u64) -> [u8; 3] {
    let shade = (sequence.wrapping_mul(37) % 256) as u8;
    [shade, 255 - shade, 128]
}

/// A solid-colour frame in `format`.
///
/// Planar YUV frames carry neutral chroma, so they convert to grey at the
/// luma level given by the red channel of [`pattern_rgb`].
pub fn test_pattern(format: PixelFormat, width: u32, height: u32, sequence: u64) -> Result<Frame> {
    let [r, g, b] = pattern_rgb(sequence);
    let pixels = width as usize * height as usize;
    let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
    let chroma = cw as usize * ch as usize;

    let frame = match format {
        PixelFormat::I420 => Frame::planar(
            format,
            width,
            height,
            vec![
                Plane::new(vec![r; pixels], width),
                Plane::new(vec![128u8; chroma], cw),
                Plane::new(vec![128u8; chroma], cw),
            ],
        )?,
        PixelFormat::Nv12 => Frame::planar(
            format,
            width,
            height,
            vec![
                Plane::new(vec![r; pixels], width),
                Plane::new(vec![128u8; chroma * 2], cw * 2),
            ],
        )?,
        PixelFormat::Mjpeg => {
            // Start/end-of-image markers only; enough to travel the pipeline
            Frame::packed(format, width, height, Plane::new(Bytes::from_static(&[0xff, 0xd8, 0xff, 0xd9]), 0))?
        }
        packed => {
            let (texel, len) = match packed {
                PixelFormat::Rgba => ([r, g, b, 255], 4),
                PixelFormat::Bgra => ([b, g, r, 255], 4),
                PixelFormat::Argb => ([255, r, g, b], 4),
                PixelFormat::Rgb24 => ([r, g, b, 0], 3),
                PixelFormat::Bgr24 => ([b, g, r, 0], 3),
                _ => ([r, 128, r, 128], 4), // Yuyv4: two pixels per texel
            };
            let bpp = packed.packed_bytes_per_pixel().unwrap_or(4);
            let row: Vec<u8> = texel[..len].iter().copied().cycle().take((width * bpp) as usize).collect();
            Frame::packed(packed, width, height, Plane::new(row.repeat(height as usize), width * bpp))?
        }
    };

    Ok(frame.with_sequence(sequence))
}

/// A frame that only carries a platform handle
pub fn native_pattern(format: PixelFormat, width: u32, height: u32, sequence: u64) -> Result<Frame> {
    Ok(Frame::native(format, width, height, NativeHandle::new(0x1000 + sequence))?.with_sequence(sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FramePayload, MemoryLayout};

    #[test]
    fn builds_every_format() {
        for format in [
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Rgba,
            PixelFormat::Bgra,
            PixelFormat::Argb,
            PixelFormat::Yuyv4,
            PixelFormat::Mjpeg,
            PixelFormat::Nv12,
            PixelFormat::I420,
        ] {
            let frame = test_pattern(format, 6, 4, 3).unwrap();
            assert_eq!(frame.format(), format);
            assert_eq!(frame.sequence(), 3);
            let expected = if format.is_planar_yuv() {
                MemoryLayout::Planar
            } else {
                MemoryLayout::Packed
            };
            assert_eq!(frame.layout(), expected);
        }
    }

    #[test]
    fn three_byte_texels_tile_without_padding() {
        let frame = test_pattern(PixelFormat::Bgr24, 3, 2, 5).unwrap();
        let [r, g, b] = pattern_rgb(5);
        let FramePayload::Packed(plane) = frame.payload() else {
            panic!("packed frame expected");
        };
        assert_eq!(plane.stride, 9);
        assert_eq!(plane.data.len(), 18);
        assert!(plane.data.chunks(3).all(|px| px == [b, g, r]));
    }
}
