//! Reference CPU kernels producing tightly packed RGBA

use crate::error::{Error, Result};
use crate::frame::{PixelFormat, Plane};

/// BT.601 YUV to RGB
#[inline]
fn yuv_to_rgba(y: u8, u: u8, v: u8, out: &mut [u8]) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    out[0] = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    out[1] = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
    out[2] = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
    out[3] = 255;
}

fn ensure_len(out: &mut Vec<u8>, width: u32, height: u32) {
    out.resize(width as usize * height as usize * 4, 0);
}

/// `len` bytes of row `row`, or an error when the plane is too short
fn row_of<'a>(plane: &'a Plane, row: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    let start = row * plane.stride as usize;
    plane
        .data
        .get(start..start + len)
        .ok_or_else(|| Error::Conversion(format!("{what} ends before row {row}")))
}

/// Convert an I420 or NV12 frame. `out` is resized and reused across calls.
pub fn planar_yuv_to_rgba(
    format: PixelFormat,
    planes: &[Plane],
    width: u32,
    height: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    ensure_len(out, width, height);
    let (w, h) = (width as usize, height as usize);
    let cw = w.div_ceil(2);

    match (format, planes) {
        (PixelFormat::I420, [y_plane, u_plane, v_plane]) => {
            for row in 0..h {
                let y_row = row_of(y_plane, row, w, "luma plane")?;
                let u_row = row_of(u_plane, row / 2, cw, "U plane")?;
                let v_row = row_of(v_plane, row / 2, cw, "V plane")?;
                for col in 0..w {
                    let idx = (row * w + col) * 4;
                    yuv_to_rgba(y_row[col], u_row[col / 2], v_row[col / 2], &mut out[idx..idx + 4]);
                }
            }
            Ok(())
        }
        (PixelFormat::Nv12, [y_plane, uv_plane]) => {
            for row in 0..h {
                let y_row = row_of(y_plane, row, w, "luma plane")?;
                let uv_row = row_of(uv_plane, row / 2, cw * 2, "chroma plane")?;
                for col in 0..w {
                    let idx = (row * w + col) * 4;
                    let uv = (col / 2) * 2;
                    yuv_to_rgba(y_row[col], uv_row[uv], uv_row[uv + 1], &mut out[idx..idx + 4]);
                }
            }
            Ok(())
        }
        _ => Err(Error::Conversion(format!(
            "{format:?} with {} planes is not planar YUV",
            planes.len()
        ))),
    }
}

/// Source byte offsets of (r, g, b, a) within one pixel
fn channel_map(format: PixelFormat) -> Option<(usize, [usize; 3], Option<usize>)> {
    match format {
        PixelFormat::Rgba => Some((4, [0, 1, 2], Some(3))),
        PixelFormat::Bgra => Some((4, [2, 1, 0], Some(3))),
        PixelFormat::Argb => Some((4, [1, 2, 3], Some(0))),
        PixelFormat::Rgb24 => Some((3, [0, 1, 2], None)),
        PixelFormat::Bgr24 => Some((3, [2, 1, 0], None)),
        _ => None,
    }
}

/// Whether [`swizzle_to_rgba`] can reorder this format
pub fn is_swizzlable(format: PixelFormat) -> bool {
    channel_map(format).is_some()
}

/// Reorder packed 3 or 4 channel pixels into RGBA
pub fn swizzle_to_rgba(
    format: PixelFormat,
    plane: &Plane,
    width: u32,
    height: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    let (bpp, [r, g, b], a) = channel_map(format)
        .ok_or_else(|| Error::Conversion(format!("{format:?} is not a packed RGB format")))?;
    ensure_len(out, width, height);
    let (w, h) = (width as usize, height as usize);

    for row in 0..h {
        let src = row_of(plane, row, w * bpp, "packed plane")?;
        let dst = &mut out[row * w * 4..(row + 1) * w * 4];
        for (px, chunk) in src.chunks_exact(bpp).take(w).zip(dst.chunks_exact_mut(4)) {
            chunk[0] = px[r];
            chunk[1] = px[g];
            chunk[2] = px[b];
            chunk[3] = a.map_or(255, |a| px[a]);
        }
    }
    Ok(())
}
