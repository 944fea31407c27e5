//! YUYV 4:2:2 to RGBA conversion.
//!
//! Output pixels are written in R, G, B, A byte order with alpha fixed at
//! 255. Every macropixel `[Y1, U, Y2, V]` decodes to two output pixels that
//! share chroma.

use crate::traits::{CameraError, Result};

/// Bytes per YUYV macropixel.
const MACROPIXEL_BYTES: usize = 4;
/// Bytes written per decoded macropixel (two RGBA pixels).
const DECODED_BYTES: usize = 8;

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 studio-range formula, evaluated in double
/// precision and narrowed to single precision before saturating. Each
/// channel saturates to 0..=255 and is truncated, not rounded.
///
/// # Arguments
///
/// * `y` - Luminance value (16-235 for studio range)
/// * `u` - Blue-difference chroma value (16-240)
/// * `v` - Red-difference chroma value (16-240)
#[must_use]
#[allow(clippy::many_single_char_names)]
// Fused multiply-add rounds differently and can truncate one step low.
#[allow(clippy::suboptimal_flops)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = 1.164 * (f64::from(y) - 16.0);
    let u_f = f64::from(u) - 128.0;
    let v_f = f64::from(v) - 128.0;

    let r = y_f + 1.596 * v_f;
    let g = y_f - 0.813 * v_f - 0.391 * u_f;
    let b = y_f + 2.018 * u_f;

    (clamp(r), clamp(g), clamp(b))
}

#[allow(clippy::cast_possible_truncation)]
fn clamp(val: f64) -> u8 {
    let val = val as f32;
    if val < 0.0 {
        0
    } else if val > 255.0 {
        255
    } else {
        #[allow(clippy::cast_possible_truncation)]
        #[allow(clippy::cast_sign_loss)]
        {
            val as u8
        }
    }
}

/// Decode one `[Y1, U, Y2, V]` macropixel into two RGBA pixels.
fn convert_two_pixels(input: &[u8], output: &mut [u8]) {
    let &[y1, u, y2, v] = input else {
        return;
    };
    for (luma, pixel) in [y1, y2].into_iter().zip(output.chunks_exact_mut(4)) {
        let (r, g, b) = yuv_to_rgb(luma, u, v);
        pixel.copy_from_slice(&[r, g, b, 0xff]);
    }
}

/// Smallest slice length that holds `height` rows of `row_bytes` meaningful
/// bytes spaced `pitch` bytes apart, or `None` if that overflows `usize`.
const fn required_len(height: usize, pitch: usize, row_bytes: usize) -> Option<usize> {
    if height == 0 {
        return Some(0);
    }
    match (height - 1).checked_mul(pitch) {
        Some(offset) => offset.checked_add(row_bytes),
        None => None,
    }
}

fn overflow(width: usize, height: usize) -> CameraError {
    CameraError::BadGeometry(format!("{width}x{height} overflows the address space"))
}

/// Convert a YUYV image into RGBA.
///
/// `input_pitch` and `output_pitch` are the bytes per row of each buffer and
/// may exceed the logical row size; padding bytes between the end of a row
/// and the pitch boundary are neither read nor written.
///
/// Fails with [`CameraError::BadGeometry`] if `width` is odd, a pitch is below
/// its minimum (`width * 2` in, `width * 4` out), or a buffer is too short for
/// `height` rows. Validation happens before any byte of `output` is written.
pub fn convert_yuyv_to_rgba(
    input: &[u8],
    output: &mut [u8],
    width: usize,
    height: usize,
    input_pitch: usize,
    output_pitch: usize,
) -> Result<()> {
    if width % 2 != 0 {
        return Err(CameraError::BadGeometry(format!(
            "width {width} is odd; YUYV decodes two pixels at a time"
        )));
    }
    let (Some(input_row), Some(output_row)) = (width.checked_mul(2), width.checked_mul(4)) else {
        return Err(overflow(width, height));
    };
    if input_pitch < input_row {
        return Err(CameraError::BadGeometry(format!(
            "input pitch {input_pitch} is below {input_row} bytes for width {width}"
        )));
    }
    if output_pitch < output_row {
        return Err(CameraError::BadGeometry(format!(
            "output pitch {output_pitch} is below {output_row} bytes for width {width}"
        )));
    }
    let input_needed =
        required_len(height, input_pitch, input_row).ok_or_else(|| overflow(width, height))?;
    if input.len() < input_needed {
        return Err(CameraError::BadGeometry(format!(
            "input holds {} bytes, {input_needed} needed for {width}x{height}",
            input.len()
        )));
    }
    let output_needed =
        required_len(height, output_pitch, output_row).ok_or_else(|| overflow(width, height))?;
    if output.len() < output_needed {
        return Err(CameraError::BadGeometry(format!(
            "output holds {} bytes, {output_needed} needed for {width}x{height}",
            output.len()
        )));
    }
    if width == 0 || height == 0 {
        return Ok(());
    }

    let rows = input
        .chunks(input_pitch)
        .zip(output.chunks_mut(output_pitch))
        .take(height);
    for (src_row, dst_row) in rows {
        let (Some(src), Some(dst)) = (src_row.get(..input_row), dst_row.get_mut(..output_row))
        else {
            break;
        };
        for (macropixel, decoded) in src
            .chunks_exact(MACROPIXEL_BYTES)
            .zip(dst.chunks_exact_mut(DECODED_BYTES))
        {
            convert_two_pixels(macropixel, decoded);
        }
    }

    Ok(())
}

/// An owned, tightly packed RGBA image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbaFrame {
    /// Convert a YUYV frame whose rows are `input_pitch` bytes apart.
    pub fn from_yuyv(input: &[u8], width: u32, height: u32, input_pitch: usize) -> Result<Self> {
        let w = width as usize;
        let h = height as usize;
        let (Some(pitch), Some(len)) = (
            w.checked_mul(4),
            w.checked_mul(h).and_then(|pixels| pixels.checked_mul(4)),
        ) else {
            return Err(overflow(w, h));
        };
        let mut data = vec![0u8; len];
        convert_yuyv_to_rgba(input, &mut data, w, h, input_pitch, pitch)?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Image width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes, `width * 4` per row.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame, returning its RGBA bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// RGB values of the pixel at (`x`, `y`), or `None` outside the image.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        match self.data.get(offset..offset + 3)? {
            [r, g, b] => Some((*r, *g, *b)),
            _ => None,
        }
    }
}
