//! Frame validation utilities for test pattern verification.
//!
//! This module checks that converted RGBA frames contain expected test
//! patterns. Useful for integration testing with virtual cameras.

use crate::convert::{yuv_to_rgb, RgbaFrame};
use crate::traits::FrameMetadata;

/// YUV values of the 100% SMPTE color bars.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS_YUV: [(u8, u8, u8); 8] = [
    (235, 128, 128), // White
    (210, 16, 146),  // Yellow
    (170, 166, 16),  // Cyan
    (145, 54, 34),   // Green
    (106, 202, 222), // Magenta
    (81, 90, 240),   // Red
    (41, 240, 110),  // Blue
    (16, 128, 128),  // Black
];

/// Tolerance for RGB color matching (accounts for encoder rounding).
const COLOR_TOLERANCE: u8 = 15;

/// A frame that does not contain the expected pattern.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(String);

/// Result type for validation checks.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Validates that a frame contains the SMPTE color bar pattern.
///
/// This function checks 8 vertical stripes at their center positions,
/// verifying that each stripe decodes to the expected color within a
/// tolerance.
///
/// # Errors
///
/// Returns an error if any color bar doesn't match the expected color within
/// tolerance, or the frame is too narrow to hold 8 bars.
pub fn validate_color_bars(frame: &RgbaFrame) -> Result<()> {
    let bar_width = frame.width() / 8;
    let center_y = frame.height() / 2;
    if bar_width == 0 {
        return Err(ValidationError(format!(
            "Frame {}x{} is too narrow for 8 color bars",
            frame.width(),
            frame.height()
        )));
    }

    for (bar_idx, &(y, u, v)) in (0u32..).zip(SMPTE_COLOR_BARS_YUV.iter()) {
        let expected_rgb = yuv_to_rgb(y, u, v);
        // Sample the center of each bar
        let sample_x = bar_idx * bar_width + bar_width / 2;

        let actual_rgb = frame.pixel_at(sample_x, center_y).ok_or_else(|| {
            ValidationError(format!("Failed to get pixel at ({sample_x}, {center_y})"))
        })?;

        if !colors_match(actual_rgb, expected_rgb, COLOR_TOLERANCE) {
            return Err(ValidationError(format!(
                "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Samples a horizontal line at the center of the frame and verifies that
/// the luminance increases monotonically from left to right, with a
/// significant overall change (not a solid color).
pub fn validate_gradient(frame: &RgbaFrame) -> Result<()> {
    let center_y = frame.height() / 2;

    // Sample every 10 pixels to check for monotonic increase
    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;

    for x in (0..frame.width()).step_by(10) {
        let (r, g, b) = frame.pixel_at(x, center_y).ok_or_else(|| {
            ValidationError(format!("Failed to get pixel at ({x}, {center_y})"))
        })?;

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        first_luminance.get_or_insert(luminance);
        if let Some(prev) = prev_luminance {
            // Allow small decreases due to rounding
            if luminance < prev - 1.0 {
                return Err(ValidationError(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }
        prev_luminance = Some(luminance);
    }

    let (Some(first), Some(last)) = (first_luminance, prev_luminance) else {
        return Err(ValidationError("Cannot validate an empty frame".to_owned()));
    };
    let luminance_change = last - first;
    if luminance_change < 50.0 {
        return Err(ValidationError(format!(
            "Insufficient luminance change for gradient: {luminance_change} \
             (expected at least 50.0)"
        )));
    }

    Ok(())
}

/// Validates that frame sequence numbers increment by 1 with no gaps.
pub fn validate_frame_sequence(frames: &[FrameMetadata]) -> Result<()> {
    if frames.is_empty() {
        return Err(ValidationError(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        let [prev, curr] = pair else {
            continue;
        };
        let expected = prev.sequence.wrapping_add(1);
        if curr.sequence != expected {
            return Err(ValidationError(format!(
                "Frame sequence gap at index {}: expected {expected}, got {}",
                i + 1,
                curr.sequence
            )));
        }
    }

    Ok(())
}

/// Whether all three channels are within `tolerance` of each other.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    actual.0.abs_diff(expected.0) <= tolerance
        && actual.1.abs_diff(expected.1) <= tolerance
        && actual.2.abs_diff(expected.2) <= tolerance
}
