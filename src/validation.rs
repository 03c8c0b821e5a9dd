//! Frame validation utilities for test pattern verification.
//!
//! Checks captured YUYV frames against the patterns a virtual camera
//! (vivid, or the mock driver in unit tests) produces.

use crate::codec::pixel_at;
use crate::traits::{CameraError, Result};

/// Expected RGB values for the eight SMPTE color bars.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 11),
    (12, 236, 237),
    (13, 237, 13),
    (237, 13, 237),
    (238, 14, 13),
    (15, 15, 239),
    (16, 16, 16),
];

/// Per-channel tolerance for color matching.
const COLOR_TOLERANCE: u8 = 15;

/// Minimum luma rise across a gradient frame.
const MIN_GRADIENT_RISE: u32 = 50;

/// Validates that a YUYV frame contains the SMPTE color bar pattern.
///
/// Samples the center of each of the eight vertical bars on the middle row.
pub fn validate_color_bars(frame: &[u8], width: u32, height: u32) -> Result<()> {
    let bar_width = width / 8;
    let center_y = height / 2;

    for (bar, expected) in (0u32..).zip(SMPTE_COLOR_BARS) {
        let x = bar * bar_width + bar_width / 2;
        let actual = sample(frame, x, center_y, width)?;

        if !colors_match(actual, expected) {
            return Err(CameraError::Validation(format!(
                "color bar {bar} mismatch at ({x}, {center_y}): \
                 expected RGB{expected:?}, got RGB{actual:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a YUYV frame holds a left-to-right brightening gradient.
///
/// Luma along the middle row must not drop by more than one step between
/// samples and must rise by at least [`MIN_GRADIENT_RISE`] overall.
pub fn validate_gradient(frame: &[u8], width: u32, height: u32) -> Result<()> {
    let center_y = height / 2;
    let mut first = None;
    let mut prev: Option<u32> = None;

    for x in (0..width).step_by(10) {
        let luma = luma(sample(frame, x, center_y, width)?);

        if let Some(prev) = prev {
            if luma + 1 < prev {
                return Err(CameraError::Validation(format!(
                    "gradient not increasing at x={x}: luma {luma} < previous {prev}"
                )));
            }
        }
        first.get_or_insert(luma);
        prev = Some(luma);
    }

    let rise = prev
        .zip(first)
        .map_or(0, |(last, first)| last.saturating_sub(first));
    if rise < MIN_GRADIENT_RISE {
        return Err(CameraError::Validation(format!(
            "insufficient luma change for gradient: {rise} (expected at least {MIN_GRADIENT_RISE})"
        )));
    }

    Ok(())
}

/// Validates that frame sequence numbers increase by exactly one.
pub fn validate_frame_sequence(sequences: &[u32]) -> Result<()> {
    if sequences.is_empty() {
        return Err(CameraError::Validation(
            "cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in sequences.windows(2).enumerate() {
        let &[prev, curr] = pair else { continue };
        if prev.checked_add(1) != Some(curr) {
            return Err(CameraError::Validation(format!(
                "frame sequence gap at index {}: expected {}, got {curr}",
                i + 1,
                u64::from(prev) + 1
            )));
        }
    }

    Ok(())
}

fn sample(frame: &[u8], x: u32, y: u32, width: u32) -> Result<(u8, u8, u8)> {
    pixel_at(frame, x, y, width)
        .ok_or_else(|| CameraError::Validation(format!("no pixel at ({x}, {y})")))
}

/// Integer Rec. 601 luma, scaled to 0..=255.
fn luma((r, g, b): (u8, u8, u8)) -> u32 {
    (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000
}

fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8)) -> bool {
    actual.0.abs_diff(expected.0) <= COLOR_TOLERANCE
        && actual.1.abs_diff(expected.1) <= COLOR_TOLERANCE
        && actual.2.abs_diff(expected.2) <= COLOR_TOLERANCE
}
