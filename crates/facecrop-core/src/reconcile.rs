//! Aspect-ratio reconciliation.
//!
//! Integer flooring during geometry can leave the cropped buffer a few pixels
//! off the requested ratio. One Lanczos3 resample pulls it back: portrait
//! targets keep the height and recompute the width, square and landscape
//! targets keep the width and recompute the height. Below about 50 px on the
//! held side a rounded partner can still miss the tolerance; the held side is
//! then grown one pixel at a time until the pair fits.

use crate::pixel::PixelBuffer;
use crate::types::AspectRatio;

/// Largest accepted `|width / height - target|`.
pub const RATIO_TOLERANCE: f64 = 0.01;

/// How far past the held length the search may grow it. Rounding error on
/// the free side is at most half a pixel, so a held side of 50 px always fits
/// within the tolerance for ratios up to 1.
const HELD_SEARCH_LIMIT: u32 = 64;

/// Output dimensions if a resample is needed, `None` if the buffer already
/// satisfies `aspect_ratio` (or it is [`AspectRatio::Original`]).
pub fn reconciled_dimensions(width: u32, height: u32, aspect_ratio: AspectRatio) -> Option<(u32, u32)> {
    let target = aspect_ratio.ratio()?;
    if width == 0 || height == 0 {
        return None;
    }

    let current = f64::from(width) / f64::from(height);
    if (current - target).abs() <= RATIO_TOLERANCE {
        return None;
    }

    let portrait = target < 1.0;
    let held = if portrait { height } else { width };
    let pair = |held: u32| -> (u32, u32) {
        if portrait {
            ((f64::from(held) * target).round().max(1.0) as u32, held)
        } else {
            (held, (f64::from(held) / target).round().max(1.0) as u32)
        }
    };
    let fits = |(w, h): (u32, u32)| (f64::from(w) / f64::from(h) - target).abs() <= RATIO_TOLERANCE;

    let dims = (held..=held.saturating_add(HELD_SEARCH_LIMIT))
        .map(&pair)
        .find(|&dims| fits(dims))
        .unwrap_or_else(|| pair(held));
    Some(dims)
}

/// Resample `buffer` onto `aspect_ratio` if it drifted out of tolerance.
pub fn reconcile(buffer: PixelBuffer, aspect_ratio: AspectRatio) -> PixelBuffer {
    let (width, height) = (buffer.width(), buffer.height());
    match reconciled_dimensions(width, height, aspect_ratio) {
        Some((new_width, new_height)) => {
            tracing::debug!(
                from = ?(width, height),
                to = ?(new_width, new_height),
                %aspect_ratio,
                "resampling to reconcile aspect ratio"
            );
            buffer.resize(new_width, new_height)
        }
        None => buffer,
    }
}
