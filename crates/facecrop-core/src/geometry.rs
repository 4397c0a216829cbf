//! Crop geometry engine.
//!
//! Turns the primary face box into the crop rectangle in two closed-form
//! stages:
//!
//! 1. **Padding**: grow the face box by `floor(side * (1 - zoom))` on every
//!    side, cut at the image border.
//! 2. **Aspect correction**: set one axis to its floored target length so
//!    that `width / height` approaches the requested ratio, keeping the centre.
//!
//! Stage 2 works in signed coordinates and may in principle leave the image;
//! [`clamp_to_image`] intersects the result with the image before anything is
//! cropped and reports the excursion as a [`GeometryOverflow`].

use crate::types::{CropRect, FaceBox, ProcessingParams};
use std::fmt;
use thiserror::Error;

/// Rectangle in signed pixel coordinates, half-open like [`CropRect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedRect {
    pub start_x: i64,
    pub start_y: i64,
    pub end_x: i64,
    pub end_y: i64,
}

impl SignedRect {
    pub fn width(&self) -> i64 {
        self.end_x - self.start_x
    }

    pub fn height(&self) -> i64 {
        self.end_y - self.start_y
    }
}

impl From<CropRect> for SignedRect {
    fn from(rect: CropRect) -> Self {
        Self {
            start_x: i64::from(rect.start_x()),
            start_y: i64::from(rect.start_y()),
            end_x: i64::from(rect.end_x()),
            end_y: i64::from(rect.end_y()),
        }
    }
}

impl fmt::Display for SignedRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.start_x, self.start_y, self.end_x, self.end_y
        )
    }
}

/// Aspect correction asked for coordinates outside the image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("crop {requested} exceeds {image_width}x{image_height} image bounds")]
pub struct GeometryOverflow {
    pub requested: SignedRect,
    pub image_width: u32,
    pub image_height: u32,
}

/// Every intermediate rectangle of one geometry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropPlan {
    /// After padding.
    pub padded: CropRect,
    /// After aspect correction, before clamping.
    pub corrected: SignedRect,
    /// What actually gets cropped.
    pub crop: CropRect,
    /// Set when `corrected` left the image and had to be clamped.
    pub overflow: Option<GeometryOverflow>,
}

/// Stage 1: pad the face box according to `zoom`.
///
/// `zoom = 1.0` returns the face box itself; `zoom = 0.0` pads by the face's
/// own width and height on each side. Returns `None` if the face box does not
/// fit the image.
pub fn pad_face(face: &FaceBox, image_width: u32, image_height: u32, zoom: f64) -> Option<CropRect> {
    if !face.fits_within(image_width, image_height) {
        return None;
    }

    let padding_factor = 1.0 - zoom;
    let pad_x = (f64::from(face.width) * padding_factor).floor() as u32;
    let pad_y = (f64::from(face.height) * padding_factor).floor() as u32;

    let start_x = face.x.saturating_sub(pad_x);
    let start_y = face.y.saturating_sub(pad_y);
    let end_x = (u64::from(face.x) + u64::from(face.width) + u64::from(pad_x))
        .min(u64::from(image_width)) as u32;
    let end_y = (u64::from(face.y) + u64::from(face.height) + u64::from(pad_y))
        .min(u64::from(image_height)) as u32;

    CropRect::new(start_x, start_y, end_x, end_y, image_width, image_height)
}

/// Stage 2: move one axis of `rect` to the length `target_ratio` implies.
///
/// Portrait targets (`< 1`) derive a width from the height and shrink the
/// width, unless the rectangle is already too narrow, in which case the height
/// is derived from the width instead. Square and landscape targets mirror
/// this with the axes swapped.
pub fn correct_aspect(rect: &CropRect, target_ratio: f64) -> SignedRect {
    let mut out = SignedRect::from(*rect);
    let current_width = out.width();
    let current_height = out.height();

    if target_ratio < 1.0 {
        let new_width = (current_height as f64 * target_ratio).floor() as i64;
        if new_width > current_width {
            let new_height = (current_width as f64 / target_ratio).floor() as i64;
            (out.start_y, out.end_y) = resize_span(out.start_y, out.end_y, new_height.max(1));
        } else {
            (out.start_x, out.end_x) = resize_span(out.start_x, out.end_x, new_width.max(1));
        }
    } else {
        let new_height = (current_width as f64 / target_ratio).floor() as i64;
        if new_height > current_height {
            let new_width = (current_height as f64 * target_ratio).floor() as i64;
            (out.start_x, out.end_x) = resize_span(out.start_x, out.end_x, new_width.max(1));
        } else {
            (out.start_y, out.end_y) = resize_span(out.start_y, out.end_y, new_height.max(1));
        }
    }

    out
}

/// Resize `[start, end)` to `new_len`, keeping it centred.
///
/// The change is split `|diff| / 2` to the leading edge and the rest to the
/// trailing edge, so an odd difference always lands its extra pixel on `end`,
/// for shrinking as well as growing. A signed floor split (`start - diff / 2`
/// rounding toward negative infinity) would move `start` one pixel further on
/// an odd shrink.
fn resize_span(start: i64, end: i64, new_len: i64) -> (i64, i64) {
    let diff = new_len - (end - start);
    let lead = diff.abs() / 2;
    let trail = diff.abs() - lead;
    if diff >= 0 {
        (start - lead, end + trail)
    } else {
        (start + lead, end - trail)
    }
}

/// Intersect `rect` with the image.
///
/// Returns `None` only if the intersection is empty.
pub fn clamp_to_image(
    rect: SignedRect,
    image_width: u32,
    image_height: u32,
) -> Option<(CropRect, Option<GeometryOverflow>)> {
    let (w, h) = (i64::from(image_width), i64::from(image_height));
    let overflowed = rect.start_x < 0 || rect.start_y < 0 || rect.end_x > w || rect.end_y > h;

    let start_x = rect.start_x.clamp(0, w) as u32;
    let start_y = rect.start_y.clamp(0, h) as u32;
    let end_x = rect.end_x.clamp(0, w) as u32;
    let end_y = rect.end_y.clamp(0, h) as u32;
    let crop = CropRect::new(start_x, start_y, end_x, end_y, image_width, image_height)?;

    let overflow = overflowed.then(|| GeometryOverflow {
        requested: rect,
        image_width,
        image_height,
    });
    Some((crop, overflow))
}

/// Run both stages and the bounds clamp for one request.
///
/// Returns `None` when the face box does not fit the image or the clamped
/// rectangle is empty.
pub fn plan_crop(
    face: &FaceBox,
    image_width: u32,
    image_height: u32,
    params: &ProcessingParams,
) -> Option<CropPlan> {
    let padded = pad_face(face, image_width, image_height, params.zoom())?;

    let corrected = match params.aspect_ratio().ratio() {
        Some(target) => correct_aspect(&padded, target),
        None => SignedRect::from(padded),
    };

    let (crop, overflow) = clamp_to_image(corrected, image_width, image_height)?;
    if let Some(overflow) = &overflow {
        tracing::warn!(%overflow, clamped = %crop, "aspect correction left the image; clamped");
    }

    tracing::debug!(%padded, %corrected, %crop, "crop geometry planned");
    Some(CropPlan {
        padded,
        corrected,
        crop,
        overflow,
    })
}
