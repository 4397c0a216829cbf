use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default zoom when the caller does not choose one.
pub const DEFAULT_ZOOM: f64 = 0.2;

/// Axis-aligned face bounding box in image-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Pixel area, computed in `u64` so large boxes cannot overflow.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True when the box has a non-zero area and lies entirely inside a
    /// `width` × `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

/// Crop rectangle as half-open pixel ranges `[start_x, end_x) × [start_y, end_y)`.
///
/// Constructed only through [`CropRect::new`], which enforces
/// `0 <= start < end <= image dimension` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    start_x: u32,
    start_y: u32,
    end_x: u32,
    end_y: u32,
}

impl CropRect {
    /// Returns `None` when the rectangle is empty or leaves the image.
    pub fn new(
        start_x: u32,
        start_y: u32,
        end_x: u32,
        end_y: u32,
        image_width: u32,
        image_height: u32,
    ) -> Option<Self> {
        let valid =
            start_x < end_x && start_y < end_y && end_x <= image_width && end_y <= image_height;
        valid.then_some(Self { start_x, start_y, end_x, end_y })
    }

    pub fn start_x(&self) -> u32 {
        self.start_x
    }

    pub fn start_y(&self) -> u32 {
        self.start_y
    }

    pub fn end_x(&self) -> u32 {
        self.end_x
    }

    pub fn end_y(&self) -> u32 {
        self.end_y
    }

    pub fn width(&self) -> u32 {
        self.end_x - self.start_x
    }

    pub fn height(&self) -> u32 {
        self.end_y - self.start_y
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.start_x, self.start_y, self.end_x, self.end_y
        )
    }
}

/// Output aspect ratio requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    /// Keep whatever shape the padded face crop has.
    #[default]
    #[serde(rename = "original")]
    Original,
    /// 1:1.
    #[serde(rename = "square")]
    Square,
    /// 2:3 photo.
    #[serde(rename = "2:3")]
    Photo,
    /// 9:16 portrait.
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 4] = [
        AspectRatio::Original,
        AspectRatio::Square,
        AspectRatio::Photo,
        AspectRatio::Portrait,
    ];

    /// Target width / height, or `None` for [`AspectRatio::Original`].
    pub fn ratio(self) -> Option<f64> {
        match self {
            AspectRatio::Original => None,
            AspectRatio::Square => Some(1.0),
            AspectRatio::Photo => Some(2.0 / 3.0),
            AspectRatio::Portrait => Some(9.0 / 16.0),
        }
    }

    /// Wire token accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Original => "original",
            AspectRatio::Square => "square",
            AspectRatio::Photo => "2:3",
            AspectRatio::Portrait => "9:16",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == s)
            .ok_or_else(|| ParamsError::UnknownAspectRatio(s.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamsError {
    #[error("invalid aspect ratio {0:?}, must be one of: original, square, 2:3, 9:16")]
    UnknownAspectRatio(String),
    #[error("zoom must be between 0.0 and 1.0, got {0}")]
    ZoomOutOfRange(f64),
    #[error("invalid zoom value {0:?}, must be a number between 0.0 and 1.0")]
    InvalidZoom(String),
}

/// Validated per-request processing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingParams {
    aspect_ratio: AspectRatio,
    zoom: f64,
}

impl ProcessingParams {
    /// Rejects (never clamps) a zoom outside `[0.0, 1.0]`, NaN included.
    pub fn new(aspect_ratio: AspectRatio, zoom: f64) -> Result<Self, ParamsError> {
        if !(0.0..=1.0).contains(&zoom) {
            return Err(ParamsError::ZoomOutOfRange(zoom));
        }
        Ok(Self { aspect_ratio, zoom })
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Original,
            zoom: DEFAULT_ZOOM,
        }
    }
}

/// Parse a zoom token the way the request boundary receives it (a string).
pub fn parse_zoom(s: &str) -> Result<f64, ParamsError> {
    let zoom: f64 = s
        .trim()
        .parse()
        .map_err(|_| ParamsError::InvalidZoom(s.to_string()))?;
    if !(0.0..=1.0).contains(&zoom) {
        return Err(ParamsError::ZoomOutOfRange(zoom));
    }
    Ok(zoom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_box_area_and_containment() {
        let face = FaceBox::new(150, 150, 100, 100);
        assert_eq!(face.area(), 10_000);
        assert!(face.fits_within(400, 400));
        assert!(face.fits_within(250, 250));
        assert!(!face.fits_within(249, 400));
        assert!(!FaceBox::new(0, 0, 0, 10).fits_within(400, 400));
    }

    #[test]
    fn test_crop_rect_rejects_empty_and_out_of_bounds() {
        assert!(CropRect::new(10, 10, 10, 20, 100, 100).is_none());
        assert!(CropRect::new(10, 10, 20, 101, 100, 100).is_none());
        let rect = CropRect::new(70, 70, 330, 330, 400, 400).unwrap();
        assert_eq!((rect.width(), rect.height()), (260, 260));
        assert_eq!(rect.to_string(), "(70, 70, 330, 330)");
    }

    #[test]
    fn test_aspect_ratio_tokens() {
        assert_eq!("original".parse::<AspectRatio>(), Ok(AspectRatio::Original));
        assert_eq!("square".parse::<AspectRatio>(), Ok(AspectRatio::Square));
        assert_eq!("2:3".parse::<AspectRatio>(), Ok(AspectRatio::Photo));
        assert_eq!("9:16".parse::<AspectRatio>(), Ok(AspectRatio::Portrait));
        assert!(matches!(
            "invalid_ratio".parse::<AspectRatio>(),
            Err(ParamsError::UnknownAspectRatio(_))
        ));
        // Tokens are case-sensitive.
        assert!("Square".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn test_aspect_ratio_values() {
        assert_eq!(AspectRatio::Original.ratio(), None);
        assert_eq!(AspectRatio::Square.ratio(), Some(1.0));
        assert_eq!(AspectRatio::Portrait.ratio(), Some(0.5625));
        assert!((AspectRatio::Photo.ratio().unwrap() - 0.6667).abs() < 1e-3);
    }

    #[test]
    fn test_params_reject_out_of_range_zoom() {
        assert!(ProcessingParams::new(AspectRatio::Square, 0.0).is_ok());
        assert!(ProcessingParams::new(AspectRatio::Square, 1.0).is_ok());
        assert_eq!(
            ProcessingParams::new(AspectRatio::Square, 1.5),
            Err(ParamsError::ZoomOutOfRange(1.5))
        );
        assert!(ProcessingParams::new(AspectRatio::Square, -0.5).is_err());
        assert!(ProcessingParams::new(AspectRatio::Square, f64::NAN).is_err());
    }

    #[test]
    fn test_params_default() {
        let params = ProcessingParams::default();
        assert_eq!(params.aspect_ratio(), AspectRatio::Original);
        assert_eq!(params.zoom(), DEFAULT_ZOOM);
    }

    #[test]
    fn test_parse_zoom() {
        assert_eq!(parse_zoom("0.2"), Ok(0.2));
        assert_eq!(parse_zoom(" 1 "), Ok(1.0));
        assert!(matches!(parse_zoom("abc"), Err(ParamsError::InvalidZoom(_))));
        assert!(matches!(parse_zoom("1.5"), Err(ParamsError::ZoomOutOfRange(_))));
    }
}
