//! facecrop-core — Face-centred image cropping.
//!
//! Detects the largest face with SCRFD (ONNX Runtime), pads it by a zoom
//! factor, corrects the crop to the requested aspect ratio and reconciles the
//! final pixel dimensions.

pub mod config;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod locator;
pub mod pipeline;
pub mod pixel;
pub mod reconcile;
pub mod types;

pub use config::{ConfigError, ProcessorConfig};
pub use detector::{DetectionTuning, DetectorError, FaceDetector, ScrfdDetector, DETECTION_TUNING};
pub use error::{ErrorKind, ProcessingError};
pub use geometry::{CropPlan, GeometryOverflow};
pub use locator::{select_primary, FaceLocator};
pub use pipeline::{Detection, FaceCropper, Processed, Stage};
pub use pixel::{Colorspace, DecodeError, EncodeError, OutputFormat, PixelBuffer};
pub use types::{AspectRatio, CropRect, FaceBox, ParamsError, ProcessingParams};

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
