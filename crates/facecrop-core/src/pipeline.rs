//! Request pipeline: decode → grayscale → locate → crop → reconcile → encode.
//!
//! Every request walks the same linear sequence of [`Stage`]s. The only early
//! exit is [`Stage::NoFaceFound`], which hands back the decoded image
//! untouched. The single suspension point is the detector call.

use crate::config::ProcessorConfig;
use crate::detector::FaceDetector;
use crate::error::ProcessingError;
use crate::geometry::{self, CropPlan};
use crate::locator::{select_primary, FaceLocator};
use crate::pixel::{self, OutputFormat, PixelBuffer};
use crate::reconcile::reconcile;
use crate::types::{FaceBox, ProcessingParams};
use std::fmt;
use std::sync::Arc;

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoded,
    GrayscaleReady,
    FaceLocated,
    NoFaceFound,
    Cropped,
    Reconciled,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Decoded => "decoded",
            Stage::GrayscaleReady => "grayscale_ready",
            Stage::FaceLocated => "face_located",
            Stage::NoFaceFound => "no_face_found",
            Stage::Cropped => "cropped",
            Stage::Reconciled => "reconciled",
        };
        f.write_str(name)
    }
}

/// Successful outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// A face was found and the image cropped around it.
    Cropped {
        image: PixelBuffer,
        face: FaceBox,
        plan: CropPlan,
    },
    /// No face: the decoded input, unmodified.
    NoFaceFound(PixelBuffer),
}

impl Processed {
    pub fn image(&self) -> &PixelBuffer {
        match self {
            Processed::Cropped { image, .. } | Processed::NoFaceFound(image) => image,
        }
    }

    pub fn into_image(self) -> PixelBuffer {
        match self {
            Processed::Cropped { image, .. } | Processed::NoFaceFound(image) => image,
        }
    }
}

/// Faces found in one image, in detector order, plus the chosen one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub width: u32,
    pub height: u32,
    pub faces: Vec<FaceBox>,
    pub primary: Option<FaceBox>,
}

/// Face-centred cropper. Cheap to clone; clones share the detector and pool.
#[derive(Clone)]
pub struct FaceCropper {
    locator: FaceLocator,
    config: ProcessorConfig,
}

impl FaceCropper {
    pub fn new(detector: Arc<dyn FaceDetector>, config: ProcessorConfig) -> Self {
        let locator = FaceLocator::new(
            detector,
            config.max_concurrent_detections,
            config.detect_timeout(),
        );
        Self { locator, config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Decode and detect without cropping.
    pub async fn detect(&self, bytes: &[u8]) -> Result<Detection, ProcessingError> {
        let image = pixel::decode(bytes)?;
        let (width, height) = (image.width(), image.height());
        let faces = self.locator.locate(pixel::to_grayscale(&image)).await?;
        let primary = select_primary(&faces);
        Ok(Detection {
            width,
            height,
            faces,
            primary,
        })
    }

    /// Run the full pipeline and return the processed pixels.
    pub async fn process(
        &self,
        bytes: &[u8],
        params: &ProcessingParams,
    ) -> Result<Processed, ProcessingError> {
        let mut stage = Stage::Received;
        let result = self.run(bytes, params, &mut stage).await;
        if let Err(e) = &result {
            tracing::warn!(%stage, error = %e, "image processing failed");
        }
        result
    }

    /// Run the full pipeline and encode the result as JPEG.
    pub async fn process_image(
        &self,
        bytes: &[u8],
        params: &ProcessingParams,
    ) -> Result<Vec<u8>, ProcessingError> {
        let processed = self.process(bytes, params).await?;
        let quality = self.config.jpeg_quality;
        Ok(pixel::encode(processed.image(), OutputFormat::Jpeg { quality })?)
    }

    async fn run(
        &self,
        bytes: &[u8],
        params: &ProcessingParams,
        stage: &mut Stage,
    ) -> Result<Processed, ProcessingError> {
        let image = pixel::decode(bytes)?;
        let (width, height) = (image.width(), image.height());
        advance(stage, Stage::Decoded);

        let gray = pixel::to_grayscale(&image);
        advance(stage, Stage::GrayscaleReady);

        let faces = self.locator.locate(gray).await?;
        let Some(face) = select_primary(&faces) else {
            advance(stage, Stage::NoFaceFound);
            tracing::info!(width, height, "no face found; returning input unchanged");
            return Ok(Processed::NoFaceFound(image));
        };
        advance(stage, Stage::FaceLocated);
        tracing::info!(
            candidates = faces.len(),
            x = face.x,
            y = face.y,
            w = face.width,
            h = face.height,
            "primary face selected"
        );

        let plan = geometry::plan_crop(&face, width, height, params).ok_or_else(|| {
            ProcessingError::Internal(format!(
                "no crop rectangle for face {face:?} in {width}x{height} image"
            ))
        })?;
        let cropped = image.crop(&plan.crop);
        advance(stage, Stage::Cropped);

        let output = reconcile(cropped, params.aspect_ratio());
        advance(stage, Stage::Reconciled);
        tracing::info!(
            width = output.width(),
            height = output.height(),
            aspect_ratio = %params.aspect_ratio(),
            zoom = params.zoom(),
            "image processed"
        );

        Ok(Processed::Cropped {
            image: output,
            face,
            plan,
        })
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = %stage, to = %next, "pipeline stage");
    *stage = next;
}
