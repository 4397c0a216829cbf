//! Face detector capability and the bundled SCRFD backend.
//!
//! The pipeline treats detection as a black box: a grayscale buffer goes in,
//! integer face boxes come out. [`ScrfdDetector`] implements it with the SCRFD
//! (Sample and Computation Redistribution for Efficient Face Detection) model
//! via ONNX Runtime, using 3-stride anchor decoding and NMS.

use crate::pixel::{Colorspace, PixelBuffer};
use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
/// Merged candidates a SCRFD detection needs, itself included. With two
/// anchors per cell and a 0.5 score gate a small face may yield one or two
/// hits, so a single confident candidate counts as a face.
const SCRFD_MIN_SUPPORT: u32 = 1;

/// Detector tuning applied to every image regardless of size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionTuning {
    /// Step between search scales for pyramid-based detectors.
    pub scale_factor: f32,
    /// Raw candidates that must agree before a detection is reported, for
    /// backends that emit dense overlapping hits.
    pub min_neighbors: u32,
}

/// The only tuning the pipeline ever uses.
pub const DETECTION_TUNING: DetectionTuning = DetectionTuning {
    scale_factor: 1.3,
    min_neighbors: 5,
};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface and place it in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector expects a grayscale buffer, got {0:?}")]
    NotGrayscale(Colorspace),
    #[error("unusable detection {face:?} for a {width}x{height} image")]
    UnusableResult { face: FaceBox, width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face detection capability.
///
/// Implementations are loaded once and shared read-only by every in-flight
/// request, hence `Send + Sync` and `&self`. Calls may block for a long time;
/// callers run them off the async executor.
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a grayscale buffer, in the detector's own stable order.
    fn detect(
        &self,
        gray: &PixelBuffer,
        tuning: &DetectionTuning,
    ) -> Result<Vec<FaceBox>, DetectorError>;
}

/// Float-space candidate produced by SCRFD decoding.
#[derive(Debug, Clone)]
struct Candidate {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    /// ort needs exclusive access to run a session; the weights never change.
    session: Mutex<Session>,
    input_height: usize,
    input_width: usize,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if num_outputs < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            input_height: SCRFD_INPUT_SIZE,
            input_width: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }
}

impl FaceDetector for ScrfdDetector {
    /// SCRFD scores every anchor directly instead of voting over dense
    /// sliding-window hits, so `tuning.min_neighbors` is capped at
    /// [`SCRFD_MIN_SUPPORT`] (see [`min_support`]). It decodes on a fixed
    /// stride set, so `tuning.scale_factor` has no counterpart here.
    fn detect(
        &self,
        gray: &PixelBuffer,
        tuning: &DetectionTuning,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let PixelBuffer::Gray(frame) = gray else {
            return Err(DetectorError::NotGrayscale(gray.colorspace()));
        };
        let (width, height) = (frame.width(), frame.height());
        let (input, letterbox) = letterbox(frame, self.input_width, self.input_height);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                stride,
                self.input_width,
                self.input_height,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let raw = candidates.len();
        let kept = nms(candidates, SCRFD_NMS_THRESHOLD, min_support(tuning));
        let faces: Vec<FaceBox> = kept
            .iter()
            .filter_map(|c| to_face_box(c, width, height))
            .collect();

        tracing::debug!(raw, faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Letterbox a grayscale frame into a 3-channel NCHW tensor of
/// `input_width` × `input_height`, replicating luma into every channel.
fn letterbox(frame: &GrayImage, input_width: usize, input_height: usize) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let scale = (input_width as f32 / width as f32).min(input_height as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as usize).clamp(1, input_width);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, input_height);
    let pad_x = (input_width - new_w) as f32 / 2.0;
    let pad_y = (input_height - new_h) as f32 / 2.0;

    let resized = imageops::resize(frame, new_w as u32, new_h as u32, FilterType::Triangle);
    let (pad_x_start, pad_y_start) = (pad_x.floor() as usize, pad_y.floor() as usize);

    // Padding normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, input_height, input_width));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let normalized = (f32::from(pixel.0[0]) - SCRFD_MEAN) / SCRFD_STD;
        let (tx, ty) = (pad_x_start + x as usize, pad_y_start + y as usize);
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = normalized;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports either name their tensors ("score_8", "bbox_16", ...) or use
/// generic numeric names, in which case the standard positional ordering applies:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_width: usize,
    input_height: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Candidate> {
    let grid_h = input_height / stride;
    let grid_w = input_width / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid_w) as f32 * stride as f32;
        let anchor_cy = (anchor_idx / grid_w) as f32 * stride as f32;

        // [x1_offset, y1_offset, x2_offset, y2_offset] * stride
        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[bbox_off] * stride as f32;
        let y1 = anchor_cy - bboxes[bbox_off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[bbox_off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[bbox_off + 3] * stride as f32;

        // Letterboxed space → original frame space
        let orig_x1 = (x1 - letterbox.pad_x) / letterbox.scale;
        let orig_y1 = (y1 - letterbox.pad_y) / letterbox.scale;
        let orig_x2 = (x2 - letterbox.pad_x) / letterbox.scale;
        let orig_y2 = (y2 - letterbox.pad_y) / letterbox.scale;

        detections.push(Candidate {
            x: orig_x1,
            y: orig_y1,
            width: orig_x2 - orig_x1,
            height: orig_y2 - orig_y1,
            confidence: score,
        });
    }

    detections
}

/// Cluster support SCRFD requires for `tuning`.
fn min_support(tuning: &DetectionTuning) -> u32 {
    tuning.min_neighbors.min(SCRFD_MIN_SUPPORT)
}

/// Non-Maximum Suppression with cluster support.
///
/// A kept detection's cluster (itself plus the candidates it suppressed)
/// must hold at least `min_support` candidates.
fn nms(mut detections: Vec<Candidate>, iou_threshold: f32, min_support: u32) -> Vec<Candidate> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }

        let mut support = 1u32;
        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
                support += 1;
            }
        }

        if support >= min_support {
            keep.push(detections[i].clone());
        }
    }

    keep
}

/// Compute Intersection-over-Union between two candidates.
fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = a.width * a.height;
    let area_b = b.width * b.height;
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

/// Snap a float candidate to whole pixels and intersect it with the image.
fn to_face_box(c: &Candidate, width: u32, height: u32) -> Option<FaceBox> {
    let x0 = c.x.round().clamp(0.0, width as f32) as u32;
    let y0 = c.y.round().clamp(0.0, height as f32) as u32;
    let x1 = (c.x + c.width).round().clamp(0.0, width as f32) as u32;
    let y1 = (c.y + c.height).round().clamp(0.0, height as f32) as u32;

    (x1 > x0 && y1 > y0).then(|| FaceBox::new(x0, y0, x1 - x0, y1 - y0))
}
