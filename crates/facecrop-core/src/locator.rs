//! Face locator: runs the shared detector off the async executor and picks
//! the primary face.

use crate::detector::{DetectorError, FaceDetector, DETECTION_TUNING};
use crate::error::ProcessingError;
use crate::pixel::PixelBuffer;
use crate::types::FaceBox;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Bounded worker pool in front of a single read-only detector instance.
#[derive(Clone)]
pub struct FaceLocator {
    detector: Arc<dyn FaceDetector>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl FaceLocator {
    /// `max_concurrent` is raised to 1 if zero.
    pub fn new(detector: Arc<dyn FaceDetector>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            detector,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Detect every face in `gray`. An empty result is not an error.
    ///
    /// The detector runs on the blocking pool. The permit moves into the
    /// blocking task, so a call that times out keeps its slot until the
    /// detector actually returns.
    pub async fn locate(&self, gray: PixelBuffer) -> Result<Vec<FaceBox>, ProcessingError> {
        let (width, height) = (gray.width(), gray.height());

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ProcessingError::Internal("detector pool closed".into()))?;

        let detector = Arc::clone(&self.detector);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            detector.detect(&gray, &DETECTION_TUNING)
        });

        let faces = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "face detection timed out");
                return Err(ProcessingError::DetectionTimeout(self.timeout));
            }
            Ok(Err(join_err)) => {
                tracing::error!(error = %join_err, "detector task failed");
                return Err(DetectorError::InferenceFailed(format!("detector task failed: {join_err}")).into());
            }
            Ok(Ok(result)) => result?,
        };

        if let Some(bad) = faces.iter().find(|f| !f.fits_within(width, height)) {
            return Err(DetectorError::UnusableResult {
                face: *bad,
                width,
                height,
            }
            .into());
        }

        tracing::debug!(count = faces.len(), "faces located");
        Ok(faces)
    }
}

/// The face with the largest area; the first one wins a tie.
pub fn select_primary(faces: &[FaceBox]) -> Option<FaceBox> {
    let mut best: Option<FaceBox> = None;
    for face in faces {
        match best {
            Some(current) if face.area() <= current.area() => {}
            _ => best = Some(*face),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionTuning;
    use image::GrayImage;

    struct FixedDetector(Vec<FaceBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _: &PixelBuffer, _: &DetectionTuning) -> Result<Vec<FaceBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct SleepyDetector(Duration);

    impl FaceDetector for SleepyDetector {
        fn detect(&self, _: &PixelBuffer, _: &DetectionTuning) -> Result<Vec<FaceBox>, DetectorError> {
            std::thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    struct PanickingDetector;

    impl FaceDetector for PanickingDetector {
        fn detect(&self, _: &PixelBuffer, _: &DetectionTuning) -> Result<Vec<FaceBox>, DetectorError> {
            panic!("classifier exploded");
        }
    }

    fn gray(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::Gray(GrayImage::new(width, height))
    }

    fn locator(detector: impl FaceDetector + 'static, timeout: Duration) -> FaceLocator {
        FaceLocator::new(Arc::new(detector), 2, timeout)
    }

    #[test]
    fn test_select_primary_largest_area() {
        let faces = [
            FaceBox::new(0, 0, 10, 10),
            FaceBox::new(50, 50, 30, 20),
            FaceBox::new(5, 5, 20, 20),
        ];
        assert_eq!(select_primary(&faces), Some(FaceBox::new(50, 50, 30, 20)));
    }

    #[test]
    fn test_select_primary_tie_keeps_first() {
        let faces = [
            FaceBox::new(0, 0, 20, 10),
            FaceBox::new(40, 40, 10, 20),
        ];
        assert_eq!(select_primary(&faces), Some(FaceBox::new(0, 0, 20, 10)));
    }

    #[test]
    fn test_select_primary_empty() {
        assert_eq!(select_primary(&[]), None);
    }

    #[tokio::test]
    async fn test_locate_returns_detector_boxes() {
        let boxes = vec![FaceBox::new(10, 10, 20, 20), FaceBox::new(40, 40, 5, 5)];
        let loc = locator(FixedDetector(boxes.clone()), Duration::from_secs(5));
        assert_eq!(loc.locate(gray(100, 100)).await.unwrap(), boxes);
    }

    #[tokio::test]
    async fn test_locate_no_faces_is_ok() {
        let loc = locator(FixedDetector(Vec::new()), Duration::from_secs(5));
        assert!(loc.locate(gray(100, 100)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_locate_rejects_box_outside_image() {
        let loc = locator(FixedDetector(vec![FaceBox::new(90, 90, 20, 20)]), Duration::from_secs(5));
        let err = loc.locate(gray(100, 100)).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::DetectionFailure(DetectorError::UnusableResult { .. })
        ));
    }

    #[tokio::test]
    async fn test_locate_times_out() {
        let loc = locator(SleepyDetector(Duration::from_millis(500)), Duration::from_millis(20));
        let err = loc.locate(gray(10, 10)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::DetectionTimeout(_)));
    }

    #[tokio::test]
    async fn test_locate_panic_is_detection_failure() {
        let loc = locator(PanickingDetector, Duration::from_secs(5));
        let err = loc.locate(gray(10, 10)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::DetectionFailure(_)));
    }
}
