//! Enrollment quality gate.
//!
//! Rejects images that cannot yield a usable signature before anything is
//! persisted: no detectable face, a face region that is too small, or a face
//! the embedding extractor cannot process.

use thiserror::Error;

use crate::frame::PixelArray;
use crate::models::{EmbeddingExtractor, FaceDetector};
use crate::types::{FaceVector, Region};

/// Minimum face width and height in pixels.
pub const DEFAULT_MIN_FACE_SIZE: u32 = 50;

const ACCEPTED_MESSAGE: &str = "Face detected successfully";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityError {
    #[error("No face detected in the image")]
    NoFaceDetected,
    #[error("Face is too small. Please move closer to the camera")]
    FaceTooSmall { width: f32, height: f32, min: u32 },
    #[error("Could not process face features")]
    EmbeddingUnavailable,
}

/// An accepted image: the face that was validated and its embedding.
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub region: Region,
    pub vector: FaceVector,
    pub message: String,
}

/// Pick the region with the largest area. On an exact tie the earlier region
/// in detector order wins, so the choice never depends on unstable sorting.
pub fn largest_region(regions: &[Region]) -> Option<&Region> {
    let mut best: Option<&Region> = None;
    for region in regions {
        match best {
            Some(b) if region.area() <= b.area() => {}
            _ => best = Some(region),
        }
    }
    best
}

/// Run the detector and select the primary face.
///
/// Detector failures are reported as `NoFaceDetected`.
pub fn detect_primary_face(
    image: &PixelArray,
    detector: &mut dyn FaceDetector,
) -> Result<Region, QualityError> {
    let regions = detector.detect(image).map_err(|e| {
        tracing::warn!(error = %e, "face detector failed");
        QualityError::NoFaceDetected
    })?;

    if regions.len() > 1 {
        tracing::debug!(count = regions.len(), "multiple faces detected; using the largest");
    }

    largest_region(&regions)
        .cloned()
        .ok_or(QualityError::NoFaceDetected)
}

/// Extract an embedding for `region`. Extractor failures and empty results
/// are both reported as `EmbeddingUnavailable`.
pub fn extract_vector(
    image: &PixelArray,
    region: &Region,
    extractor: &mut dyn EmbeddingExtractor,
) -> Result<FaceVector, QualityError> {
    match extractor.extract(image, region) {
        Ok(Some(vector)) => Ok(vector),
        Ok(None) => Err(QualityError::EmbeddingUnavailable),
        Err(e) => {
            tracing::warn!(error = %e, "embedding extractor failed");
            Err(QualityError::EmbeddingUnavailable)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    min_face_size: u32,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FACE_SIZE)
    }
}

impl QualityGate {
    pub fn new(min_face_size: u32) -> Self {
        Self { min_face_size }
    }

    pub fn min_face_size(&self) -> u32 {
        self.min_face_size
    }

    /// Validate an enrollment image. Checks run in order and the first
    /// failure wins; the extractor is only invoked for a face of adequate size.
    pub fn validate(
        &self,
        image: &PixelArray,
        detector: &mut dyn FaceDetector,
        extractor: &mut dyn EmbeddingExtractor,
    ) -> Result<QualityReport, QualityError> {
        let region = detect_primary_face(image, detector)?;

        let min = self.min_face_size as f32;
        if region.width < min || region.height < min {
            return Err(QualityError::FaceTooSmall {
                width: region.width,
                height: region.height,
                min: self.min_face_size,
            });
        }

        let vector = extract_vector(image, &region, extractor)?;

        tracing::debug!(
            width = region.width,
            height = region.height,
            confidence = region.confidence,
            dimension = vector.dimension(),
            "quality gate passed"
        );

        Ok(QualityReport {
            region,
            vector,
            message: ACCEPTED_MESSAGE.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelError;

    fn region(w: f32, h: f32) -> Region {
        Region {
            x: 0.0, y: 0.0, width: w, height: h, confidence: 0.9, landmarks: None,
        }
    }

    struct FixedDetector(Result<Vec<Region>, ModelError>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _image: &PixelArray) -> Result<Vec<Region>, ModelError> {
            self.0.clone()
        }
    }

    /// Records calls and echoes the region width as a 1-d vector.
    struct CountingExtractor {
        calls: usize,
        fail: bool,
    }

    impl EmbeddingExtractor for CountingExtractor {
        fn extract(
            &mut self,
            _image: &PixelArray,
            region: &Region,
        ) -> Result<Option<FaceVector>, ModelError> {
            self.calls += 1;
            if self.fail {
                return Ok(None);
            }
            Ok(Some(FaceVector::new(vec![region.width]).unwrap()))
        }
    }

    fn image() -> PixelArray {
        PixelArray::new(200, 200)
    }

    fn extractor() -> CountingExtractor {
        CountingExtractor { calls: 0, fail: false }
    }

    #[test]
    fn test_no_face_skips_extractor() {
        let mut det = FixedDetector(Ok(vec![]));
        let mut ext = extractor();
        let err = QualityGate::default().validate(&image(), &mut det, &mut ext).unwrap_err();
        assert_eq!(err, QualityError::NoFaceDetected);
        assert_eq!(err.to_string(), "No face detected in the image");
        assert_eq!(ext.calls, 0);
    }

    #[test]
    fn test_detector_failure_is_no_face() {
        let mut det = FixedDetector(Err(ModelError::Inference("boom".into())));
        let mut ext = extractor();
        let err = QualityGate::default().validate(&image(), &mut det, &mut ext).unwrap_err();
        assert_eq!(err, QualityError::NoFaceDetected);
        assert_eq!(ext.calls, 0);
    }

    #[test]
    fn test_face_too_small() {
        let mut det = FixedDetector(Ok(vec![region(49.0, 80.0)]));
        let mut ext = extractor();
        let err = QualityGate::default().validate(&image(), &mut det, &mut ext).unwrap_err();
        assert!(matches!(err, QualityError::FaceTooSmall { min: 50, .. }));
        assert_eq!(err.to_string(), "Face is too small. Please move closer to the camera");
        assert_eq!(ext.calls, 0);
    }

    #[test]
    fn test_face_height_too_small() {
        let mut det = FixedDetector(Ok(vec![region(80.0, 30.0)]));
        let mut ext = extractor();
        let err = QualityGate::default().validate(&image(), &mut det, &mut ext).unwrap_err();
        assert!(matches!(err, QualityError::FaceTooSmall { .. }));
    }

    #[test]
    fn test_minimum_size_is_inclusive() {
        let mut det = FixedDetector(Ok(vec![region(50.0, 50.0)]));
        let mut ext = extractor();
        assert!(QualityGate::default().validate(&image(), &mut det, &mut ext).is_ok());
    }

    #[test]
    fn test_embedding_unavailable() {
        let mut det = FixedDetector(Ok(vec![region(100.0, 100.0)]));
        let mut ext = CountingExtractor { calls: 0, fail: true };
        let err = QualityGate::default().validate(&image(), &mut det, &mut ext).unwrap_err();
        assert_eq!(err, QualityError::EmbeddingUnavailable);
        assert_eq!(err.to_string(), "Could not process face features");
        assert_eq!(ext.calls, 1);
    }

    #[test]
    fn test_success_reports_largest_face() {
        // A small face listed first must not shadow the larger one.
        let mut det = FixedDetector(Ok(vec![region(60.0, 60.0), region(120.0, 110.0)]));
        let mut ext = extractor();
        let report = QualityGate::default().validate(&image(), &mut det, &mut ext).unwrap();
        assert_eq!(report.message, "Face detected successfully");
        assert_eq!(report.region.width, 120.0);
        assert_eq!(report.vector.values(), &[120.0]);
    }

    #[test]
    fn test_largest_region_tie_keeps_first() {
        let mut a = region(100.0, 100.0);
        a.confidence = 0.1;
        let mut b = region(100.0, 100.0);
        b.confidence = 0.9;
        let regions = [a, b];
        assert_eq!(largest_region(&regions).unwrap().confidence, 0.1);
    }

    #[test]
    fn test_largest_region_empty() {
        assert!(largest_region(&[]).is_none());
    }

    #[test]
    fn test_custom_min_face_size() {
        let gate = QualityGate::new(20);
        assert_eq!(gate.min_face_size(), 20);
        let mut det = FixedDetector(Ok(vec![region(25.0, 25.0)]));
        let mut ext = extractor();
        assert!(gate.validate(&image(), &mut det, &mut ext).is_ok());
    }
}
