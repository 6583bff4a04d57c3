//! Collaborator seams: face detection, embedding extraction and landmark
//! prediction. Implementations live outside the core (see `facegate-models`)
//! and are treated as slow, synchronous black boxes.

use thiserror::Error;

use crate::frame::{GrayFrame, PixelArray};
use crate::types::{FaceVector, Region};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("malformed model output: {0}")]
    MalformedOutput(String),
}

/// Locates faces in an image.
///
/// Ordering of the returned regions is implementation-defined; callers must
/// not rely on it.
pub trait FaceDetector {
    fn detect(&mut self, image: &PixelArray) -> Result<Vec<Region>, ModelError>;
}

/// Produces a face embedding for a detected region.
///
/// `Ok(None)` means the model could not derive a vector for this face.
pub trait EmbeddingExtractor {
    fn extract(
        &mut self,
        image: &PixelArray,
        region: &Region,
    ) -> Result<Option<FaceVector>, ModelError>;
}

/// Predicts dense facial landmarks (68-point geometry) inside a region.
pub trait LandmarkPredictor {
    fn predict(&mut self, gray: &GrayFrame, region: &Region)
        -> Result<Vec<(f32, f32)>, ModelError>;
}
