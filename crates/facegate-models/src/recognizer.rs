//! ArcFace embedding extractor via ONNX Runtime.
//!
//! Extracts L2-normalized 512-dimensional embeddings from aligned RGB face
//! crops using the w600k_r50 model.

use facegate_core::frame::PixelArray;
use facegate_core::models::{EmbeddingExtractor, ModelError};
use facegate_core::types::{FaceVector, Region};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

use crate::alignment::{self, ALIGNED_SIZE};
use crate::{open_session, ModelLoadError};

const ARCFACE_MEAN: f32 = 127.5;
// Symmetric normalization, unlike SCRFD's 128.0.
const ARCFACE_STD: f32 = 127.5;
pub const ARCFACE_EMBEDDING_DIM: usize = 512;

/// ArcFace-based embedding extractor.
pub struct ArcFaceExtractor {
    session: Session,
}

impl ArcFaceExtractor {
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        let session = open_session(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Preprocess a 112×112 aligned RGB crop into a NCHW float tensor.
    fn preprocess(aligned: &RgbImage) -> Array4<f32> {
        let size = ALIGNED_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, px) in aligned.enumerate_pixels() {
            for (c, &v) in px.0.iter().enumerate() {
                tensor[[0, c, y as usize, x as usize]] = (v as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }

    fn infer(&mut self, aligned: &RgbImage) -> Result<Vec<f32>, ModelError> {
        let input = Self::preprocess(aligned);
        let tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::MalformedOutput(format!("embedding: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ModelError::MalformedOutput(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(l2_normalize(raw.to_vec()))
    }
}

/// Scale to unit length; a zero vector is returned unchanged.
fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }
    values
}

impl EmbeddingExtractor for ArcFaceExtractor {
    /// Returns `Ok(None)` when the region carries no alignment landmarks or
    /// the model produced an unusable (non-finite) vector.
    fn extract(
        &mut self,
        image: &PixelArray,
        region: &Region,
    ) -> Result<Option<FaceVector>, ModelError> {
        let Some(landmarks) = region.landmarks.as_ref() else {
            tracing::debug!("region has no landmarks; cannot align for embedding");
            return Ok(None);
        };

        let aligned = alignment::align_face(image, landmarks);
        let values = self.infer(&aligned)?;

        match FaceVector::new(values) {
            Ok(vector) => Ok(Some(vector)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding ArcFace embedding");
                Ok(None)
            }
        }
    }
}
