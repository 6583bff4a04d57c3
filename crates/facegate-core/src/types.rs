use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest dimensionality a [`FaceVector`] may have (bounded by the codec's
/// 16-bit dimension field).
pub const MAX_DIMENSIONS: usize = u16::MAX as usize;

/// Persistence-assigned identifier of an enrolled signature.
pub type SignatureId = i64;
/// Persistence-assigned identifier of the user owning a signature.
pub type OwnerId = i64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VectorError {
    #[error("face vector is empty")]
    Empty,
    #[error("face vector holds a non-finite value at index {0}")]
    NonFinite(usize),
    #[error("face vector has {0} dimensions (max {MAX_DIMENSIONS})")]
    TooManyDimensions(usize),
}

/// Fixed-length face embedding produced by an embedding extractor.
///
/// Immutable once built. Construction guarantees the vector is non-empty,
/// finite and small enough for the storage codec.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceVector {
    values: Vec<f32>,
}

impl FaceVector {
    pub fn new(values: Vec<f32>) -> Result<Self, VectorError> {
        if values.is_empty() {
            return Err(VectorError::Empty);
        }
        if values.len() > MAX_DIMENSIONS {
            return Err(VectorError::TooManyDimensions(values.len()));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(VectorError::NonFinite(idx));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

impl TryFrom<Vec<f32>> for FaceVector {
    type Error = VectorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

/// A stored face signature, as handed over by the persistence layer.
#[derive(Debug, Clone)]
pub struct EnrolledSignature {
    pub signature_id: SignatureId,
    pub owner_id: OwnerId,
    pub vector: FaceVector,
    pub created_at: String,
}

/// Nearest enrolled signature within the acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub signature_id: SignatureId,
    pub owner_id: OwnerId,
    /// `max(0, 1 - distance)`, in [0, 1].
    pub similarity: f32,
}

/// Outcome of a gallery search. `NoMatch` is an expected business result.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match(MatchResult),
    NoMatch {
        /// Distance to the nearest candidate, `None` for an empty gallery.
        closest_distance: Option<f32>,
    },
}

impl MatchOutcome {
    pub fn matched(&self) -> Option<&MatchResult> {
        match self {
            MatchOutcome::Match(result) => Some(result),
            MatchOutcome::NoMatch { .. } => None,
        }
    }
}

/// Bounding region for a detected face, with optional five-point landmarks
/// `[left_eye, right_eye, nose, left_mouth, right_mouth]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl Region {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}
