//! Nearest-signature search under a Euclidean distance threshold.

use thiserror::Error;

use crate::types::{EnrolledSignature, FaceVector, MatchOutcome, MatchResult};

/// Default acceptance threshold. Lower is stricter; 0.4–0.6 is the useful range.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Euclidean distance between two vectors of equal dimensionality.
pub fn distance(a: &FaceVector, b: &FaceVector) -> Result<f32, MatchError> {
    if a.dimension() != b.dimension() {
        return Err(MatchError::DimensionMismatch {
            expected: a.dimension(),
            actual: b.dimension(),
        });
    }
    Ok(a.values()
        .iter()
        .zip(b.values())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// Map a distance to a similarity in [0, 1]: `max(0, 1 - distance)`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

pub fn similarity(a: &FaceVector, b: &FaceVector) -> Result<f32, MatchError> {
    distance(a, b).map(similarity_from_distance)
}

/// Strategy for searching a gallery of enrolled signatures.
pub trait Matcher {
    fn find_match(
        &self,
        query: &FaceVector,
        candidates: &[EnrolledSignature],
    ) -> Result<MatchOutcome, MatchError>;
}

/// Linear-scan Euclidean matcher returning the single best signature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignatureMatcher {
    threshold: f32,
}

impl Default for SignatureMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl SignatureMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Matcher for SignatureMatcher {
    /// Scans every candidate. The threshold is inclusive, and among equally
    /// distant candidates the first one in `candidates` order wins.
    fn find_match(
        &self,
        query: &FaceVector,
        candidates: &[EnrolledSignature],
    ) -> Result<MatchOutcome, MatchError> {
        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, candidate) in candidates.iter().enumerate() {
            let d = distance(query, &candidate.vector)?;
            if best_idx.is_none() || d < best_distance {
                best_distance = d;
                best_idx = Some(i);
            }
        }

        let outcome = match best_idx {
            Some(idx) if best_distance <= self.threshold => {
                let best = &candidates[idx];
                MatchOutcome::Match(MatchResult {
                    signature_id: best.signature_id,
                    owner_id: best.owner_id,
                    similarity: similarity_from_distance(best_distance),
                })
            }
            Some(_) => MatchOutcome::NoMatch {
                closest_distance: Some(best_distance),
            },
            None => MatchOutcome::NoMatch {
                closest_distance: None,
            },
        };

        tracing::debug!(
            candidates = candidates.len(),
            closest = ?best_idx.map(|_| best_distance),
            threshold = self.threshold,
            matched = outcome.matched().is_some(),
            "signature search complete"
        );

        Ok(outcome)
    }
}
