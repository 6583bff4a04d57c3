//! facegate-core: face signature matching and liveness verification.
//!
//! Pure, synchronous building blocks. Model inference sits behind the
//! collaborator traits in [`models`]; persistence and transport live in the
//! daemon.

pub mod codec;
pub mod frame;
pub mod liveness;
pub mod matcher;
pub mod models;
pub mod quality;
pub mod types;

pub use frame::{FrameStatistics, GrayFrame, PixelArray};
pub use liveness::{LivenessConfig, LivenessOutcome, LivenessVerifier};
pub use matcher::{Matcher, SignatureMatcher};
pub use models::{EmbeddingExtractor, FaceDetector, LandmarkPredictor, ModelError};
pub use quality::{QualityError, QualityGate, QualityReport};
pub use types::{EnrolledSignature, FaceVector, MatchOutcome, MatchResult, Region};
