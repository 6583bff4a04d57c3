//! facegate-models: ONNX Runtime implementations of the face collaborators.
//!
//! - [`ScrfdDetector`]: SCRFD face detection with five-point landmarks.
//! - [`ArcFaceExtractor`]: aligned ArcFace embeddings (512-d, unit length).
//! - [`LandmarkRegressor`]: 68-point landmarks for blink liveness.
//!
//! All run on CPU.

pub mod alignment;
pub mod detector;
pub mod landmarks;
pub mod recognizer;

use ort::session::Session;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use detector::ScrfdDetector;
pub use landmarks::LandmarkRegressor;
pub use recognizer::ArcFaceExtractor;

const DETECTOR_FILE: &str = "det_10g.onnx";
const EXTRACTOR_FILE: &str = "w600k_r50.onnx";
const LANDMARK_FILE: &str = "landmarks_68.onnx";
const INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),
    #[error("invalid model {path}: {reason}")]
    InvalidModel { path: PathBuf, reason: String },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Model file locations inside a model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub extractor: PathBuf,
    pub landmarks: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_FILE),
            extractor: dir.join(EXTRACTOR_FILE),
            landmarks: dir.join(LANDMARK_FILE),
        }
    }
}

/// Default model directory: `$XDG_DATA_HOME/facegate/models`, falling back to
/// `~/.local/share/facegate/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
        .join("models")
}

pub(crate) fn open_session(path: &Path) -> Result<Session, ModelLoadError> {
    if !path.exists() {
        return Err(ModelLoadError::NotFound(path.to_path_buf()));
    }
    let session = Session::builder()?
        .with_intra_threads(INTRA_THREADS)?
        .commit_from_file(path)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/opt/models"));
        assert_eq!(paths.detector, PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(paths.extractor, PathBuf::from("/opt/models/w600k_r50.onnx"));
        assert_eq!(paths.landmarks, PathBuf::from("/opt/models/landmarks_68.onnx"));
    }

    #[test]
    fn test_default_model_dir_suffix() {
        assert!(default_model_dir().ends_with("facegate/models"));
    }

    #[test]
    fn test_missing_detector_is_not_found() {
        let err = ScrfdDetector::load(Path::new("/nonexistent/det_10g.onnx"))
            .err()
            .expect("load must fail");
        assert!(matches!(err, ModelLoadError::NotFound(p) if p.ends_with("det_10g.onnx")));
    }
}
