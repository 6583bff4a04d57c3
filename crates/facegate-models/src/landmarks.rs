//! 68-point facial landmark regressor via ONNX Runtime.
//!
//! PFLD-style model: a square crop around the face region (expanded by 10%)
//! is resized to 112×112, scaled to [0, 1] and replicated across three
//! channels. The model emits 136 values, `(x, y)` pairs normalized to the crop.

use facegate_core::frame::GrayFrame;
use facegate_core::models::{LandmarkPredictor, ModelError};
use facegate_core::types::Region;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

use crate::{open_session, ModelLoadError};

const LANDMARK_INPUT_SIZE: usize = 112;
const LANDMARK_POINTS: usize = 68;
const CROP_EXPANSION: f32 = 1.1;

/// Square crop window in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropWindow {
    x0: f32,
    y0: f32,
    side: f32,
}

impl CropWindow {
    fn around(region: &Region) -> Self {
        let side = region.width.max(region.height).max(1.0) * CROP_EXPANSION;
        let cx = region.x + region.width / 2.0;
        let cy = region.y + region.height / 2.0;
        Self {
            x0: cx - side / 2.0,
            y0: cy - side / 2.0,
            side,
        }
    }

    /// Map a crop-normalized point back to frame coordinates.
    fn to_frame(self, nx: f32, ny: f32) -> (f32, f32) {
        (self.x0 + nx * self.side, self.y0 + ny * self.side)
    }
}

pub struct LandmarkRegressor {
    session: Session,
}

impl LandmarkRegressor {
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        let session = open_session(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded landmark model");
        Ok(Self { session })
    }
}

/// Bilinear crop of `window` into a normalized NCHW tensor. Samples outside
/// the frame are black.
fn preprocess(gray: &GrayFrame, window: CropWindow) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE;
    let (w, h) = (gray.width as i64, gray.height as i64);
    let step = window.side / size as f32;

    let sample = |x: i64, y: i64| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            gray.data[(y * w + x) as usize] as f32
        } else {
            0.0
        }
    };

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for oy in 0..size {
        let sy = window.y0 + (oy as f32 + 0.5) * step - 0.5;
        let y0 = sy.floor();
        let fy = sy - y0;
        for ox in 0..size {
            let sx = window.x0 + (ox as f32 + 0.5) * step - 0.5;
            let x0 = sx.floor();
            let fx = sx - x0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            let normalized = val / 255.0;
            for c in 0..3 {
                tensor[[0, c, oy, ox]] = normalized;
            }
        }
    }
    tensor
}

/// Turn raw model output into frame-space points.
fn decode_points(raw: &[f32], window: CropWindow) -> Result<Vec<(f32, f32)>, ModelError> {
    if raw.len() < LANDMARK_POINTS * 2 {
        return Err(ModelError::MalformedOutput(format!(
            "expected {} landmark values, got {}",
            LANDMARK_POINTS * 2,
            raw.len()
        )));
    }
    Ok(raw[..LANDMARK_POINTS * 2]
        .chunks_exact(2)
        .map(|p| window.to_frame(p[0], p[1]))
        .collect())
}

impl LandmarkPredictor for LandmarkRegressor {
    fn predict(&mut self, gray: &GrayFrame, region: &Region) -> Result<Vec<(f32, f32)>, ModelError> {
        if gray.width == 0 || gray.height == 0 {
            return Err(ModelError::Inference("empty frame".into()));
        }

        let window = CropWindow::around(region);
        let input = preprocess(gray, window);
        let tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::MalformedOutput(format!("landmarks: {e}")))?;

        decode_points(raw, window)
    }
}
