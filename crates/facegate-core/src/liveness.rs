//! Liveness verification: a static single-frame heuristic and a temporal
//! blink detector.
//!
//! The static check flags frames that are too blurry or too flat to come from
//! a live camera feed pointed at a face (printed photos, phone screens).
//!
//! The blink check tracks the Eye Aspect Ratio (EAR) over a short frame
//! sequence:
//!
//! ```text
//! EAR = (‖p2 − p6‖ + ‖p3 − p5‖) / (2 · ‖p1 − p4‖)
//! ```
//!
//! An open eye sits around 0.3; a closed eye drops towards 0. A blink is
//! confirmed when, after at least one open-eye frame, the averaged EAR stays
//! below the threshold for a run of consecutive frames.
//!
//! # Threat Coverage
//!
//! - **Blocks:** static photographs, low-effort screen replays.
//! - **Does not block:** video replays containing a blink, 3D masks. Both
//!   checks are best-effort heuristics, not proof of liveness.

use std::ops::Range;

use thiserror::Error;

use crate::frame::{FrameStatistics, GrayFrame, PixelArray};
use crate::models::{FaceDetector, LandmarkPredictor};
use crate::quality::largest_region;

/// Eye landmark indices in the 68-point face geometry.
pub const LEFT_EYE: Range<usize> = 36..42;
pub const RIGHT_EYE: Range<usize> = 42..48;

const BLINK_CONFIRMED: &str = "Liveness verified (blink detected)";
const NO_BLINK: &str = "Liveness check failed (no blink detected)";
const PREDICTOR_MISSING: &str = "Liveness check skipped (landmark model not loaded)";
const BLURRY: &str = "Image appears to be blurry or a photo of a screen";
const LOW_CONTRAST: &str = "Image has unusually low contrast";
const STATIC_PASSED: &str = "Basic liveness check passed";

/// Tunable thresholds. Defaults are empirical and unvalidated against a
/// calibration set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessConfig {
    /// Averaged EAR below this value counts as closed eyes.
    pub ear_threshold: f32,
    /// Consecutive closed-eye frames required to confirm a blink.
    pub consecutive_closed_frames: u32,
    /// Minimum frame sequence length for the blink check.
    pub min_frames: usize,
    /// Minimum Laplacian variance for the static check.
    pub min_sharpness: f64,
    /// Minimum grayscale standard deviation for the static check.
    pub min_contrast: f64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            consecutive_closed_frames: 2,
            min_frames: 5,
            min_sharpness: 50.0,
            min_contrast: 20.0,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LivenessError {
    #[error("Not enough frames for liveness check (got {got}, need {required})")]
    InsufficientFrames { got: usize, required: usize },
}

/// Terminal verdict of a liveness check, with a user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessOutcome {
    Confirmed(String),
    Failed(String),
}

impl LivenessOutcome {
    pub fn is_live(&self) -> bool {
        matches!(self, LivenessOutcome::Confirmed(_))
    }

    pub fn message(&self) -> &str {
        match self {
            LivenessOutcome::Confirmed(msg) | LivenessOutcome::Failed(msg) => msg,
        }
    }
}

/// Result of [`LivenessVerifier::simple_check`].
#[derive(Debug, Clone, PartialEq)]
pub struct StaticCheck {
    pub outcome: LivenessOutcome,
    pub statistics: FrameStatistics,
}

/// Result of [`LivenessVerifier::check_liveness`].
#[derive(Debug, Clone, PartialEq)]
pub struct BlinkCheck {
    pub outcome: LivenessOutcome,
    /// Frames processed before the verdict (the scan stops at a confirmed blink).
    pub frames_examined: usize,
    pub final_state: EyeState,
}

/// Eye state machine driven by per-frame EAR samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeState {
    /// No open-eye frame observed yet.
    Unknown,
    Open,
    /// Eyes closed for this many consecutive frames after an open frame.
    Closing(u32),
    BlinkConfirmed,
}

/// Per-frame eye measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeSample {
    pub blinking: bool,
    pub ear: f32,
}

impl EyeSample {
    /// Sample used when no face or no landmarks could be found.
    pub const NO_FACE: EyeSample = EyeSample {
        blinking: false,
        ear: 0.0,
    };

    pub fn from_ear(ear: f32, threshold: f32) -> Self {
        Self {
            blinking: ear < threshold,
            ear,
        }
    }
}

/// Blink counter scoped to a single verification call.
#[derive(Debug, Clone)]
pub struct BlinkTracker {
    state: EyeState,
    required: u32,
}

impl BlinkTracker {
    pub fn new(consecutive_closed_frames: u32) -> Self {
        Self {
            state: EyeState::Unknown,
            required: consecutive_closed_frames,
        }
    }

    pub fn state(&self) -> EyeState {
        self.state
    }

    /// Feed one sample and return the new state.
    ///
    /// Closed-eye samples before the first open sample are ignored, and
    /// samples without a face (`ear == 0`, not blinking) leave the state as is.
    pub fn observe(&mut self, sample: EyeSample) -> EyeState {
        let opened = !sample.blinking && sample.ear > 0.0;
        self.state = match self.state {
            EyeState::BlinkConfirmed => EyeState::BlinkConfirmed,
            _ if opened => EyeState::Open,
            EyeState::Open if sample.blinking => self.close_once(0),
            EyeState::Closing(n) if sample.blinking => self.close_once(n),
            state => state,
        };
        self.state
    }

    fn close_once(&self, closed: u32) -> EyeState {
        let closed = closed + 1;
        if closed >= self.required {
            EyeState::BlinkConfirmed
        } else {
            EyeState::Closing(closed)
        }
    }
}

/// Eye Aspect Ratio of six eye landmarks `[p1..p6]`. Returns 0 when the
/// horizontal eye extent is degenerate.
pub fn eye_aspect_ratio(eye: &[(f32, f32); 6]) -> f32 {
    let dist = |a: (f32, f32), b: (f32, f32)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();

    let vertical_a = dist(eye[1], eye[5]);
    let vertical_b = dist(eye[2], eye[4]);
    let horizontal = dist(eye[0], eye[3]);

    if horizontal > 0.0 {
        (vertical_a + vertical_b) / (2.0 * horizontal)
    } else {
        0.0
    }
}

/// Average EAR of both eyes from a 68-point landmark set.
pub fn average_ear(landmarks: &[(f32, f32)]) -> Option<f32> {
    let left: &[(f32, f32); 6] = landmarks.get(LEFT_EYE)?.try_into().ok()?;
    let right: &[(f32, f32); 6] = landmarks.get(RIGHT_EYE)?.try_into().ok()?;
    Some((eye_aspect_ratio(left) + eye_aspect_ratio(right)) / 2.0)
}

/// Stateless liveness service. Safe to share; every call builds its own
/// scratch state.
#[derive(Debug, Clone, Copy, Default)]
pub struct LivenessVerifier {
    config: LivenessConfig,
}

impl LivenessVerifier {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Single-frame sharpness and contrast heuristic.
    pub fn simple_check(&self, frame: &PixelArray) -> StaticCheck {
        let statistics = GrayFrame::from_rgb(frame).statistics();

        let outcome = if statistics.sharpness < self.config.min_sharpness {
            LivenessOutcome::Failed(BLURRY.to_string())
        } else if statistics.contrast < self.config.min_contrast {
            LivenessOutcome::Failed(LOW_CONTRAST.to_string())
        } else {
            LivenessOutcome::Confirmed(STATIC_PASSED.to_string())
        };

        tracing::debug!(
            sharpness = statistics.sharpness,
            contrast = statistics.contrast,
            live = outcome.is_live(),
            "static liveness check"
        );

        StaticCheck {
            outcome,
            statistics,
        }
    }

    /// Temporal blink check over a frame sequence.
    ///
    /// Without a landmark predictor the check cannot run and passes with a
    /// diagnostic message instead of blocking authentication.
    pub fn check_liveness(
        &self,
        frames: &[PixelArray],
        detector: &mut dyn FaceDetector,
        predictor: Option<&mut dyn LandmarkPredictor>,
    ) -> Result<BlinkCheck, LivenessError> {
        let Some(predictor) = predictor else {
            tracing::warn!("landmark predictor unavailable; blink liveness check skipped");
            return Ok(BlinkCheck {
                outcome: LivenessOutcome::Confirmed(PREDICTOR_MISSING.to_string()),
                frames_examined: 0,
                final_state: EyeState::Unknown,
            });
        };

        if frames.len() < self.config.min_frames {
            return Err(LivenessError::InsufficientFrames {
                got: frames.len(),
                required: self.config.min_frames,
            });
        }

        let mut tracker = BlinkTracker::new(self.config.consecutive_closed_frames);
        let mut frames_examined = 0;

        for frame in frames {
            frames_examined += 1;
            let sample = self.eye_sample(frame, detector, &mut *predictor);
            let state = tracker.observe(sample);
            tracing::trace!(frame = frames_examined, ear = sample.ear, ?state, "eye sample");
            if state == EyeState::BlinkConfirmed {
                break;
            }
        }

        let final_state = tracker.state();
        let outcome = if final_state == EyeState::BlinkConfirmed {
            LivenessOutcome::Confirmed(BLINK_CONFIRMED.to_string())
        } else {
            LivenessOutcome::Failed(NO_BLINK.to_string())
        };

        tracing::info!(
            frames = frames.len(),
            frames_examined,
            live = outcome.is_live(),
            "blink liveness check"
        );

        Ok(BlinkCheck {
            outcome,
            frames_examined,
            final_state,
        })
    }

    /// Measure one frame. Model failures degrade to a no-face sample.
    fn eye_sample(
        &self,
        frame: &PixelArray,
        detector: &mut dyn FaceDetector,
        predictor: &mut dyn LandmarkPredictor,
    ) -> EyeSample {
        let regions = match detector.detect(frame) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(error = %e, "liveness: face detection failed");
                return EyeSample::NO_FACE;
            }
        };
        let Some(region) = largest_region(&regions) else {
            return EyeSample::NO_FACE;
        };

        let gray = GrayFrame::from_rgb(frame);
        let landmarks = match predictor.predict(&gray, region) {
            Ok(points) => points,
            Err(e) => {
                tracing::warn!(error = %e, "liveness: landmark prediction failed");
                return EyeSample::NO_FACE;
            }
        };

        match average_ear(&landmarks) {
            Some(ear) => EyeSample::from_ear(ear, self.config.ear_threshold),
            None => {
                tracing::warn!(points = landmarks.len(), "liveness: too few landmarks");
                EyeSample::NO_FACE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelError;
    use crate::types::Region;
    use image::Rgb;

    const OPEN_EAR: f32 = 0.3;
    const CLOSED_EAR: f32 = 0.1;

    fn face() -> Region {
        Region {
            x: 10.0, y: 10.0, width: 80.0, height: 80.0, confidence: 0.9, landmarks: None,
        }
    }

    /// Six eye points with the given EAR: horizontal extent 10, vertical
    /// extent `ear * 10` for both vertical pairs.
    fn eye(origin_x: f32, ear: f32) -> [(f32, f32); 6] {
        let h = ear * 10.0 / 2.0;
        [
            (origin_x, 0.0),
            (origin_x + 3.0, -h),
            (origin_x + 7.0, -h),
            (origin_x + 10.0, 0.0),
            (origin_x + 7.0, h),
            (origin_x + 3.0, h),
        ]
    }

    fn landmarks_with_ear(ear: f32) -> Vec<(f32, f32)> {
        let mut points = vec![(0.0, 0.0); 68];
        points[LEFT_EYE].copy_from_slice(&eye(20.0, ear));
        points[RIGHT_EYE].copy_from_slice(&eye(50.0, ear));
        points
    }

    /// Encodes the scripted EAR of each frame in the red channel of pixel
    /// (0, 0) as `ear * 100`; red 255 means "no face in this frame".
    fn frame(ear: Option<f32>) -> PixelArray {
        let red = ear.map(|e| (e * 100.0).round() as u8).unwrap_or(255);
        PixelArray::from_pixel(8, 8, Rgb([red, 0, 0]))
    }

    fn script(ears: &[f32]) -> Vec<PixelArray> {
        ears.iter().map(|&e| frame(Some(e))).collect()
    }

    struct ScriptedDetector {
        calls: usize,
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, image: &PixelArray) -> Result<Vec<Region>, ModelError> {
            self.calls += 1;
            if image.get_pixel(0, 0).0[0] == 255 {
                Ok(vec![])
            } else {
                Ok(vec![face()])
            }
        }
    }

    /// Reads the scripted EAR back from the grayscale frame. Gray of a pure
    /// red pixel is `0.299 * red`, so invert that.
    struct ScriptedPredictor;

    impl LandmarkPredictor for ScriptedPredictor {
        fn predict(
            &mut self,
            gray: &GrayFrame,
            _region: &Region,
        ) -> Result<Vec<(f32, f32)>, ModelError> {
            let red = (gray.data[0] as f32 / 0.299).round();
            let ear = (red / 100.0 * 10.0).round() / 10.0;
            Ok(landmarks_with_ear(ear))
        }
    }

    struct FailingPredictor;

    impl LandmarkPredictor for FailingPredictor {
        fn predict(&mut self, _: &GrayFrame, _: &Region) -> Result<Vec<(f32, f32)>, ModelError> {
            Err(ModelError::Inference("no model".into()))
        }
    }

    fn run(ears: &[f32]) -> Result<BlinkCheck, LivenessError> {
        let mut detector = ScriptedDetector { calls: 0 };
        let mut predictor = ScriptedPredictor;
        LivenessVerifier::default().check_liveness(&script(ears), &mut detector, Some(&mut predictor))
    }

    #[test]
    fn test_eye_aspect_ratio_geometry() {
        assert!((eye_aspect_ratio(&eye(0.0, 0.3)) - 0.3).abs() < 1e-6);
        assert!((eye_aspect_ratio(&eye(5.0, 0.1)) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_eye_aspect_ratio_degenerate() {
        assert_eq!(eye_aspect_ratio(&[(1.0, 1.0); 6]), 0.0);
    }

    #[test]
    fn test_average_ear_requires_eye_points() {
        assert!(average_ear(&[(0.0, 0.0); 40]).is_none());
        let ear = average_ear(&landmarks_with_ear(0.2)).unwrap();
        assert!((ear - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_tracker_open_closed_closed_confirms() {
        let mut t = BlinkTracker::new(2);
        assert_eq!(t.observe(EyeSample::from_ear(OPEN_EAR, 0.25)), EyeState::Open);
        assert_eq!(t.observe(EyeSample::from_ear(CLOSED_EAR, 0.25)), EyeState::Closing(1));
        assert_eq!(t.observe(EyeSample::from_ear(CLOSED_EAR, 0.25)), EyeState::BlinkConfirmed);
        // Confirmation is terminal.
        assert_eq!(t.observe(EyeSample::from_ear(OPEN_EAR, 0.25)), EyeState::BlinkConfirmed);
    }

    #[test]
    fn test_tracker_ignores_closed_before_open() {
        let mut t = BlinkTracker::new(2);
        t.observe(EyeSample::from_ear(CLOSED_EAR, 0.25));
        t.observe(EyeSample::from_ear(CLOSED_EAR, 0.25));
        assert_eq!(t.state(), EyeState::Unknown);
    }

    #[test]
    fn test_tracker_reopen_resets_count() {
        let mut t = BlinkTracker::new(2);
        t.observe(EyeSample::from_ear(OPEN_EAR, 0.25));
        t.observe(EyeSample::from_ear(CLOSED_EAR, 0.25));
        assert_eq!(t.observe(EyeSample::from_ear(OPEN_EAR, 0.25)), EyeState::Open);
        assert_eq!(t.observe(EyeSample::from_ear(CLOSED_EAR, 0.25)), EyeState::Closing(1));
    }

    #[test]
    fn test_tracker_no_face_keeps_state() {
        let mut t = BlinkTracker::new(2);
        t.observe(EyeSample::from_ear(OPEN_EAR, 0.25));
        t.observe(EyeSample::from_ear(CLOSED_EAR, 0.25));
        assert_eq!(t.observe(EyeSample::NO_FACE), EyeState::Closing(1));
        assert_eq!(t.observe(EyeSample::from_ear(CLOSED_EAR, 0.25)), EyeState::BlinkConfirmed);
    }

    #[test]
    fn test_four_frames_insufficient() {
        let err = run(&[OPEN_EAR, CLOSED_EAR, CLOSED_EAR, OPEN_EAR]).unwrap_err();
        assert_eq!(err, LivenessError::InsufficientFrames { got: 4, required: 5 });
        assert!(err.to_string().starts_with("Not enough frames for liveness check"));
    }

    #[test]
    fn test_blink_sequence_confirmed_early() {
        let check = run(&[OPEN_EAR, CLOSED_EAR, CLOSED_EAR, OPEN_EAR, OPEN_EAR]).unwrap();
        assert!(check.outcome.is_live());
        assert_eq!(check.outcome.message(), "Liveness verified (blink detected)");
        assert_eq!(check.frames_examined, 3);
        assert_eq!(check.final_state, EyeState::BlinkConfirmed);
    }

    #[test]
    fn test_eyes_always_open_fails() {
        let check = run(&[OPEN_EAR; 6]).unwrap();
        assert!(!check.outcome.is_live());
        assert_eq!(check.outcome.message(), "Liveness check failed (no blink detected)");
        assert_eq!(check.frames_examined, 6);
        assert_eq!(check.final_state, EyeState::Open);
    }

    #[test]
    fn test_single_closed_frame_is_not_a_blink() {
        let check = run(&[OPEN_EAR, CLOSED_EAR, OPEN_EAR, CLOSED_EAR, OPEN_EAR]).unwrap();
        assert!(!check.outcome.is_live());
    }

    #[test]
    fn test_no_face_frames_fail() {
        let frames: Vec<PixelArray> = (0..5).map(|_| frame(None)).collect();
        let mut detector = ScriptedDetector { calls: 0 };
        let mut predictor = ScriptedPredictor;
        let check = LivenessVerifier::default()
            .check_liveness(&frames, &mut detector, Some(&mut predictor))
            .unwrap();
        assert!(!check.outcome.is_live());
        assert_eq!(check.final_state, EyeState::Unknown);
        assert_eq!(detector.calls, 5);
    }

    #[test]
    fn test_predictor_failure_degrades_to_no_face() {
        let mut detector = ScriptedDetector { calls: 0 };
        let mut predictor = FailingPredictor;
        let check = LivenessVerifier::default()
            .check_liveness(&script(&[OPEN_EAR; 5]), &mut detector, Some(&mut predictor))
            .unwrap();
        assert!(!check.outcome.is_live());
        assert_eq!(check.final_state, EyeState::Unknown);
    }

    #[test]
    fn test_missing_predictor_passes_with_diagnostic() {
        let mut detector = ScriptedDetector { calls: 0 };
        // Even too few frames pass when the landmark model is absent.
        let check = LivenessVerifier::default()
            .check_liveness(&script(&[OPEN_EAR]), &mut detector, None)
            .unwrap();
        assert!(check.outcome.is_live());
        assert!(check.outcome.message().contains("skipped"));
        assert_eq!(detector.calls, 0);
    }

    #[test]
    fn test_custom_consecutive_frames() {
        let config = LivenessConfig {
            consecutive_closed_frames: 3,
            ..LivenessConfig::default()
        };
        let mut detector = ScriptedDetector { calls: 0 };
        let mut predictor = ScriptedPredictor;
        let check = LivenessVerifier::new(config)
            .check_liveness(
                &script(&[OPEN_EAR, CLOSED_EAR, CLOSED_EAR, OPEN_EAR, OPEN_EAR]),
                &mut detector,
                Some(&mut predictor),
            )
            .unwrap();
        assert!(!check.outcome.is_live());
    }

    #[test]
    fn test_concurrent_calls_do_not_share_counters() {
        // One verifier shared by two threads: neither half-blink may
        // complete the other's blink.
        let verifier = LivenessVerifier::default();
        let half = [OPEN_EAR, CLOSED_EAR, OPEN_EAR, OPEN_EAR, OPEN_EAR];
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        let frames = script(&half);
                        let mut detector = ScriptedDetector { calls: 0 };
                        let mut predictor = ScriptedPredictor;
                        verifier
                            .check_liveness(&frames, &mut detector, Some(&mut predictor))
                            .unwrap()
                    })
                })
                .collect();
            for handle in handles {
                assert!(!handle.join().unwrap().outcome.is_live());
            }
        });
    }

    #[test]
    fn test_simple_check_flat_frame_is_blurry() {
        let flat = PixelArray::from_pixel(32, 32, Rgb([128, 128, 128]));
        let check = LivenessVerifier::default().simple_check(&flat);
        assert_eq!(
            check.outcome,
            LivenessOutcome::Failed("Image appears to be blurry or a photo of a screen".into())
        );
        assert_eq!(check.statistics.sharpness, 0.0);
    }

    #[test]
    fn test_simple_check_low_contrast() {
        // Fine checkerboard with a small amplitude: sharp edges, flat histogram.
        let frame = PixelArray::from_fn(32, 32, |x, y| {
            let v = if (x + y) % 2 == 0 { 120 } else { 140 };
            Rgb([v, v, v])
        });
        let check = LivenessVerifier::default().simple_check(&frame);
        assert!(check.statistics.sharpness >= 50.0);
        assert!(check.statistics.contrast < 20.0);
        assert_eq!(
            check.outcome,
            LivenessOutcome::Failed("Image has unusually low contrast".into())
        );
    }

    #[test]
    fn test_simple_check_passes_textured_frame() {
        let frame = PixelArray::from_fn(32, 32, |x, y| {
            let v = if (x / 2 + y / 2) % 2 == 0 { 30 } else { 220 };
            Rgb([v, v, v])
        });
        let check = LivenessVerifier::default().simple_check(&frame);
        assert!(check.outcome.is_live(), "{:?}", check.statistics);
        assert_eq!(check.outcome.message(), "Basic liveness check passed");
    }

    #[test]
    fn test_simple_check_thresholds_are_configurable() {
        let frame = PixelArray::from_fn(32, 32, |x, y| {
            let v = if (x + y) % 2 == 0 { 120 } else { 140 };
            Rgb([v, v, v])
        });
        let config = LivenessConfig {
            min_contrast: 5.0,
            ..LivenessConfig::default()
        };
        assert!(LivenessVerifier::new(config).simple_check(&frame).outcome.is_live());
    }
}
