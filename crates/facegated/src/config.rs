use std::path::PathBuf;

use facegate_core::liveness::{LivenessConfig, LivenessVerifier};
use facegate_core::matcher::SignatureMatcher;
use facegate_core::quality::QualityGate;
use facegate_models::ModelPaths;

use crate::engine::Services;

/// Minimum cosine similarity for an ArcFace match. The bundled extractor
/// emits L2-normalized vectors, where Euclidean distance and cosine relate
/// as `d = sqrt(2 - 2 * cos)`.
pub const ARCFACE_MIN_COSINE: f32 = 0.40;

/// Longest accepted session lifetime (one year).
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365;

/// Euclidean distance between unit vectors with the given cosine similarity.
pub fn unit_distance_for_cosine(cos: f32) -> f32 {
    (2.0 - 2.0 * cos.clamp(-1.0, 1.0)).sqrt()
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for a positive match (inclusive).
    ///
    /// Defaults to the distance equivalent of [`ARCFACE_MIN_COSINE`]
    /// (about 1.095), not the core matcher's 0.5 which suits 128-d
    /// unnormalized embeddings.
    pub match_threshold: f32,
    /// Minimum face width and height in pixels for enrollment images.
    pub min_face_size: u32,
    /// Enrollment image count bounds (inclusive).
    pub min_enroll_images: usize,
    pub max_enroll_images: usize,
    /// Averaged eye aspect ratio below which eyes count as closed.
    pub ear_threshold: f32,
    /// Consecutive closed-eye frames that confirm a blink.
    pub blink_frames: u32,
    /// Minimum frames for a blink liveness check.
    pub liveness_min_frames: usize,
    /// Laplacian variance floor for the static liveness check.
    pub min_sharpness: f64,
    /// Grayscale standard deviation floor for the static liveness check.
    pub min_contrast: f64,
    /// Session token lifetime, within `1..=MAX_TOKEN_TTL_MINUTES`.
    pub token_ttl_minutes: i64,
    /// Timeout in seconds for a single engine request.
    pub request_timeout_secs: u64,
    /// Serve on the session bus instead of the system bus (development mode).
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        let liveness = LivenessConfig::default();
        Self {
            model_dir: facegate_models::default_model_dir(),
            db_path: data_dir().join("faces.db"),
            match_threshold: unit_distance_for_cosine(ARCFACE_MIN_COSINE),
            min_face_size: facegate_core::quality::DEFAULT_MIN_FACE_SIZE,
            min_enroll_images: 3,
            max_enroll_images: 10,
            ear_threshold: liveness.ear_threshold,
            blink_frames: liveness.consecutive_closed_frames,
            liveness_min_frames: liveness.min_frames,
            min_sharpness: liveness.min_sharpness,
            min_contrast: liveness.min_contrast,
            token_ttl_minutes: 60,
            request_timeout_secs: 30,
            session_bus: false,
        }
    }
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let d = Self::default();

        let model_dir = std::env::var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or(d.model_dir);

        let db_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(d.db_path);

        Self {
            model_dir,
            db_path,
            match_threshold: env_f32("FACEGATE_MATCH_THRESHOLD", d.match_threshold),
            min_face_size: env_u32("FACEGATE_MIN_FACE_SIZE", d.min_face_size),
            min_enroll_images: env_usize("FACEGATE_MIN_ENROLL_IMAGES", d.min_enroll_images),
            max_enroll_images: env_usize("FACEGATE_MAX_ENROLL_IMAGES", d.max_enroll_images),
            ear_threshold: env_f32("FACEGATE_EAR_THRESHOLD", d.ear_threshold),
            blink_frames: env_u32("FACEGATE_BLINK_FRAMES", d.blink_frames),
            liveness_min_frames: env_usize("FACEGATE_LIVENESS_MIN_FRAMES", d.liveness_min_frames),
            min_sharpness: env_f64("FACEGATE_MIN_SHARPNESS", d.min_sharpness),
            min_contrast: env_f64("FACEGATE_MIN_CONTRAST", d.min_contrast),
            token_ttl_minutes: env_i64("FACEGATE_TOKEN_TTL_MINUTES", d.token_ttl_minutes),
            request_timeout_secs: env_u64("FACEGATE_REQUEST_TIMEOUT_SECS", d.request_timeout_secs),
            session_bus: std::env::var("FACEGATE_SESSION_BUS").is_ok(),
        }
        .validated()
    }

    /// Replace values that would make the daemon unusable with safe ones.
    pub fn validated(mut self) -> Self {
        let d = Self::default();

        if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&self.token_ttl_minutes) {
            let clamped = self.token_ttl_minutes.clamp(1, MAX_TOKEN_TTL_MINUTES);
            tracing::warn!(
                configured = self.token_ttl_minutes,
                using = clamped,
                "token TTL out of range"
            );
            self.token_ttl_minutes = clamped;
        }

        if self.min_enroll_images == 0 || self.min_enroll_images > self.max_enroll_images {
            tracing::warn!(
                min = self.min_enroll_images,
                max = self.max_enroll_images,
                "invalid enrollment image bounds; using defaults"
            );
            self.min_enroll_images = d.min_enroll_images;
            self.max_enroll_images = d.max_enroll_images;
        }

        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            tracing::warn!(configured = self.match_threshold, "invalid match threshold");
            self.match_threshold = d.match_threshold;
        }

        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = d.request_timeout_secs;
        }

        self
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    /// Engine services tuned by this configuration.
    pub fn services(&self) -> Services {
        Services {
            gate: QualityGate::new(self.min_face_size),
            matcher: SignatureMatcher::new(self.match_threshold),
            liveness: LivenessVerifier::new(self.liveness()),
        }
    }

    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            ear_threshold: self.ear_threshold,
            consecutive_closed_frames: self.blink_frames,
            min_frames: self.liveness_min_frames,
            min_sharpness: self.min_sharpness,
            min_contrast: self.min_contrast,
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    env_parse(key, default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_parse(key, default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_parse(key, default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_parse(key, default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env_parse(key, default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_parse(key, default)
}
