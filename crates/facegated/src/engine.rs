use std::time::Duration;

use facegate_core::liveness::{BlinkCheck, LivenessError, LivenessVerifier, StaticCheck};
use facegate_core::matcher::{MatchError, Matcher, SignatureMatcher};
use facegate_core::models::{EmbeddingExtractor, FaceDetector, LandmarkPredictor};
use facegate_core::quality::{self, QualityError, QualityGate};
use facegate_core::types::{EnrolledSignature, FaceVector, MatchOutcome};
use facegate_core::PixelArray;
use facegate_models::{ArcFaceExtractor, LandmarkRegressor, ModelLoadError, ModelPaths, ScrfdDetector};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    ModelLoad(#[from] ModelLoadError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Image {index}: {source}")]
    Quality {
        index: usize,
        #[source]
        source: QualityError,
    },
    #[error("{0}")]
    Liveness(#[from] LivenessError),
    #[error("signature comparison failed: {0}")]
    Match(#[from] MatchError),
    #[error("engine request timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of identifying one probe image against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    /// No usable face (no detection or no embedding) in the probe.
    NoFace,
    Searched(MatchOutcome),
}

/// Model collaborators owned by the engine thread.
pub struct Models {
    pub detector: Box<dyn FaceDetector + Send>,
    pub extractor: Box<dyn EmbeddingExtractor + Send>,
    /// Optional: without it blink liveness runs in degraded pass-through mode.
    pub landmarks: Option<Box<dyn LandmarkPredictor + Send>>,
}

impl Models {
    /// Load the ONNX models. Detector and extractor are required; a missing
    /// or broken landmark model is logged and skipped.
    pub fn load(paths: &ModelPaths) -> Result<Self, ModelLoadError> {
        let detector = ScrfdDetector::load(&paths.detector)?;
        let extractor = ArcFaceExtractor::load(&paths.extractor)?;

        let landmarks: Option<Box<dyn LandmarkPredictor + Send>> =
            match LandmarkRegressor::load(&paths.landmarks) {
                Ok(model) => Some(Box::new(model)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "landmark model unavailable; blink liveness will pass through"
                    );
                    None
                }
            };

        Ok(Self {
            detector: Box::new(detector),
            extractor: Box::new(extractor),
            landmarks,
        })
    }
}

/// Long-lived services run by the engine thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Services {
    pub gate: QualityGate,
    pub matcher: SignatureMatcher,
    pub liveness: LivenessVerifier,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Enroll {
        images: Vec<PixelArray>,
        reply: oneshot::Sender<Result<Vec<FaceVector>, EngineError>>,
    },
    Identify {
        image: PixelArray,
        gallery: Vec<EnrolledSignature>,
        reply: oneshot::Sender<Result<Identification, EngineError>>,
    },
    CheckLiveness {
        frames: Vec<PixelArray>,
        reply: oneshot::Sender<Result<BlinkCheck, EngineError>>,
    },
    SimpleLiveness {
        image: PixelArray,
        reply: oneshot::Sender<Result<StaticCheck, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
    landmarks_loaded: bool,
}

impl EngineHandle {
    pub fn landmarks_loaded(&self) -> bool {
        self.landmarks_loaded
    }

    /// Validate every enrollment image through the quality gate, in order.
    /// The first rejected image aborts with its 1-based index.
    pub async fn enroll(&self, images: Vec<PixelArray>) -> Result<Vec<FaceVector>, EngineError> {
        self.request(|reply| EngineRequest::Enroll { images, reply }).await
    }

    /// Extract the probe's embedding and search `gallery` for the nearest
    /// signature.
    pub async fn identify(
        &self,
        image: PixelArray,
        gallery: Vec<EnrolledSignature>,
    ) -> Result<Identification, EngineError> {
        self.request(|reply| EngineRequest::Identify { image, gallery, reply })
            .await
    }

    pub async fn check_liveness(&self, frames: Vec<PixelArray>) -> Result<BlinkCheck, EngineError> {
        self.request(|reply| EngineRequest::CheckLiveness { frames, reply })
            .await
    }

    pub async fn simple_liveness(&self, image: PixelArray) -> Result<StaticCheck, EngineError> {
        self.request(|reply| EngineRequest::SimpleLiveness { image, reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(reply) => reply.map_err(|_| EngineError::ChannelClosed)?,
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Models are loaded by the caller so startup can fail fast before any
/// request is accepted.
pub fn spawn_engine(
    models: Models,
    services: Services,
    timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let landmarks_loaded = models.landmarks.is_some();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    let mut worker = Worker { models, services };

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                worker.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        timeout,
        landmarks_loaded,
    })
}

struct Worker {
    models: Models,
    services: Services,
}

impl Worker {
    fn handle(&mut self, req: EngineRequest) {
        // A dropped receiver means the caller timed out; nothing to report.
        match req {
            EngineRequest::Enroll { images, reply } => {
                let _ = reply.send(self.enroll(&images));
            }
            EngineRequest::Identify {
                image,
                gallery,
                reply,
            } => {
                let _ = reply.send(self.identify(&image, gallery));
            }
            EngineRequest::CheckLiveness { frames, reply } => {
                let landmarks = self
                    .models
                    .landmarks
                    .as_deref_mut()
                    .map(|p| p as &mut dyn LandmarkPredictor);
                let result = self
                    .services
                    .liveness
                    .check_liveness(&frames, &mut *self.models.detector, landmarks)
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineRequest::SimpleLiveness { image, reply } => {
                let _ = reply.send(Ok(self.services.liveness.simple_check(&image)));
            }
        }
    }

    fn enroll(&mut self, images: &[PixelArray]) -> Result<Vec<FaceVector>, EngineError> {
        let mut vectors = Vec::with_capacity(images.len());
        for (i, image) in images.iter().enumerate() {
            let report = self
                .services
                .gate
                .validate(image, &mut *self.models.detector, &mut *self.models.extractor)
                .map_err(|source| {
                    tracing::info!(image = i + 1, reason = %source, "enroll: image rejected");
                    EngineError::Quality {
                        index: i + 1,
                        source,
                    }
                })?;
            vectors.push(report.vector);
        }
        tracing::debug!(count = vectors.len(), "enroll: all images accepted");
        Ok(vectors)
    }

    fn identify(
        &mut self,
        image: &PixelArray,
        gallery: Vec<EnrolledSignature>,
    ) -> Result<Identification, EngineError> {
        let vector = quality::detect_primary_face(image, &mut *self.models.detector)
            .and_then(|region| quality::extract_vector(image, &region, &mut *self.models.extractor));

        let vector = match vector {
            Ok(v) => v,
            Err(reason) => {
                tracing::debug!(%reason, "identify: no usable face");
                return Ok(Identification::NoFace);
            }
        };

        // Signatures from another embedding model cannot be compared; leave
        // them out rather than failing the search for every user.
        let (comparable, foreign): (Vec<EnrolledSignature>, Vec<EnrolledSignature>) = gallery
            .into_iter()
            .partition(|s| s.vector.dimension() == vector.dimension());
        for s in &foreign {
            tracing::warn!(
                signature_id = s.signature_id,
                user_id = s.owner_id,
                expected = vector.dimension(),
                actual = s.vector.dimension(),
                "skipping signature with foreign dimension"
            );
        }

        let outcome = self.services.matcher.find_match(&vector, &comparable)?;
        Ok(Identification::Searched(outcome))
    }
}
