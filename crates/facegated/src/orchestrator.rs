//! Enrollment and authentication flows.
//!
//! Composes the engine (quality gate, matcher, liveness) with persistence and
//! session issuance. Per-request business failures come back as unsuccessful
//! [`AuthResponse`]s; only malformed requests and infrastructure faults are
//! errors.

use facegate_core::codec;
use facegate_core::liveness::LivenessOutcome;
use facegate_core::types::{MatchOutcome, OwnerId};
use facegate_core::PixelArray;
use serde::Serialize;
use thiserror::Error;

use crate::config::{Config, MAX_TOKEN_TTL_MINUTES};
use crate::engine::{EngineError, EngineHandle, Identification};
use crate::session::{SessionClaims, SessionIssuer};
use crate::store::{FaceStore, StoreError, UserRecord, UserSummary};

const NO_USERS: &str = "No registered users found";
const NOT_RECOGNIZED: &str = "Face not recognized. Please register first.";
const NO_FACE: &str = "No face detected in the image";

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("user {0} not found")]
    UserNotFound(OwnerId),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Public view of a user in responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserView {
    pub id: OwnerId,
    pub name: String,
    pub email: String,
}

impl From<UserRecord> for UserView {
    fn from(u: UserRecord) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub user: Option<UserView>,
    pub access_token: Option<String>,
    pub token_type: &'static str,
}

impl AuthResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            user: None,
            access_token: None,
            token_type: "bearer",
        }
    }

    fn granted(message: impl Into<String>, user: UserView, token: String) -> Self {
        Self {
            success: true,
            message: message.into(),
            user: Some(user),
            access_token: Some(token),
            token_type: "bearer",
        }
    }
}

/// Verdict of a liveness-only request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessResponse {
    pub is_live: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f64>,
}

impl LivenessResponse {
    fn from_outcome(outcome: &LivenessOutcome) -> Self {
        Self {
            is_live: outcome.is_live(),
            message: outcome.message().to_string(),
            sharpness: None,
            contrast: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenResponse {
    pub valid: bool,
    pub user: Option<UserView>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub users: u64,
    pub signatures: u64,
    pub match_threshold: f32,
    pub min_face_size: u32,
    pub landmark_model_loaded: bool,
}

pub struct Orchestrator {
    config: Config,
    engine: EngineHandle,
    store: FaceStore,
    sessions: SessionIssuer,
}

impl Orchestrator {
    pub fn new(config: Config, engine: EngineHandle, store: FaceStore) -> Self {
        let ttl = config.token_ttl_minutes.clamp(1, MAX_TOKEN_TTL_MINUTES);
        let sessions = SessionIssuer::new(chrono::Duration::minutes(ttl));
        Self {
            config,
            engine,
            store,
            sessions,
        }
    }

    /// Register a new user from several face images and sign them in.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        images: &[String],
    ) -> Result<AuthResponse, OrchestratorError> {
        let (min, max) = (self.config.min_enroll_images, self.config.max_enroll_images);
        if images.len() < min || images.len() > max {
            return Err(OrchestratorError::InvalidRequest(format!(
                "Between {min} and {max} images are required for registration, got {}",
                images.len()
            )));
        }
        if name.trim().is_empty() || email.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "Name and email are required".into(),
            ));
        }
        if self.store.find_user_by_email(email).await?.is_some() {
            return Err(OrchestratorError::InvalidRequest(
                "Email already registered".into(),
            ));
        }

        let pixels = images
            .iter()
            .enumerate()
            .map(|(i, payload)| {
                codec::decode_image(payload)
                    .map_err(|e| OrchestratorError::InvalidRequest(format!("Image {}: {e}", i + 1)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let vectors = self.engine.enroll(pixels).await.map_err(|e| match e {
            EngineError::Quality { .. } => OrchestratorError::InvalidRequest(e.to_string()),
            other => OrchestratorError::Engine(other),
        })?;

        // Lost a race with a concurrent registration of the same email.
        let user = self
            .store
            .create_user_with_signatures(name, email, &vectors)
            .await?
            .ok_or_else(|| OrchestratorError::InvalidRequest("Email already registered".into()))?;

        tracing::info!(user_id = user.id, signatures = vectors.len(), "user registered");

        let token = self.sessions.issue(user.id, &user.email).await;
        Ok(AuthResponse::granted(
            format!(
                "User registered successfully with {} face images",
                vectors.len()
            ),
            user.into(),
            token,
        ))
    }

    /// Identify the face in `image` among all enrolled users.
    ///
    /// When `liveness_frames` is non-empty the blink check runs first and a
    /// failed verdict ends the attempt.
    pub async fn authenticate(
        &self,
        image: &str,
        liveness_frames: &[String],
    ) -> Result<AuthResponse, OrchestratorError> {
        if !liveness_frames.is_empty() {
            let check = self.check_liveness(liveness_frames).await?;
            if !check.is_live {
                tracing::info!(reason = %check.message, "authenticate: liveness failed");
                return Ok(AuthResponse::failed(check.message));
            }
        }

        let probe = decode_one(image)?;
        let gallery = self.store.all_signatures().await?;
        let gallery_empty = gallery.is_empty();

        let outcome = match self.engine.identify(probe, gallery).await? {
            Identification::NoFace => return Ok(AuthResponse::failed(NO_FACE)),
            _ if gallery_empty => return Ok(AuthResponse::failed(NO_USERS)),
            Identification::Searched(outcome) => outcome,
        };

        let matched = match outcome {
            MatchOutcome::Match(m) => m,
            MatchOutcome::NoMatch { closest_distance } => {
                tracing::info!(?closest_distance, "authenticate: no match");
                return Ok(AuthResponse::failed(NOT_RECOGNIZED));
            }
        };

        // The signature may outlive a concurrently deleted user.
        let Some(user) = self.store.get_user(matched.owner_id).await? else {
            tracing::warn!(user_id = matched.owner_id, "matched signature has no user");
            return Ok(AuthResponse::failed(NOT_RECOGNIZED));
        };

        tracing::info!(
            user_id = user.id,
            signature_id = matched.signature_id,
            similarity = matched.similarity,
            "authenticated"
        );

        let token = self.sessions.issue(user.id, &user.email).await;
        Ok(AuthResponse::granted(
            format!(
                "Authentication successful (confidence: {:.2}%)",
                matched.similarity * 100.0
            ),
            user.into(),
            token,
        ))
    }

    /// Blink liveness over a frame sequence.
    pub async fn check_liveness(
        &self,
        frames: &[String],
    ) -> Result<LivenessResponse, OrchestratorError> {
        let pixels = frames
            .iter()
            .enumerate()
            .map(|(i, payload)| {
                codec::decode_image(payload)
                    .map_err(|e| OrchestratorError::InvalidRequest(format!("Frame {}: {e}", i + 1)))
            })
            .collect::<Result<Vec<PixelArray>, _>>()?;

        match self.engine.check_liveness(pixels).await {
            Ok(check) => Ok(LivenessResponse::from_outcome(&check.outcome)),
            Err(EngineError::Liveness(e)) => Ok(LivenessResponse {
                is_live: false,
                message: e.to_string(),
                sharpness: None,
                contrast: None,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Single-frame sharpness/contrast liveness heuristic.
    pub async fn simple_liveness(&self, image: &str) -> Result<LivenessResponse, OrchestratorError> {
        let check = self.engine.simple_liveness(decode_one(image)?).await?;
        Ok(LivenessResponse {
            sharpness: Some(check.statistics.sharpness),
            contrast: Some(check.statistics.contrast),
            ..LivenessResponse::from_outcome(&check.outcome)
        })
    }

    pub async fn verify_token(&self, token: &str) -> Result<TokenResponse, OrchestratorError> {
        let Some(SessionClaims {
            user_id,
            expires_at,
            ..
        }) = self.sessions.verify(token).await
        else {
            return Ok(TokenResponse {
                valid: false,
                user: None,
                expires_at: None,
            });
        };

        let user = self.store.get_user(user_id).await?;
        Ok(TokenResponse {
            valid: user.is_some(),
            user: user.map(UserView::from),
            expires_at: Some(expires_at.to_rfc3339()),
        })
    }

    pub async fn list_users(&self) -> Result<Vec<UserSummary>, OrchestratorError> {
        Ok(self.store.list_users().await?)
    }

    /// Remove a user, their signatures and their sessions.
    pub async fn delete_user(&self, id: OwnerId) -> Result<(), OrchestratorError> {
        if !self.store.delete_user(id).await? {
            return Err(OrchestratorError::UserNotFound(id));
        }
        self.sessions.revoke_user(id).await;
        tracing::info!(user_id = id, "user deleted");
        Ok(())
    }

    pub async fn status(&self) -> Result<StatusResponse, OrchestratorError> {
        Ok(StatusResponse {
            version: env!("CARGO_PKG_VERSION"),
            users: self.store.count_users().await?,
            signatures: self.store.count_signatures().await?,
            match_threshold: self.config.match_threshold,
            min_face_size: self.config.min_face_size,
            landmark_model_loaded: self.engine.landmarks_loaded(),
        })
    }
}

fn decode_one(payload: &str) -> Result<PixelArray, OrchestratorError> {
    codec::decode_image(payload).map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fakes::{engine, eye_frame, face_image};
    use facegate_core::types::FaceVector;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use std::path::Path;

    fn payload(image: PixelArray) -> String {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", codec::encode_image_payload(&buf))
    }

    fn face(size: u8, g: u8, b: u8) -> String {
        payload(face_image(size, g, b))
    }

    async fn orchestrator(with_landmarks: bool) -> Orchestrator {
        let store = FaceStore::open(Path::new(":memory:")).await.unwrap();
        Orchestrator::new(Config::default(), engine(with_landmarks), store)
    }

    async fn register_alice(o: &Orchestrator) -> AuthResponse {
        o.register(
            "Alice",
            "alice@example.com",
            &[face(100, 10, 10), face(100, 11, 10), face(100, 10, 11)],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let o = orchestrator(false).await;
        let reg = register_alice(&o).await;
        assert!(reg.success);
        assert_eq!(reg.message, "User registered successfully with 3 face images");
        assert_eq!(reg.token_type, "bearer");
        let alice = reg.user.clone().unwrap();

        let auth = o.authenticate(&face(120, 10, 10), &[]).await.unwrap();
        assert!(auth.success, "{}", auth.message);
        assert_eq!(auth.user.unwrap(), alice);
        assert_eq!(auth.message, "Authentication successful (confidence: 100.00%)");

        let token = auth.access_token.unwrap();
        let verified = o.verify_token(&token).await.unwrap();
        assert!(verified.valid);
        assert_eq!(verified.user.unwrap().email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_register_image_count_bounds() {
        let o = orchestrator(false).await;
        let two = [face(100, 1, 1), face(100, 1, 1)];
        let err = o.register("A", "a@example.com", &two).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));

        let eleven: Vec<String> = (0..11).map(|_| face(100, 1, 1)).collect();
        assert!(o.register("A", "a@example.com", &eleven).await.is_err());
        assert_eq!(o.status().await.unwrap().users, 0);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_email() {
        let o = orchestrator(false).await;
        register_alice(&o).await;
        let err = o
            .register(
                "Other",
                "alice@example.com",
                &[face(100, 50, 50), face(100, 50, 50), face(100, 50, 50)],
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[tokio::test]
    async fn test_register_reports_failing_image_and_persists_nothing() {
        let o = orchestrator(false).await;
        let err = o
            .register(
                "A",
                "a@example.com",
                &[face(100, 1, 1), face(100, 1, 1), face(0, 1, 1)],
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Image 3: No face detected in the image");

        let status = o.status().await.unwrap();
        assert_eq!((status.users, status.signatures), (0, 0));
    }

    #[tokio::test]
    async fn test_register_rejects_garbage_payload() {
        let o = orchestrator(false).await;
        let err = o
            .register(
                "A",
                "a@example.com",
                &[face(100, 1, 1), "not-an-image".into(), face(100, 1, 1)],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Image 2: invalid image payload"));
    }

    #[tokio::test]
    async fn test_authenticate_without_users() {
        let o = orchestrator(false).await;
        let auth = o.authenticate(&face(100, 10, 10), &[]).await.unwrap();
        assert!(!auth.success);
        assert_eq!(auth.message, "No registered users found");
        assert!(auth.access_token.is_none());
    }

    #[tokio::test]
    async fn test_authenticate_no_face() {
        let o = orchestrator(false).await;
        register_alice(&o).await;
        let auth = o.authenticate(&face(0, 10, 10), &[]).await.unwrap();
        assert_eq!(auth.message, "No face detected in the image");
    }

    #[tokio::test]
    async fn test_unreadable_and_foreign_signatures_do_not_lock_out_users() {
        let o = orchestrator(false).await;
        let alice = register_alice(&o).await.user.unwrap();

        let bob = o
            .store
            .create_user_with_signatures(
                "Bob",
                "bob@example.com",
                &[FaceVector::new(vec![0.1, 0.1, 0.1]).unwrap()],
            )
            .await
            .unwrap()
            .unwrap();
        o.store.insert_raw_signature(bob.id, vec![1, 2, 3, 4, 5]).await;

        let auth = o.authenticate(&face(100, 10, 10), &[]).await.unwrap();
        assert!(auth.success, "{}", auth.message);
        assert_eq!(auth.user.unwrap(), alice);
    }

    #[tokio::test]
    async fn test_authenticate_unknown_face() {
        let o = orchestrator(false).await;
        register_alice(&o).await;
        // Embedding (0.9, 0.9) is far from Alice's (0.1, 0.1).
        let auth = o.authenticate(&face(100, 90, 90), &[]).await.unwrap();
        assert!(!auth.success);
        assert_eq!(auth.message, "Face not recognized. Please register first.");
    }

    #[tokio::test]
    async fn test_authenticate_with_failed_liveness() {
        let o = orchestrator(true).await;
        register_alice(&o).await;
        let frames: Vec<String> = (0..5).map(|_| payload(eye_frame(30))).collect();
        let auth = o.authenticate(&face(100, 10, 10), &frames).await.unwrap();
        assert!(!auth.success);
        assert_eq!(auth.message, "Liveness check failed (no blink detected)");
    }

    #[tokio::test]
    async fn test_authenticate_with_blink() {
        let o = orchestrator(true).await;
        register_alice(&o).await;
        let frames: Vec<String> = [30, 10, 10, 30, 30].map(|e| payload(eye_frame(e))).to_vec();
        let auth = o.authenticate(&face(100, 10, 10), &frames).await.unwrap();
        assert!(auth.success, "{}", auth.message);
    }

    #[tokio::test]
    async fn test_check_liveness_insufficient_frames_is_a_verdict() {
        let o = orchestrator(true).await;
        let frames: Vec<String> = (0..4).map(|_| payload(eye_frame(30))).collect();
        let res = o.check_liveness(&frames).await.unwrap();
        assert!(!res.is_live);
        assert!(res.message.starts_with("Not enough frames for liveness check"));
    }

    #[tokio::test]
    async fn test_simple_liveness_flat_image() {
        let o = orchestrator(false).await;
        let res = o.simple_liveness(&face(100, 100, 100)).await.unwrap();
        assert!(!res.is_live);
        assert_eq!(res.sharpness, Some(0.0));
    }

    #[tokio::test]
    async fn test_delete_user_revokes_sessions() {
        let o = orchestrator(false).await;
        let reg = register_alice(&o).await;
        let id = reg.user.unwrap().id;
        let token = reg.access_token.unwrap();

        o.delete_user(id).await.unwrap();
        assert!(!o.verify_token(&token).await.unwrap().valid);
        assert!(matches!(
            o.delete_user(id).await.unwrap_err(),
            OrchestratorError::UserNotFound(_)
        ));
        assert!(o.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_response_json_shape() {
        let json = serde_json::to_value(AuthResponse::failed("nope")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["token_type"], "bearer");
        assert!(json["access_token"].is_null());
    }
}
