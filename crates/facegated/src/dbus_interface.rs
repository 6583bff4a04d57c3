use std::sync::Arc;

use serde::Serialize;
use zbus::interface;

use crate::orchestrator::{Orchestrator, OrchestratorError};

pub const BUS_NAME: &str = "org.facegate.Auth1";
pub const OBJECT_PATH: &str = "/org/facegate/Auth1";

/// D-Bus interface for the facegate daemon.
///
/// Bus name: org.facegate.Auth1
/// Object path: /org/facegate/Auth1
///
/// Images travel as base64 strings (optionally data URLs). Every method
/// answers with a JSON document; malformed requests map to `InvalidArgs`.
pub struct FacegateService {
    pub orchestrator: Arc<Orchestrator>,
}

fn to_fdo(e: OrchestratorError) -> zbus::fdo::Error {
    match e {
        OrchestratorError::InvalidRequest(msg) => zbus::fdo::Error::InvalidArgs(msg),
        other => {
            tracing::error!(error = %other, "request failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.facegate.Auth1")]
impl FacegateService {
    /// Register a user from 3 to 10 face images. Returns an auth response.
    async fn register(
        &self,
        name: &str,
        email: &str,
        images: Vec<String>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(email, images = images.len(), "register requested");
        let response = self
            .orchestrator
            .register(name, email, &images)
            .await
            .map_err(to_fdo)?;
        to_json(&response)
    }

    /// Identify the face in `image`. A non-empty `liveness_frames` runs the
    /// blink check first.
    async fn authenticate(
        &self,
        image: String,
        liveness_frames: Vec<String>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(frames = liveness_frames.len(), "authenticate requested");
        let response = self
            .orchestrator
            .authenticate(&image, &liveness_frames)
            .await
            .map_err(to_fdo)?;
        to_json(&response)
    }

    async fn check_liveness(&self, frames: Vec<String>) -> zbus::fdo::Result<String> {
        tracing::info!(frames = frames.len(), "check_liveness requested");
        let response = self
            .orchestrator
            .check_liveness(&frames)
            .await
            .map_err(to_fdo)?;
        to_json(&response)
    }

    async fn simple_liveness(&self, image: String) -> zbus::fdo::Result<String> {
        tracing::info!("simple_liveness requested");
        let response = self
            .orchestrator
            .simple_liveness(&image)
            .await
            .map_err(to_fdo)?;
        to_json(&response)
    }

    async fn verify_token(&self, token: &str) -> zbus::fdo::Result<String> {
        let response = self
            .orchestrator
            .verify_token(token)
            .await
            .map_err(to_fdo)?;
        to_json(&response)
    }

    /// List registered users with their signature counts.
    async fn list_users(&self) -> zbus::fdo::Result<String> {
        let users = self.orchestrator.list_users().await.map_err(to_fdo)?;
        to_json(&users)
    }

    /// Delete a user with their signatures and sessions.
    async fn delete_user(&self, id: i64) -> zbus::fdo::Result<bool> {
        tracing::info!(user_id = id, "delete_user requested");
        self.orchestrator.delete_user(id).await.map_err(to_fdo)?;
        Ok(true)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.orchestrator.status().await.map_err(to_fdo)?;
        to_json(&status)
    }
}
