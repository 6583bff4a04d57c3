//! Opaque bearer tokens for authenticated users.
//!
//! Tokens are 256 random bits from the OS RNG, hex-encoded, and live only in
//! daemon memory: a restart invalidates every session.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use facegate_core::types::OwnerId;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Mutex;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionClaims {
    pub user_id: OwnerId,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionIssuer {
    ttl: Duration,
    sessions: Mutex<HashMap<String, SessionClaims>>,
}

impl SessionIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh token for `user_id`.
    pub async fn issue(&self, user_id: OwnerId, email: &str) -> String {
        self.issue_at(user_id, email, Utc::now()).await
    }

    async fn issue_at(&self, user_id: OwnerId, email: &str, now: DateTime<Utc>) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

        let claims = SessionClaims {
            user_id,
            email: email.to_string(),
            issued_at: now,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, c| c.expires_at > now);
        sessions.insert(token.clone(), claims);
        tracing::debug!(user_id, active = sessions.len(), "session issued");
        token
    }

    /// Claims for a live token. Expired tokens are removed.
    pub async fn verify(&self, token: &str) -> Option<SessionClaims> {
        self.verify_at(token, Utc::now()).await
    }

    async fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Option<SessionClaims> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(token) {
            Some(claims) if claims.expires_at > now => Some(claims.clone()),
            Some(_) => {
                sessions.remove(token);
                tracing::debug!("session expired");
                None
            }
            None => None,
        }
    }

    /// Drop every session belonging to `user_id`.
    pub async fn revoke_user(&self, user_id: OwnerId) {
        self.sessions
            .lock()
            .await
            .retain(|_, c| c.user_id != user_id);
    }
}
