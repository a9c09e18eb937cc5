/*
[INPUT]:  Ed25519 request key and the venue's session handshake endpoints
[OUTPUT]: A valid bearer token, refreshed before expiry
[POS]:    Auth layer - session establishment and token lifecycle
[UPDATE]: When the handshake endpoints or token semantics change
*/

use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;
use tracing::info;

use crate::http::{Result, VenueClient};
use crate::types::{SessionLoginRequest, SessionPrepareRequest};

use super::RequestKey;

/// Stored session token with expiry metadata.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub address: String,
    /// `None` for operator-supplied static tokens with unknown expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Manages session establishment against the venue.
///
/// The engine only ever calls [`ensure_session`](SessionManager::ensure_session)
/// before its first REST call; everything else about authentication is opaque
/// to it.
#[derive(Debug)]
pub struct SessionManager {
    key: RequestKey,
    address: String,
    token: RwLock<Option<SessionToken>>,
}

impl SessionManager {
    pub fn new(key: RequestKey, address: impl Into<String>) -> Self {
        Self {
            key,
            address: address.into(),
            token: RwLock::new(None),
        }
    }

    /// Seed the manager with an operator-supplied token, skipping the handshake.
    pub fn with_static_token(key: RequestKey, address: impl Into<String>, token: String) -> Self {
        let address = address.into();
        let manager = Self::new(key, address.clone());
        *manager.token.write().unwrap() = Some(SessionToken {
            token,
            address,
            expires_at: None,
        });
        manager
    }

    pub fn token(&self) -> Option<String> {
        let guard = self.token.read().unwrap();
        guard
            .as_ref()
            .filter(|data| !data.is_expired(Utc::now()))
            .map(|data| data.token.clone())
    }

    /// Return a valid token, running the prepare/login handshake when needed.
    pub async fn ensure_session(
        &self,
        client: &VenueClient,
        expires_seconds: u64,
    ) -> Result<String> {
        if let Some(token) = self.token() {
            return Ok(token);
        }

        let prepare = client
            .session_prepare(SessionPrepareRequest {
                address: self.address.clone(),
                request_id: self.key.handshake_request_id(),
            })
            .await?;

        let signature = self.key.sign_challenge(&prepare.signed_data);

        let login = client
            .session_login(SessionLoginRequest {
                signature,
                signed_data: prepare.signed_data,
                expires_seconds: Some(expires_seconds),
            })
            .await?;

        let expires_at =
            Utc::now() + Duration::seconds(login.expires_seconds.unwrap_or(expires_seconds) as i64);

        info!(address = %login.address, "session established");

        let token = login.token.clone();
        *self.token.write().unwrap() = Some(SessionToken {
            token: login.token,
            address: login.address,
            expires_at: Some(expires_at),
        });

        Ok(token)
    }

    pub fn clear(&self) {
        *self.token.write().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_is_never_expired() {
        let manager =
            SessionManager::with_static_token(RequestKey::generate(), "addr", "jwt".to_string());
        assert_eq!(manager.token(), Some("jwt".to_string()));
    }

    #[test]
    fn expired_token_is_not_returned() {
        let manager = SessionManager::new(RequestKey::generate(), "addr");
        *manager.token.write().unwrap() = Some(SessionToken {
            token: "old".to_string(),
            address: "addr".to_string(),
            expires_at: Some(Utc::now() - Duration::seconds(1)),
        });

        assert_eq!(manager.token(), None);
    }

    #[test]
    fn clear_drops_the_token() {
        let manager =
            SessionManager::with_static_token(RequestKey::generate(), "addr", "jwt".to_string());
        manager.clear();
        assert_eq!(manager.token(), None);
    }
}
