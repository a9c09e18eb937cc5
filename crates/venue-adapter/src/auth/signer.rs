/*
[INPUT]:  Base64 key material from configuration, payloads to attest
[OUTPUT]: Venue-formatted request signatures and handshake identifiers
[POS]:    Auth layer - the account's Ed25519 request key
[UPDATE]: When the key encoding or the signing message format changes
*/

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bs58;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use crate::http::error::{Result, VenueError};

/// Signature scheme version attached to every signed request.
pub const SIGNATURE_VERSION: &str = "v1";

/// The account's Ed25519 request key.
///
/// The public half is registered with the venue during the session handshake;
/// afterwards every mutating request carries a signature minted here. The
/// message the venue verifies is
/// `"{version},{request_id},{timestamp},{payload}"`.
#[derive(Debug, Clone)]
pub struct RequestKey {
    signing_key: SigningKey,
}

impl RequestKey {
    /// Generate a fresh random key, e.g. for a first-time session handshake.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_key(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Decode operator-supplied key material: a base64 32-byte seed, or the
    /// 64-byte seed-plus-public-key form some wallets export.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|err| VenueError::Authentication {
                message: format!("signing key is not valid base64: {err}"),
            })?;

        let seed: [u8; 32] = match decoded.len() {
            32 => decoded.as_slice().try_into().expect("length checked"),
            64 => decoded[..32].try_into().expect("length checked"),
            other => {
                return Err(VenueError::Authentication {
                    message: format!("signing key decodes to {other} bytes, expected 32 or 64"),
                });
            }
        };

        Ok(Self::from_secret_key(&seed))
    }

    /// The handshake's `requestId`: the base58-encoded public key.
    pub fn handshake_request_id(&self) -> String {
        bs58::encode(self.signing_key.verifying_key().as_bytes()).into_string()
    }

    /// Base64 signature over the handshake challenge payload.
    pub fn sign_challenge(&self, signed_data: &str) -> String {
        BASE64.encode(self.signing_key.sign(signed_data.as_bytes()).to_bytes())
    }

    /// Base64 signature for a body-signed request under [`SIGNATURE_VERSION`].
    pub fn request_signature(&self, request_id: &str, timestamp: u64, payload: &str) -> String {
        let message = format!("{SIGNATURE_VERSION},{request_id},{timestamp},{payload}");
        BASE64.encode(self.signing_key.sign(message.as_bytes()).to_bytes())
    }
}
