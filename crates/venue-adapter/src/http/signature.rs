/*
[INPUT]:  Body-signed request metadata
[OUTPUT]: The header names of the body-signature wire contract
[POS]:    HTTP layer - signed-request header schema
[UPDATE]: When the venue renames its signature headers
*/

// Mutating endpoints carry four headers: the scheme version, a per-request
// UUID, a millisecond timestamp, and the base64 Ed25519 signature of
// "{version},{request_id},{timestamp},{payload}". The signature is minted by
// [`RequestKey::request_signature`](crate::auth::RequestKey::request_signature);
// the client fills the other three inline when it sends the request.

/// Header carrying the signature scheme version.
pub const HEADER_REQUEST_VERSION: &str = "x-request-version";

/// Header carrying the request id used in signing.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Header carrying the request timestamp used in signing.
pub const HEADER_REQUEST_TIMESTAMP: &str = "x-request-timestamp";

/// Header carrying the base64-encoded Ed25519 signature.
pub const HEADER_REQUEST_SIGNATURE: &str = "x-request-signature";
