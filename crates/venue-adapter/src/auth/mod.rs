/*
[INPUT]:  Authentication configuration and key material
[OUTPUT]: Session tokens, signed requests, and auth errors
[POS]:    Auth layer - venue authentication
[UPDATE]: When the session flow or signature methods change
*/

pub mod session;
pub mod signer;

pub use session::{SessionManager, SessionToken};
pub use signer::{RequestKey, SIGNATURE_VERSION};
