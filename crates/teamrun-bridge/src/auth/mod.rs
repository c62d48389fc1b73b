//! Internal envelope authentication.
//!
//! Every node-to-node request carries a small header set identifying the
//! sending node. In `strict_signed` mode the headers also carry a nonce and an
//! HMAC-SHA256 signature over
//!
//! ```text
//! sourceNodeId \n timestampMs \n nonce \n hex(sha256(canonicalJson(body)))
//! ```
//!
//! In `trusted_lan` mode only node allow-listing and timestamp freshness are
//! checked.

mod authenticator;
pub mod canonical;
mod headers;

pub use authenticator::{
    AuthConfig, AuthMode, AuthRejection, AuthRejectionCode, InternalEnvelopeAuthenticator,
    DEFAULT_MAX_CLOCK_SKEW_MS, DEFAULT_NONCE_TTL_MS,
};
pub use headers::{
    SignedHeaders, HEADER_KEY_ID, HEADER_NODE_ID, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP,
};
