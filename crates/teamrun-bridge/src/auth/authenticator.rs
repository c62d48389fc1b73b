//! Signing and verification of internal requests.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use teamrun_core::NodeId;

use super::canonical::body_digest;
use super::headers::SignedHeaders;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_MAX_CLOCK_SKEW_MS: i64 = 30_000;
pub const DEFAULT_NONCE_TTL_MS: i64 = 120_000;

/// Deployment-wide authentication mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Nonce, key id and HMAC signature required.
    #[default]
    StrictSigned,
    /// Only node allow-listing and timestamp freshness.
    TrustedLan,
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict_signed" => Ok(Self::StrictSigned),
            "trusted_lan" => Ok(Self::TrustedLan),
            other => Err(format!(
                "unknown auth mode '{}' (expected strict_signed or trusted_lan)",
                other
            )),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StrictSigned => f.write_str("strict_signed"),
            Self::TrustedLan => f.write_str("trusted_lan"),
        }
    }
}

/// Authenticator configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,

    /// Node id this process signs as.
    pub local_node_id: NodeId,

    /// Key id used when signing.
    pub signing_key_id: String,

    /// Shared secrets by key id, used for signing and verification.
    pub secrets: HashMap<String, String>,

    /// Source nodes accepted by `verify`. `None` accepts any node id.
    pub allowed_source_nodes: Option<HashSet<NodeId>>,

    pub max_clock_skew_ms: i64,
    pub nonce_ttl_ms: i64,
}

impl AuthConfig {
    pub fn new(local_node_id: impl Into<NodeId>, mode: AuthMode) -> Self {
        Self {
            mode,
            local_node_id: local_node_id.into(),
            signing_key_id: "default".to_string(),
            secrets: HashMap::new(),
            allowed_source_nodes: None,
            max_clock_skew_ms: DEFAULT_MAX_CLOCK_SKEW_MS,
            nonce_ttl_ms: DEFAULT_NONCE_TTL_MS,
        }
    }

    /// Register a secret and sign with it.
    pub fn with_signing_secret(
        mut self,
        key_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let key_id = key_id.into();
        self.secrets.insert(key_id.clone(), secret.into());
        self.signing_key_id = key_id;
        self
    }

    /// Register an additional secret accepted during verification.
    pub fn with_verification_secret(
        mut self,
        key_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.secrets.insert(key_id.into(), secret.into());
        self
    }

    pub fn with_allowed_source_nodes<I, N>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.allowed_source_nodes = Some(nodes.into_iter().map(Into::into).collect());
        self
    }
}

/// Stable rejection codes, in verification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthRejectionCode {
    MissingSourceNode,
    SourceNodeNotAllowed,
    MissingTimestamp,
    InvalidTimestamp,
    TimestampOutOfRange,
    MissingNonce,
    ReplayDetected,
    MissingSignature,
    UnknownKeyId,
    InvalidSignature,
}

impl AuthRejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingSourceNode => "MISSING_SOURCE_NODE",
            Self::SourceNodeNotAllowed => "SOURCE_NODE_NOT_ALLOWED",
            Self::MissingTimestamp => "MISSING_TIMESTAMP",
            Self::InvalidTimestamp => "INVALID_TIMESTAMP",
            Self::TimestampOutOfRange => "TIMESTAMP_OUT_OF_RANGE",
            Self::MissingNonce => "MISSING_NONCE",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::MissingSignature => "MISSING_SIGNATURE",
            Self::UnknownKeyId => "UNKNOWN_KEY_ID",
            Self::InvalidSignature => "INVALID_SIGNATURE",
        }
    }
}

impl fmt::Display for AuthRejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct AuthRejection {
    pub code: AuthRejectionCode,
    pub message: String,
}

impl AuthRejection {
    fn new(code: AuthRejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Signs outbound and verifies inbound internal requests.
pub struct InternalEnvelopeAuthenticator {
    config: AuthConfig,
    /// `sourceNodeId:nonce` → first seen (ms).
    seen_nonces: Mutex<HashMap<String, i64>>,
}

impl InternalEnvelopeAuthenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            seen_nonces: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.config.mode
    }

    pub fn local_node_id(&self) -> &NodeId {
        &self.config.local_node_id
    }

    /// Sign `body` as the local node at the current time.
    pub fn sign(&self, body: &Value) -> SignedHeaders {
        self.sign_at(body, now_ms())
    }

    /// Sign `body` as the local node at `timestamp_ms`.
    ///
    /// In strict mode a missing signing secret yields headers without a
    /// signature, which every strict verifier rejects with
    /// `MISSING_SIGNATURE`.
    pub fn sign_at(&self, body: &Value, timestamp_ms: i64) -> SignedHeaders {
        let node_id = self.config.local_node_id.as_str().to_string();
        let timestamp = timestamp_ms.to_string();

        if self.config.mode == AuthMode::TrustedLan {
            return SignedHeaders {
                node_id: Some(node_id),
                timestamp: Some(timestamp),
                ..Default::default()
            };
        }

        let nonce = generate_nonce();
        let key_id = self.config.signing_key_id.clone();
        let signature = match self.config.secrets.get(&key_id) {
            Some(secret) => Some(hex::encode(compute_mac(
                secret, &node_id, &timestamp, &nonce, body,
            ))),
            None => {
                warn!(key_id = %key_id, "No secret configured for signing key");
                None
            }
        };

        SignedHeaders {
            node_id: Some(node_id),
            timestamp: Some(timestamp),
            nonce: Some(nonce),
            key_id: Some(key_id),
            signature,
        }
    }

    /// Verify a request against the current time.
    pub fn verify(&self, headers: &SignedHeaders, body: &Value) -> Result<NodeId, AuthRejection> {
        self.verify_at(headers, body, now_ms())
    }

    /// Check the header-only part of verification against the current time.
    pub fn check_origin(&self, headers: &SignedHeaders) -> Result<NodeId, AuthRejection> {
        self.check_origin_at(headers, now_ms())
    }

    /// Source node and timestamp checks, which need no body. Runs the same
    /// steps, in the same order, as the start of [`verify_at`](Self::verify_at).
    pub fn check_origin_at(
        &self,
        headers: &SignedHeaders,
        now_ms: i64,
    ) -> Result<NodeId, AuthRejection> {
        let node_id = headers.node_id.as_deref().ok_or_else(|| {
            AuthRejection::new(AuthRejectionCode::MissingSourceNode, "missing source node header")
        })?;
        let source = NodeId::new(node_id);
        if let Some(allowed) = &self.config.allowed_source_nodes {
            if !allowed.contains(&source) {
                return Err(AuthRejection::new(
                    AuthRejectionCode::SourceNodeNotAllowed,
                    format!("source node '{}' is not allowed", source),
                ));
            }
        }

        let timestamp_raw = headers.timestamp.as_deref().ok_or_else(|| {
            AuthRejection::new(AuthRejectionCode::MissingTimestamp, "missing timestamp header")
        })?;
        let timestamp: i64 = timestamp_raw.parse().map_err(|_| {
            AuthRejection::new(
                AuthRejectionCode::InvalidTimestamp,
                format!("timestamp '{}' is not an integer", timestamp_raw),
            )
        })?;
        let skew = (now_ms - timestamp).abs();
        if skew > self.config.max_clock_skew_ms {
            return Err(AuthRejection::new(
                AuthRejectionCode::TimestampOutOfRange,
                format!(
                    "timestamp skew {}ms exceeds {}ms",
                    skew, self.config.max_clock_skew_ms
                ),
            ));
        }

        Ok(source)
    }

    /// Verify a request, returning the authenticated source node.
    pub fn verify_at(
        &self,
        headers: &SignedHeaders,
        body: &Value,
        now_ms: i64,
    ) -> Result<NodeId, AuthRejection> {
        self.prune_nonces(now_ms);

        let source = self.check_origin_at(headers, now_ms)?;
        if self.config.mode == AuthMode::TrustedLan {
            return Ok(source);
        }

        let nonce = headers.nonce.as_deref().ok_or_else(|| {
            AuthRejection::new(AuthRejectionCode::MissingNonce, "missing nonce header")
        })?;
        let nonce_key = format!("{}:{}", source, nonce);
        // Held until the nonce is recorded so concurrent copies cannot all pass.
        let mut nonces = self.seen_nonces.lock().unwrap_or_else(|e| e.into_inner());
        if nonces.contains_key(&nonce_key) {
            return Err(AuthRejection::new(
                AuthRejectionCode::ReplayDetected,
                format!("nonce already used by '{}'", source),
            ));
        }

        let (key_id, signature) = match (headers.key_id.as_deref(), headers.signature.as_deref()) {
            (Some(key_id), Some(signature)) => (key_id, signature),
            _ => {
                return Err(AuthRejection::new(
                    AuthRejectionCode::MissingSignature,
                    "missing key id or signature header",
                ))
            }
        };
        let secret = self.config.secrets.get(key_id).ok_or_else(|| {
            AuthRejection::new(
                AuthRejectionCode::UnknownKeyId,
                format!("unknown key id '{}'", key_id),
            )
        })?;

        // Present: checked by `check_origin_at`.
        let timestamp_raw = headers.timestamp.as_deref().unwrap_or_default();
        let expected = compute_mac(secret, source.as_str(), timestamp_raw, nonce, body);
        let provided = hex::decode(signature).unwrap_or_default();
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(AuthRejection::new(
                AuthRejectionCode::InvalidSignature,
                "signature mismatch",
            ));
        }

        nonces.insert(nonce_key, now_ms);
        drop(nonces);
        debug!(source_node = %source, "Internal request verified");
        Ok(source)
    }

    fn prune_nonces(&self, now_ms: i64) {
        let ttl = self.config.nonce_ttl_ms;
        let mut nonces = self.seen_nonces.lock().unwrap_or_else(|e| e.into_inner());
        nonces.retain(|_, seen_at| now_ms - *seen_at <= ttl);
    }

    #[cfg(test)]
    fn cached_nonce_count(&self) -> usize {
        self.seen_nonces.lock().unwrap().len()
    }
}

fn compute_mac(secret: &str, node_id: &str, timestamp: &str, nonce: &str, body: &Value) -> Vec<u8> {
    let payload = format!("{}\n{}\n{}\n{}", node_id, timestamp, nonce, body_digest(body));
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(payload.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn signer() -> InternalEnvelopeAuthenticator {
        InternalEnvelopeAuthenticator::new(
            AuthConfig::new("node-host", AuthMode::StrictSigned)
                .with_signing_secret("k1", "s3cret"),
        )
    }

    fn verifier() -> InternalEnvelopeAuthenticator {
        InternalEnvelopeAuthenticator::new(
            AuthConfig::new("node-worker-1", AuthMode::StrictSigned)
                .with_signing_secret("k1", "s3cret")
                .with_allowed_source_nodes(["node-host"]),
        )
    }

    fn body() -> Value {
        json!({ "teamRunId": "run-1", "runVersion": 1, "kind": "CONTROL_STOP", "payload": {} })
    }

    fn code(result: Result<NodeId, AuthRejection>) -> AuthRejectionCode {
        result.unwrap_err().code
    }

    #[test]
    fn test_signed_request_verifies() {
        let headers = signer().sign_at(&body(), NOW);
        let source = verifier().verify_at(&headers, &body(), NOW + 5).unwrap();
        assert_eq!(source.as_str(), "node-host");
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let headers = signer().sign_at(&body(), NOW);
        let reordered: Value = serde_json::from_str(
            r#"{"payload":{},"kind":"CONTROL_STOP","runVersion":1,"teamRunId":"run-1"}"#,
        )
        .unwrap();
        assert!(verifier().verify_at(&headers, &reordered, NOW).is_ok());
    }

    #[test]
    fn test_replayed_nonce_is_rejected() {
        let verifier = verifier();
        let headers = signer().sign_at(&body(), NOW);
        assert!(verifier.verify_at(&headers, &body(), NOW).is_ok());
        assert_eq!(
            code(verifier.verify_at(&headers, &body(), NOW + 1_000)),
            AuthRejectionCode::ReplayDetected
        );
    }

    #[test]
    fn test_concurrent_copies_of_one_nonce_accept_once() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        const COPIES: usize = 8;
        for _ in 0..50 {
            let verifier = Arc::new(verifier());
            let headers = signer().sign_at(&body(), NOW);
            let barrier = Arc::new(Barrier::new(COPIES));

            let handles: Vec<_> = (0..COPIES)
                .map(|_| {
                    let verifier = verifier.clone();
                    let headers = headers.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        verifier.verify_at(&headers, &body(), NOW)
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| e.code == AuthRejectionCode::ReplayDetected));
            assert_eq!(verifier.cached_nonce_count(), 1);
        }
    }

    #[test]
    fn test_expired_nonce_is_pruned() {
        let verifier = verifier();
        let headers = signer().sign_at(&body(), NOW);
        assert!(verifier.verify_at(&headers, &body(), NOW).is_ok());
        assert_eq!(verifier.cached_nonce_count(), 1);

        let later = NOW + DEFAULT_NONCE_TTL_MS + 1;
        let fresh = signer().sign_at(&body(), later);
        assert!(verifier.verify_at(&fresh, &body(), later).is_ok());
        assert_eq!(verifier.cached_nonce_count(), 1);
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let headers = signer().sign_at(&body(), NOW - DEFAULT_MAX_CLOCK_SKEW_MS - 1);
        assert_eq!(
            code(verifier().verify_at(&headers, &body(), NOW)),
            AuthRejectionCode::TimestampOutOfRange
        );
    }

    #[test]
    fn test_flipped_signature_byte_is_rejected() {
        let verifier = verifier();
        let mut headers = signer().sign_at(&body(), NOW);
        let mut signature = headers.signature.take().unwrap().into_bytes();
        signature[0] = if signature[0] == b'0' { b'1' } else { b'0' };
        headers.signature = Some(String::from_utf8(signature).unwrap());

        assert_eq!(
            code(verifier.verify_at(&headers, &body(), NOW)),
            AuthRejectionCode::InvalidSignature
        );
        // Rejected requests leave the nonce cache untouched.
        assert_eq!(verifier.cached_nonce_count(), 0);
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let headers = signer().sign_at(&body(), NOW);
        let tampered =
            json!({ "teamRunId": "run-2", "runVersion": 1, "kind": "CONTROL_STOP", "payload": {} });
        assert_eq!(
            code(verifier().verify_at(&headers, &tampered, NOW)),
            AuthRejectionCode::InvalidSignature
        );
    }

    #[test]
    fn test_rejection_order() {
        let verifier = verifier();
        let good = signer().sign_at(&body(), NOW);

        let mut h = good.clone();
        h.node_id = None;
        assert_eq!(
            code(verifier.verify_at(&h, &body(), NOW)),
            AuthRejectionCode::MissingSourceNode
        );

        let mut h = good.clone();
        h.node_id = Some("node-rogue".to_string());
        assert_eq!(
            code(verifier.verify_at(&h, &body(), NOW)),
            AuthRejectionCode::SourceNodeNotAllowed
        );

        let mut h = good.clone();
        h.timestamp = None;
        assert_eq!(code(verifier.verify_at(&h, &body(), NOW)), AuthRejectionCode::MissingTimestamp);

        let mut h = good.clone();
        h.timestamp = Some("yesterday".to_string());
        assert_eq!(code(verifier.verify_at(&h, &body(), NOW)), AuthRejectionCode::InvalidTimestamp);

        let mut h = good.clone();
        h.nonce = None;
        assert_eq!(code(verifier.verify_at(&h, &body(), NOW)), AuthRejectionCode::MissingNonce);

        let mut h = good.clone();
        h.signature = None;
        assert_eq!(code(verifier.verify_at(&h, &body(), NOW)), AuthRejectionCode::MissingSignature);

        let mut h = good.clone();
        h.key_id = Some("k9".to_string());
        assert_eq!(code(verifier.verify_at(&h, &body(), NOW)), AuthRejectionCode::UnknownKeyId);
    }

    #[test]
    fn test_origin_check_needs_no_body() {
        let verifier = verifier();
        let good = signer().sign_at(&body(), NOW);
        assert_eq!(verifier.check_origin_at(&good, NOW).unwrap().as_str(), "node-host");

        let mut h = good.clone();
        h.node_id = Some("node-rogue".to_string());
        assert_eq!(
            code(verifier.check_origin_at(&h, NOW)),
            AuthRejectionCode::SourceNodeNotAllowed
        );
        assert_eq!(
            code(verifier.check_origin_at(&good, NOW + DEFAULT_MAX_CLOCK_SKEW_MS + 1)),
            AuthRejectionCode::TimestampOutOfRange
        );
        // Origin checks never touch the nonce cache.
        assert_eq!(verifier.cached_nonce_count(), 0);
    }

    #[test]
    fn test_trusted_lan_checks_only_node_and_timestamp() {
        let lan_signer =
            InternalEnvelopeAuthenticator::new(AuthConfig::new("node-host", AuthMode::TrustedLan));
        let lan_verifier = InternalEnvelopeAuthenticator::new(
            AuthConfig::new("node-worker-1", AuthMode::TrustedLan)
                .with_allowed_source_nodes(["node-host"]),
        );

        let headers = lan_signer.sign_at(&body(), NOW);
        assert!(headers.nonce.is_none());
        assert!(headers.signature.is_none());
        assert!(lan_verifier.verify_at(&headers, &body(), NOW).is_ok());
        // No nonce tracking, so the same headers verify again.
        assert!(lan_verifier.verify_at(&headers, &body(), NOW).is_ok());

        let stale = lan_signer.sign_at(&body(), NOW - 60_000);
        assert_eq!(
            code(lan_verifier.verify_at(&stale, &body(), NOW)),
            AuthRejectionCode::TimestampOutOfRange
        );
    }

    #[test]
    fn test_auth_mode_parses_cli_values() {
        assert_eq!("trusted_lan".parse::<AuthMode>().unwrap(), AuthMode::TrustedLan);
        assert_eq!("strict_signed".parse::<AuthMode>().unwrap(), AuthMode::StrictSigned);
        assert!("open".parse::<AuthMode>().is_err());
    }
}
