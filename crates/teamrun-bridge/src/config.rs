//! Command-line options shared by every node daemon.

use std::time::Duration;

use clap::Args;
use teamrun_core::NodeId;

use crate::auth::{AuthConfig, AuthMode, DEFAULT_MAX_CLOCK_SKEW_MS, DEFAULT_NONCE_TTL_MS};
use crate::retry::RetryPolicy;

/// Authentication and retry options for the internal transport.
#[derive(Args, Debug, Clone)]
pub struct BridgeArgs {
    /// Authentication mode for internal requests (strict_signed or trusted_lan)
    #[arg(long, env = "TEAMRUN_AUTH_MODE", default_value = "strict_signed")]
    pub auth_mode: AuthMode,

    /// Key id sent with signed requests
    #[arg(long, env = "TEAMRUN_KEY_ID", default_value = "default")]
    pub key_id: String,

    /// Shared HMAC secret for the key id
    #[arg(long, env = "TEAMRUN_SHARED_SECRET", hide_env_values = true)]
    pub shared_secret: Option<String>,

    /// Comma-separated node ids allowed to call this node (empty allows any)
    #[arg(long, env = "TEAMRUN_ALLOWED_NODES", value_delimiter = ',')]
    pub allowed_nodes: Vec<String>,

    /// Maximum accepted clock skew in milliseconds
    #[arg(long, env = "TEAMRUN_MAX_CLOCK_SKEW_MS", default_value_t = DEFAULT_MAX_CLOCK_SKEW_MS)]
    pub max_clock_skew_ms: i64,

    /// How long a seen nonce is remembered, in milliseconds
    #[arg(long, env = "TEAMRUN_NONCE_TTL_MS", default_value_t = DEFAULT_NONCE_TTL_MS)]
    pub nonce_ttl_ms: i64,

    /// Attempts per outbound request, including the first
    #[arg(long, env = "TEAMRUN_RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    /// Base delay between attempts in milliseconds
    #[arg(long, env = "TEAMRUN_RETRY_BASE_DELAY_MS", default_value_t = 200)]
    pub retry_base_delay_ms: u64,

    /// Jitter applied to the retry delay (0.0 - 1.0)
    #[arg(long, env = "TEAMRUN_RETRY_JITTER", default_value_t = 0.2)]
    pub retry_jitter: f64,
}

impl BridgeArgs {
    /// Authenticator configuration for `local_node_id`.
    pub fn auth_config(&self, local_node_id: &NodeId) -> AuthConfig {
        let mut config = AuthConfig::new(local_node_id.clone(), self.auth_mode);
        config.max_clock_skew_ms = self.max_clock_skew_ms;
        config.nonce_ttl_ms = self.nonce_ttl_ms;
        config.signing_key_id = self.key_id.clone();
        if let Some(secret) = &self.shared_secret {
            config = config.with_signing_secret(self.key_id.clone(), secret.clone());
        }
        let allowed: Vec<&str> = self
            .allowed_nodes
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();
        if !allowed.is_empty() {
            config = config.with_allowed_source_nodes(allowed);
        }
        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            jitter_ratio: self.retry_jitter,
        }
    }
}
