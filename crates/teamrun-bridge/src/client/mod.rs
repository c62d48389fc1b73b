//! Outbound clients for the internal routes.

mod command;
mod event;

pub use command::NodeBridgeClient;
pub use event::EventUplinkClient;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::auth::InternalEnvelopeAuthenticator;
use crate::error::BridgeError;
use crate::responses::ErrorBody;
use crate::retry::RetryPolicy;

/// Posts signed JSON bodies under a retry policy.
///
/// Every attempt is signed again so a retry never reuses a nonce.
#[derive(Clone)]
struct SignedPoster {
    http: reqwest::Client,
    authenticator: Arc<InternalEnvelopeAuthenticator>,
    retry: RetryPolicy,
}

impl SignedPoster {
    fn new(authenticator: Arc<InternalEnvelopeAuthenticator>, retry: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            authenticator,
            retry,
        }
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T, BridgeError> {
        self.retry
            .execute_if(|| self.post_once(url, body), BridgeError::is_retryable)
            .await
    }

    async fn post_once<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<T, BridgeError> {
        let headers = self.authenticator.sign(body);
        debug!(url = %url, "POST internal request");

        let mut request = self.http.post(url).json(body);
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| {
                ErrorBody::new(format!("HTTP_{}", status.as_u16()), text)
            });
            return Err(BridgeError::Rejected {
                status: status.as_u16(),
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.json().await?)
    }
}
