//! Authentication header set.

use axum::http::HeaderMap;

pub const HEADER_NODE_ID: &str = "x-ab-node-id";
pub const HEADER_TIMESTAMP: &str = "x-ab-ts";
pub const HEADER_NONCE: &str = "x-ab-nonce";
pub const HEADER_KEY_ID: &str = "x-ab-key-id";
pub const HEADER_SIGNATURE: &str = "x-ab-signature";

/// Raw authentication headers of one request.
///
/// Values are kept as received so the verifier can tell a missing header from
/// a malformed one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedHeaders {
    pub node_id: Option<String>,
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
    pub key_id: Option<String>,
    pub signature: Option<String>,
}

impl SignedHeaders {
    /// Extract the header set from an HTTP header map.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            node_id: get(HEADER_NODE_ID),
            timestamp: get(HEADER_TIMESTAMP),
            nonce: get(HEADER_NONCE),
            key_id: get(HEADER_KEY_ID),
            signature: get(HEADER_SIGNATURE),
        }
    }

    /// Name/value pairs of the headers that are present.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            (HEADER_NODE_ID, &self.node_id),
            (HEADER_TIMESTAMP, &self.timestamp),
            (HEADER_NONCE, &self.nonce),
            (HEADER_KEY_ID, &self.key_id),
            (HEADER_SIGNATURE, &self.signature),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_map_round_trip_skips_blank_values() {
        let mut map = HeaderMap::new();
        map.insert(HEADER_NODE_ID, HeaderValue::from_static("node-host"));
        map.insert(HEADER_TIMESTAMP, HeaderValue::from_static("1700000000000"));
        map.insert(HEADER_NONCE, HeaderValue::from_static("  "));

        let headers = SignedHeaders::from_header_map(&map);
        assert_eq!(headers.node_id.as_deref(), Some("node-host"));
        assert_eq!(headers.nonce, None);
        assert_eq!(headers.pairs().len(), 2);
    }
}
