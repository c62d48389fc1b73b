//! Error types for the node bridge.

use teamrun_core::{CoreError, NodeId};
use thiserror::Error;

/// Errors that can occur on the node-to-node transport.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Network or protocol failure talking to a peer.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Peer answered with a non-success status.
    #[error("Peer rejected request with HTTP {status}: {code}: {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// Node is not in the directory.
    #[error("UNKNOWN_NODE: node '{0}' is not in the directory")]
    UnknownNode(NodeId),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Domain error while building or parsing a message.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Reading local configuration failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &str {
        match self {
            Self::Http(_) => "TRANSPORT_ERROR",
            Self::Rejected { code, .. } => code,
            Self::UnknownNode(_) => "UNKNOWN_NODE",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Core(e) => e.code(),
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Client errors (4xx, including auth rejections) are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Rejected { status, .. } => !(400..500).contains(status),
            _ => false,
        }
    }
}
