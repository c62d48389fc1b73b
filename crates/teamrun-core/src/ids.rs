//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create a new id from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the inner string reference.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Opaque, globally unique identifier of one run of a team.
    TeamRunId
);

string_id!(
    /// Identifier of a stored team definition.
    TeamDefinitionId
);

string_id!(
    /// Externally visible identifier of a host-local team instance.
    TeamId
);

string_id!(
    /// Identifier of a node in the cluster (host or worker).
    NodeId
);

string_id!(
    /// Identifier of a single command envelope.
    EnvelopeId
);

impl TeamRunId {
    /// Generate a new random run id.
    pub fn generate() -> Self {
        Self(format!("run-{}", Uuid::new_v4()))
    }
}

impl EnvelopeId {
    /// Generate a new random envelope id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_run_id_generate() {
        let id1 = TeamRunId::generate();
        let id2 = TeamRunId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("run-"));
    }

    #[test]
    fn test_id_display() {
        let id = NodeId::new("node-worker-1");
        assert_eq!(format!("{}", id), "node-worker-1");
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = TeamDefinitionId::new("def-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"def-1\"");
    }
}
