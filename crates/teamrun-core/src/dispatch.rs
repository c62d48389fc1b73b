//! Dispatch outcome taxonomy shared by the routing port and the orchestrator.

use std::fmt;

use thiserror::Error;

/// Machine-readable dispatch failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchErrorCode {
    /// The target member has no placement in this run.
    TargetMemberNotPlaced,
    /// Delivery to the owning node failed.
    DispatchFailed,
    /// No run registered under the given id.
    RunNotFound,
    /// The run was stopped by the degradation policy while serving this call.
    RunAutoStopped,
}

impl DispatchErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TargetMemberNotPlaced => "TARGET_MEMBER_NOT_PLACED",
            Self::DispatchFailed => "DISPATCH_FAILED",
            Self::RunNotFound => "RUN_NOT_FOUND",
            Self::RunAutoStopped => "RUN_AUTO_STOPPED",
        }
    }
}

impl fmt::Display for DispatchErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct DispatchError {
    pub code: DispatchErrorCode,
    pub message: String,
}

impl DispatchError {
    pub fn new(code: DispatchErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn target_not_placed(member_name: &str) -> Self {
        Self::new(
            DispatchErrorCode::TargetMemberNotPlaced,
            format!("member '{}' has no placement in this run", member_name),
        )
    }

    /// Wrap an underlying failure, keeping its message.
    pub fn dispatch_failed(error: impl fmt::Display) -> Self {
        Self::new(DispatchErrorCode::DispatchFailed, error.to_string())
    }
}

/// Outcome of routing one command.
pub type DispatchResult = Result<(), DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_failed_preserves_message() {
        let err = DispatchError::dispatch_failed("connection refused");
        assert_eq!(err.code, DispatchErrorCode::DispatchFailed);
        assert_eq!(err.message, "connection refused");
        assert_eq!(err.to_string(), "DISPATCH_FAILED: connection refused");
    }
}
