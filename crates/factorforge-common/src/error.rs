//! Error types for FactorForge
//!
//! Provides a unified error type and domain-specific error variants.
//! Expected quality outcomes (complexity, redundancy or consistency
//! violations) are not errors; see [`crate::RejectionReason`].

use thiserror::Error;
use uuid::Uuid;

pub use factorforge_expr::ParseError;

use crate::types::candidate::CandidateStatus;

/// Result type alias using ForgeError
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Unified error type for FactorForge operations
#[derive(Debug, Error)]
pub enum ForgeError {
    // Expression errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    // Oracle errors
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    // Backtest errors
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    // Library persistence errors
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    // Trajectory pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    // Candidate lifecycle errors
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Filesystem / process errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl ForgeError {
    /// Whether a caller-side retry layer may try the same operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            ForgeError::Oracle(err) => err.is_retryable(),
            ForgeError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Proposal / verification oracle failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("Oracle call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Oracle returned unparsable output: {0}")]
    InvalidResponse(String),

    #[error("Consistency verdict unknown: {0}")]
    VerdictUnknown(String),

    #[error("Oracle refused the request: {0}")]
    Refused(String),
}

impl OracleError {
    /// Transient failures are surfaced to the caller's retry layer
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OracleError::Refused(_))
    }
}

/// Backtest oracle failures. A candidate hit by one of these is rejected but
/// the failure does not count against its correction budget.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("Backtest failed: {0}")]
    Failed(String),

    #[error("No market data for {expression} in {period}")]
    NoData { expression: String, period: String },

    #[error("Backtest produced unreadable metrics: {0}")]
    InvalidOutput(String),

    #[error("Backtest timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// Factor library persistence errors
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Failed to read library {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to write library {path}: {message}")]
    Write { path: String, message: String },

    #[error("Library file {path} is corrupt: {message}")]
    Corrupt { path: String, message: String },

    #[error("Factor already admitted: {0}")]
    DuplicateId(String),

    #[error("Candidate {candidate} is not admissible in status {status}")]
    NotAdmissible {
        candidate: Uuid,
        status: CandidateStatus,
    },
}

/// Trajectory pool errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    #[error("Trajectory pool has no viable heads")]
    Empty,

    #[error("Trajectory not found: {0}")]
    UnknownTrajectory(Uuid),

    #[error("Trajectory {0} is exhausted")]
    Exhausted(Uuid),

    #[error("Candidate {candidate} was not admitted (status {status})")]
    NotAdmitted {
        candidate: Uuid,
        status: CandidateStatus,
    },
}

/// Candidate status transition errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("Cannot move candidate from {from} back to {to}")]
    Backward {
        from: CandidateStatus,
        to: CandidateStatus,
    },

    #[error("Candidate is already {0} and immutable")]
    Finalized(CandidateStatus),

    #[error("Candidate in {from} cannot become {to}")]
    Invalid {
        from: CandidateStatus,
        to: CandidateStatus,
    },
}

// Implement From for common external error types
impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        ForgeError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ForgeError {
    fn from(err: std::io::Error) -> Self {
        ForgeError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for ForgeError {
    fn from(err: anyhow::Error) -> Self {
        ForgeError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ForgeError::Parse(ParseError::UnknownOperator("MACD".to_string()));
        assert!(err.to_string().contains("MACD"));
    }

    #[test]
    fn test_oracle_retryability() {
        assert!(OracleError::Timeout { elapsed_ms: 600_000 }.is_retryable());
        assert!(OracleError::InvalidResponse("not json".into()).is_retryable());
        assert!(OracleError::VerdictUnknown("garbled".into()).is_retryable());
        assert!(!OracleError::Refused("policy".into()).is_retryable());

        assert!(ForgeError::from(OracleError::Unavailable("down".into())).is_retryable());
        assert!(!ForgeError::from(PoolError::Empty).is_retryable());
    }

    #[test]
    fn test_transition_error() {
        let err = TransitionError::Backward {
            from: CandidateStatus::Gated,
            to: CandidateStatus::Parsed,
        };
        assert!(err.to_string().contains("gated"));
    }
}
