//! # FactorForge Common
//!
//! Shared types, errors, and oracle contracts for the factor mining core.
//!
//! ## Core Types
//!
//! - [`FactorCandidate`]: a proposed factor with a forward-only lifecycle
//! - [`BacktestMetrics`]: IC / RankIC / ARR / MDD / CR / IR from the backtest oracle
//! - [`FactorRecord`]/[`LibraryDocument`]: persisted library shape
//! - [`FeedbackSummary`]/[`CorrectionDiagnostic`]: structured text for the oracle
//!
//! ## Oracles
//!
//! - [`ProposalOracle`]: propose, verify, plan directions
//! - [`BacktestOracle`]: evaluate an expression over a period

pub mod error;
pub mod oracle;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    EvaluationError, ForgeError, LibraryError, OracleError, ParseError, PoolError, Result,
    TransitionError,
};
pub use oracle::{BacktestOracle, Directive, ParentFactor, ProposalContext, ProposalOracle};
pub use types::{
    candidate::{
        factor_id_for, CandidateStatus, EvolutionPhase, FactorCandidate, FactorSpec, Lineage,
        RejectionReason,
    },
    feedback::{CorrectionDiagnostic, FailureKind, FeedbackSummary, FeedbackVerdict},
    metrics::{BacktestMetrics, BacktestPeriod, MetricKind, QualityTier},
    record::{FactorRecord, LibraryDocument, LibraryMetadata, Provenance},
};

#[cfg(feature = "mocks")]
pub use oracle::{MockBacktestOracle, MockProposalOracle};

/// FactorForge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default library file name
pub const DEFAULT_LIBRARY_FILE: &str = "all_factors_library.json";

/// Default per-call oracle timeout in seconds
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 600;
