//! # FactorForge Gate
//!
//! Quality gate deciding whether a proposed factor enters the library.
//!
//! - [`regulator::Regulator`]: admit / reject / retry with bounded corrections
//! - [`consistency::ConsistencyChecker`]: oracle-backed semantic agreement check
//! - [`config::GateConfig`]: enable flags and thresholds
//! - [`retry::RetryPolicy`]: bounded retries of transient oracle failures

pub mod config;
pub mod consistency;
pub mod regulator;
pub mod retry;

pub use config::{ConsistencyMode, GateConfig};
pub use consistency::{parse_verdict, ConsistencyChecker, ConsistencyVerdict};
pub use regulator::{GateOutcome, GateResult, Regulator};
pub use retry::RetryPolicy;

/// Default correction budget per logical candidate
pub const DEFAULT_MAX_CORRECTION_ATTEMPTS: u32 = 3;

/// Extra attempts for retryable oracle failures
pub const DEFAULT_ORACLE_RETRIES: u32 = 2;

/// Linear backoff step between oracle retries
pub const ORACLE_RETRY_BACKOFF_MS: u64 = 250;
