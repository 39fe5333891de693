//! Feedback and correction diagnostics
//!
//! Two kinds of structured text flow back to the proposal oracle:
//! - [`FeedbackSummary`]: produced after a backtest, used as the failure
//!   signal of a later mutation
//! - [`CorrectionDiagnostic`]: produced by the quality gate when a candidate
//!   may be rewritten and resubmitted

use serde::{Deserialize, Serialize};
use std::fmt;

use super::metrics::MetricKind;

/// How a backtested candidate compares with its trajectory's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackVerdict {
    /// First admitted factor of the trajectory
    Baseline,
    Improved,
    Degraded,
}

/// Deterministic summary of one backtest result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub verdict: FeedbackVerdict,
    /// Composite fitness of the candidate
    pub fitness: f64,
    /// Best fitness of the trajectory before this candidate, if any
    pub reference_fitness: Option<f64>,
    /// Metric that contributed least (or is missing)
    pub weakest_metric: Option<MetricKind>,
    /// Human-readable observations, most important first
    pub signals: Vec<String>,
}

impl FeedbackSummary {
    /// One-line failure signal handed to a mutation directive
    pub fn failure_signal(&self) -> String {
        if self.signals.is_empty() {
            format!("fitness {:.4} ({:?})", self.fitness, self.verdict)
        } else {
            self.signals.join("; ")
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.verdict == FeedbackVerdict::Degraded
    }
}

/// Class of a gate or pipeline failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Parse,
    Complexity,
    Redundancy,
    Consistency,
    Evaluation,
    AttemptsExhausted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Parse => "parse",
            FailureKind::Complexity => "complexity",
            FailureKind::Redundancy => "redundancy",
            FailureKind::Consistency => "consistency",
            FailureKind::Evaluation => "evaluation",
            FailureKind::AttemptsExhausted => "attempts_exhausted",
        })
    }
}

/// Diagnostic emitted by the gate for the correction channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionDiagnostic {
    pub kind: FailureKind,
    /// Specific violations, e.g. "base_feature_count is 8, limit 6"
    pub details: Vec<String>,
    /// Attempt number of the candidate that failed
    pub attempt: u32,
}

impl fmt::Display for CorrectionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure (attempt {})", self.kind, self.attempt)?;
        for detail in &self.details {
            write!(f, "\n- {}", detail)?;
        }
        Ok(())
    }
}
