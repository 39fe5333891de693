//! Oracle contracts
//!
//! The LLM proposal agent and the backtest engine are external
//! collaborators. Every call is a potentially long suspension point; nothing
//! else in the core awaits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EvaluationError, OracleError};
use crate::types::candidate::FactorSpec;
use crate::types::feedback::{CorrectionDiagnostic, FeedbackSummary};
use crate::types::metrics::{BacktestMetrics, BacktestPeriod};

/// A parent factor handed to the oracle in full
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentFactor {
    pub candidate_id: Uuid,
    pub trajectory_id: Uuid,
    pub spec: FactorSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BacktestMetrics>,
}

/// What the oracle is asked to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum Directive {
    /// Fresh factor for the direction
    Explore,
    /// Localized correction of a parent, targeting its failure signal
    Mutate {
        parent: ParentFactor,
        failure_signal: String,
        feedback: Option<FeedbackSummary>,
    },
    /// Fuse two parents from distinct trajectories
    Crossover { parents: [ParentFactor; 2] },
    /// Rewrite a candidate the quality gate sent back
    Correct {
        previous: FactorSpec,
        diagnostic: CorrectionDiagnostic,
    },
}

/// Input to [`ProposalOracle::propose`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalContext {
    pub trajectory_id: Uuid,
    pub direction: String,
    pub round: u32,
    pub directive: Directive,
    /// Expressions already admitted on this trajectory, oldest first
    #[serde(default)]
    pub prior_expressions: Vec<String>,
}

/// LLM-backed proposal agent
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait ProposalOracle: Send + Sync {
    /// Produce a factor for the given context
    async fn propose(&self, context: &ProposalContext) -> Result<FactorSpec, OracleError>;

    /// Raw verifier output for a consistency check of `spec`
    async fn verify(&self, spec: &FactorSpec) -> Result<String, OracleError>;

    /// Up to `count` distinct research directions derived from `initial`
    async fn plan_directions(
        &self,
        initial: &str,
        count: usize,
    ) -> Result<Vec<String>, OracleError>;
}

/// Market-data backtest engine. Deterministic for a given expression,
/// period and dataset.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait BacktestOracle: Send + Sync {
    async fn evaluate(
        &self,
        expression: &str,
        period: &BacktestPeriod,
    ) -> Result<BacktestMetrics, EvaluationError>;
}
