//! FactorCandidate - one proposed factor and its lifecycle
//!
//! Status moves strictly forward:
//! `proposed -> parsed -> gated -> admitted`, with `rejected` reachable from
//! any non-terminal state. Once admitted or rejected a candidate is frozen.
//! A correction never edits a candidate; it produces a new version with the
//! attempt counter incremented.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use factorforge_expr::{ComplexityRule, Expr, ExpressionParser, ParseError, RedundancyMatch};

use super::feedback::{FailureKind, FeedbackSummary};
use super::metrics::BacktestMetrics;
use crate::error::TransitionError;

/// Prefix of every stable factor id
pub const FACTOR_ID_PREFIX: &str = "factor_";

/// Hex characters of the expression hash kept in a factor id
pub const FACTOR_ID_HASH_LEN: usize = 12;

/// Stable factor id for an expression text.
///
/// Whitespace is removed before hashing so formatting differences do not
/// produce distinct ids.
pub fn factor_id_for(expression: &str) -> String {
    let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
    let hash = blake3::hash(compact.as_bytes()).to_hex();
    format!("{}{}", FACTOR_ID_PREFIX, &hash.as_str()[..FACTOR_ID_HASH_LEN])
}

/// Oracle-facing description of a factor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorSpec {
    #[serde(default)]
    pub name: String,
    pub hypothesis: String,
    pub description: String,
    pub formula: String,
    pub expression: String,
}

/// Candidate lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Proposed,
    Parsed,
    Gated,
    Admitted,
    Rejected,
}

impl CandidateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CandidateStatus::Admitted | CandidateStatus::Rejected)
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CandidateStatus::Proposed => "proposed",
            CandidateStatus::Parsed => "parsed",
            CandidateStatus::Gated => "gated",
            CandidateStatus::Admitted => "admitted",
            CandidateStatus::Rejected => "rejected",
        })
    }
}

/// Evolution phase that produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionPhase {
    Original,
    Mutation,
    Crossover,
}

impl fmt::Display for EvolutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvolutionPhase::Original => "original",
            EvolutionPhase::Mutation => "mutation",
            EvolutionPhase::Crossover => "crossover",
        })
    }
}

/// Parent candidate ids: none, one (mutation) or two (crossover)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Lineage {
    Original,
    Mutation { parent: Uuid },
    Crossover { parents: [Uuid; 2] },
}

impl Lineage {
    pub fn phase(&self) -> EvolutionPhase {
        match self {
            Lineage::Original => EvolutionPhase::Original,
            Lineage::Mutation { .. } => EvolutionPhase::Mutation,
            Lineage::Crossover { .. } => EvolutionPhase::Crossover,
        }
    }

    pub fn parent_ids(&self) -> Vec<Uuid> {
        match self {
            Lineage::Original => Vec::new(),
            Lineage::Mutation { parent } => vec![*parent],
            Lineage::Crossover { parents } => parents.to_vec(),
        }
    }
}

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    Parse {
        message: String,
    },
    Complexity {
        rules: Vec<ComplexityRule>,
        details: Vec<String>,
    },
    Redundancy {
        factor_id: String,
        similarity: f64,
    },
    Consistency {
        explanation: String,
    },
    /// Submitted with an attempt counter beyond the correction budget
    AttemptsExhausted {
        attempts: u32,
    },
    /// Backtest oracle failure; not a quality defect
    Evaluation {
        message: String,
    },
}

impl RejectionReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            RejectionReason::Parse { .. } => FailureKind::Parse,
            RejectionReason::Complexity { .. } => FailureKind::Complexity,
            RejectionReason::Redundancy { .. } => FailureKind::Redundancy,
            RejectionReason::Consistency { .. } => FailureKind::Consistency,
            RejectionReason::AttemptsExhausted { .. } => FailureKind::AttemptsExhausted,
            RejectionReason::Evaluation { .. } => FailureKind::Evaluation,
        }
    }

    /// One entry per violated rule, for logs and correction prompts
    pub fn details(&self) -> Vec<String> {
        match self {
            RejectionReason::Parse { message } => vec![message.clone()],
            RejectionReason::Complexity { details, .. } => details.clone(),
            RejectionReason::Redundancy {
                factor_id,
                similarity,
            } => vec![format!(
                "similarity {:.3} with existing factor {}",
                similarity, factor_id
            )],
            RejectionReason::Consistency { explanation } => vec![explanation.clone()],
            RejectionReason::AttemptsExhausted { attempts } => {
                vec![format!("{} correction attempts used", attempts)]
            }
            RejectionReason::Evaluation { message } => vec![message.clone()],
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.details().join("; "))
    }
}

impl From<RedundancyMatch> for RejectionReason {
    fn from(hit: RedundancyMatch) -> Self {
        RejectionReason::Redundancy {
            factor_id: hit.factor_id,
            similarity: hit.similarity,
        }
    }
}

impl From<&ParseError> for RejectionReason {
    fn from(err: &ParseError) -> Self {
        RejectionReason::Parse {
            message: err.to_string(),
        }
    }
}

/// A proposed factor moving through the gate and the backtest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorCandidate {
    pub id: Uuid,
    pub trajectory_id: Uuid,
    pub round: u32,
    #[serde(flatten)]
    pub spec: FactorSpec,
    pub lineage: Lineage,
    attempt: u32,
    status: CandidateStatus,
    rejection: Option<RejectionReason>,
    metrics: Option<BacktestMetrics>,
    feedback: Option<FeedbackSummary>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    ast: Option<Arc<Expr>>,
}

impl FactorCandidate {
    /// Fresh candidate at attempt 0
    pub fn new(trajectory_id: Uuid, round: u32, spec: FactorSpec, lineage: Lineage) -> Self {
        Self {
            id: Uuid::now_v7(),
            trajectory_id,
            round,
            spec,
            lineage,
            attempt: 0,
            status: CandidateStatus::Proposed,
            rejection: None,
            metrics: None,
            feedback: None,
            created_at: Utc::now(),
            ast: None,
        }
    }

    /// Next version after a correction. The new version starts over at
    /// `proposed`; `self` is left untouched.
    pub fn correction(&self, spec: FactorSpec) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..Self::new(self.trajectory_id, self.round, spec, self.lineage)
        }
    }

    pub fn status(&self) -> CandidateStatus {
        self.status
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn phase(&self) -> EvolutionPhase {
        self.lineage.phase()
    }

    pub fn rejection(&self) -> Option<&RejectionReason> {
        self.rejection.as_ref()
    }

    pub fn metrics(&self) -> Option<&BacktestMetrics> {
        self.metrics.as_ref()
    }

    pub fn feedback(&self) -> Option<&FeedbackSummary> {
        self.feedback.as_ref()
    }

    pub fn ast(&self) -> Option<&Arc<Expr>> {
        self.ast.as_ref()
    }

    /// Cached AST, or a freshly parsed one (e.g. after deserializing)
    pub fn ast_or_parse(&self, parser: &ExpressionParser) -> Result<Arc<Expr>, ParseError> {
        match &self.ast {
            Some(ast) => Ok(Arc::clone(ast)),
            None => parser.parse(&self.spec.expression).map(Arc::new),
        }
    }

    /// Stable library id, from the canonical form once parsed
    pub fn factor_id(&self) -> String {
        match &self.ast {
            Some(ast) => factor_id_for(&ast.canonical()),
            None => factor_id_for(&self.spec.expression),
        }
    }

    /// Cache the parsed tree; moves a `proposed` candidate to `parsed`
    pub fn attach_ast(&mut self, ast: Arc<Expr>) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.ast = Some(ast);
        if self.status == CandidateStatus::Proposed {
            self.status = CandidateStatus::Parsed;
        }
        Ok(())
    }

    /// Move forward to `parsed` or `gated`
    pub fn advance(&mut self, to: CandidateStatus) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        if to.is_terminal() {
            return Err(TransitionError::Invalid {
                from: self.status,
                to,
            });
        }
        if to <= self.status {
            return Err(TransitionError::Backward {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Final admission; only a gated candidate can be admitted
    pub fn admit(&mut self) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        if self.status != CandidateStatus::Gated {
            return Err(TransitionError::Invalid {
                from: self.status,
                to: CandidateStatus::Admitted,
            });
        }
        self.status = CandidateStatus::Admitted;
        Ok(())
    }

    pub fn reject(&mut self, reason: RejectionReason) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.status = CandidateStatus::Rejected;
        self.rejection = Some(reason);
        Ok(())
    }

    pub fn set_metrics(&mut self, metrics: BacktestMetrics) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.metrics = Some(metrics);
        Ok(())
    }

    pub fn set_feedback(&mut self, feedback: FeedbackSummary) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.feedback = Some(feedback);
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Finalized(self.status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorforge_expr::parse;

    fn spec(expression: &str) -> FactorSpec {
        FactorSpec {
            name: "spread".to_string(),
            hypothesis: "Intraday strength persists".to_string(),
            description: "Close relative to open".to_string(),
            formula: "(close - open) / open".to_string(),
            expression: expression.to_string(),
        }
    }

    #[test]
    fn test_factor_id_ignores_whitespace() {
        let a = factor_id_for("($close - $open) / $open");
        let b = factor_id_for("($close-$open)/$open");
        assert_eq!(a, b);
        assert!(a.starts_with(FACTOR_ID_PREFIX));
        assert_eq!(a.len(), FACTOR_ID_PREFIX.len() + FACTOR_ID_HASH_LEN);
    }

    #[test]
    fn test_forward_transitions() {
        let mut candidate =
            FactorCandidate::new(Uuid::now_v7(), 0, spec("($close-$open)/$open"), Lineage::Original);
        assert_eq!(candidate.status(), CandidateStatus::Proposed);

        let ast = Arc::new(parse(&candidate.spec.expression).unwrap());
        candidate.attach_ast(ast).unwrap();
        assert_eq!(candidate.status(), CandidateStatus::Parsed);

        assert!(matches!(
            candidate.admit(),
            Err(TransitionError::Invalid { .. })
        ));
        candidate.advance(CandidateStatus::Gated).unwrap();
        assert!(matches!(
            candidate.advance(CandidateStatus::Parsed),
            Err(TransitionError::Backward { .. })
        ));
        candidate.admit().unwrap();

        assert_eq!(
            candidate.reject(RejectionReason::Consistency {
                explanation: "late".into()
            }),
            Err(TransitionError::Finalized(CandidateStatus::Admitted))
        );
        assert!(candidate.set_metrics(BacktestMetrics::default()).is_err());
    }

    #[test]
    fn test_correction_is_new_version() {
        let original = FactorCandidate::new(
            Uuid::now_v7(),
            2,
            spec("$open + $high + $low + $close + $volume + $vwap + $amount"),
            Lineage::Mutation {
                parent: Uuid::now_v7(),
            },
        );
        let corrected = original.correction(spec("($close-$open)/$open"));

        assert_ne!(corrected.id, original.id);
        assert_eq!(corrected.attempt(), 1);
        assert_eq!(corrected.round, 2);
        assert_eq!(corrected.lineage, original.lineage);
        assert_eq!(corrected.status(), CandidateStatus::Proposed);
        assert_eq!(original.attempt(), 0);
        assert_eq!(corrected.correction(spec("$close")).attempt(), 2);
    }

    #[test]
    fn test_ast_rebuilt_after_deserialize() {
        let mut candidate =
            FactorCandidate::new(Uuid::now_v7(), 0, spec("RANK($close)"), Lineage::Original);
        candidate
            .attach_ast(Arc::new(parse("RANK($close)").unwrap()))
            .unwrap();

        let json = serde_json::to_string(&candidate).unwrap();
        let restored: FactorCandidate = serde_json::from_str(&json).unwrap();
        assert!(restored.ast().is_none());
        assert_eq!(restored.status(), CandidateStatus::Parsed);

        let ast = restored.ast_or_parse(&ExpressionParser::default()).unwrap();
        assert_eq!(ast.canonical(), "RANK($close)");
    }

    #[test]
    fn test_lineage() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let crossover = Lineage::Crossover { parents: [a, b] };
        assert_eq!(crossover.phase(), EvolutionPhase::Crossover);
        assert_eq!(crossover.parent_ids(), vec![a, b]);
        assert!(Lineage::Original.parent_ids().is_empty());
    }

    #[test]
    fn test_rejection_display() {
        let reason = RejectionReason::Redundancy {
            factor_id: "factor_abc".to_string(),
            similarity: 1.0,
        };
        assert_eq!(reason.kind(), FailureKind::Redundancy);
        assert!(reason.to_string().contains("factor_abc"));
    }
}
