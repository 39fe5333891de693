//! Quality Gate / Regulator
//!
//! Composes parsing, complexity, redundancy and consistency checks into a
//! single admit / reject / retry decision:
//!
//! 1. attempt budget: a candidate past `max_correction_attempts` is rejected
//!    without evaluation
//! 2. parse (correctable only on attempt 0)
//! 3. exact duplicate of an admitted factor id (always rejects)
//! 4. complexity rules (correctable)
//! 5. redundancy against the library (always rejects)
//! 6. consistency via the oracle (correctable in strict mode)
//!
//! The first failing step decides. Expected rejections are values; only
//! infrastructure failures are returned as errors.
//!
//! Transient oracle failures inside the correction loop (a timed-out
//! correction request, an unknown strict verdict) are retried on the current
//! version, so the attempt counter only moves when the oracle actually
//! returns a corrected version.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use factorforge_common::{
    CandidateStatus, CorrectionDiagnostic, Directive, FactorCandidate, FailureKind, ForgeError,
    OracleError, ProposalContext, ProposalOracle, RejectionReason,
};
use factorforge_expr::{Analyzer, ComplexityReport, Expr, ExpressionParser, ReferenceSet};

use crate::config::{ConsistencyMode, GateConfig};
use crate::consistency::{ConsistencyChecker, ConsistencyVerdict};
use crate::retry::RetryPolicy;

/// Gate decision for one candidate version
#[derive(Debug, Clone)]
pub enum GateResult {
    Admit {
        ast: Arc<Expr>,
        report: ComplexityReport,
    },
    Reject(RejectionReason),
    Retry(CorrectionDiagnostic),
}

impl GateResult {
    pub fn is_admit(&self) -> bool {
        matches!(self, GateResult::Admit { .. })
    }
}

/// Final state of a candidate after the correction loop
#[derive(Debug, Clone)]
pub struct GateOutcome {
    /// Last version: `gated` when admitted by the gate, otherwise `rejected`
    pub candidate: FactorCandidate,
    /// Structural report of the last version, when it parsed
    pub report: Option<ComplexityReport>,
    /// Number of gate evaluations, including the final one
    pub evaluations: u32,
}

impl GateOutcome {
    pub fn passed(&self) -> bool {
        self.candidate.status() == CandidateStatus::Gated
    }
}

/// Quality gate
pub struct Regulator {
    config: GateConfig,
    parser: ExpressionParser,
    analyzer: Analyzer,
    oracle: Arc<dyn ProposalOracle>,
    consistency: ConsistencyChecker,
    retry: RetryPolicy,
}

impl Regulator {
    pub fn new(config: GateConfig, oracle: Arc<dyn ProposalOracle>) -> Self {
        Self {
            parser: config.parser(),
            analyzer: config.analyzer(),
            consistency: ConsistencyChecker::new(Arc::clone(&oracle)),
            oracle,
            config,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for oracle calls made inside the correction loop
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn parser(&self) -> &ExpressionParser {
        &self.parser
    }

    /// Evaluate one candidate version against `library`.
    ///
    /// # Errors
    ///
    /// Only when strict consistency is enabled and the verdict is unknown;
    /// the error is retryable and distinct from a rejection.
    #[instrument(skip(self, candidate, library), fields(candidate = %candidate.id, attempt = candidate.attempt()))]
    pub async fn gate(
        &self,
        candidate: &FactorCandidate,
        library: &ReferenceSet,
    ) -> Result<GateResult, ForgeError> {
        let attempt = candidate.attempt();
        if attempt > self.config.max_correction_attempts {
            return Ok(GateResult::Reject(RejectionReason::AttemptsExhausted {
                attempts: attempt,
            }));
        }

        let ast = match candidate.ast_or_parse(&self.parser) {
            Ok(ast) => ast,
            Err(err) => {
                debug!(error = %err, "Expression failed to parse");
                let reason = RejectionReason::from(&err);
                // a malformed expression only gets one rewrite
                return Ok(if attempt == 0 {
                    self.settle(attempt, reason)
                } else {
                    GateResult::Reject(reason)
                });
            }
        };

        if let Some(reason) = self.duplicate_of(&ast, library) {
            return Ok(GateResult::Reject(reason));
        }

        let mut report = self.analyzer.measure(&ast);
        if self.config.complexity_enabled && !report.passes_complexity() {
            return Ok(self.settle(
                attempt,
                RejectionReason::Complexity {
                    rules: report.violations(),
                    details: report.violation_details(),
                },
            ));
        }

        if self.config.redundancy_enabled {
            let (nearest, redundant) = self.analyzer.redundancy(&ast, library);
            report.nearest = nearest;
            if let Some(hit) = redundant {
                return Ok(GateResult::Reject(RejectionReason::from(hit)));
            }
        }

        if self.config.consistency_enabled {
            match self.consistency.check(&candidate.spec).await {
                ConsistencyVerdict::Consistent => {}
                ConsistencyVerdict::Inconsistent { explanation } => match self.config.consistency_mode {
                    ConsistencyMode::Lenient => {
                        warn!(%explanation, "Inconsistent factor passed in lenient mode");
                    }
                    ConsistencyMode::Strict => {
                        return Ok(self.settle(attempt, RejectionReason::Consistency { explanation }));
                    }
                },
                ConsistencyVerdict::Unknown { reason } => match self.config.consistency_mode {
                    ConsistencyMode::Lenient => {
                        warn!(%reason, "Consistency verdict unknown, passing in lenient mode");
                    }
                    ConsistencyMode::Strict => {
                        return Err(OracleError::VerdictUnknown(reason).into());
                    }
                },
            }
        }

        Ok(GateResult::Admit { ast, report })
    }

    /// Admission-time re-check against the current library: exact id
    /// duplicates always, structural redundancy when enabled. Used under the
    /// library's write lock so factors admitted earlier in the same round are
    /// respected.
    pub fn recheck_redundancy(&self, ast: &Expr, library: &ReferenceSet) -> Option<RejectionReason> {
        if let Some(reason) = self.duplicate_of(ast, library) {
            return Some(reason);
        }
        if !self.config.redundancy_enabled {
            return None;
        }
        self.analyzer
            .redundancy(ast, library)
            .1
            .map(RejectionReason::from)
    }

    fn duplicate_of(&self, ast: &Expr, library: &ReferenceSet) -> Option<RejectionReason> {
        let factor_id = factorforge_common::factor_id_for(&ast.canonical());
        library
            .contains(&factor_id)
            .then_some(RejectionReason::Redundancy {
                factor_id,
                similarity: 1.0,
            })
    }

    /// Retry a correctable failure while budget remains, else reject
    fn settle(&self, attempt: u32, reason: RejectionReason) -> GateResult {
        if attempt < self.config.max_correction_attempts {
            GateResult::Retry(CorrectionDiagnostic {
                kind: reason.kind(),
                details: reason.details(),
                attempt,
            })
        } else {
            GateResult::Reject(reason)
        }
    }

    /// Gate `candidate`, asking the oracle for corrected versions until the
    /// gate admits or rejects. Superseded versions are dropped.
    ///
    /// # Arguments
    ///
    /// * `candidate` - First version to evaluate
    /// * `library` - Snapshot of admitted factors
    /// * `context` - Proposal context reused for correction requests
    ///
    /// # Returns
    ///
    /// The settled last version; oracle failures propagate.
    pub async fn gate_with_corrections(
        &self,
        mut candidate: FactorCandidate,
        library: &ReferenceSet,
        context: &ProposalContext,
    ) -> Result<GateOutcome, ForgeError> {
        let mut evaluations = 0;
        loop {
            evaluations += 1;
            let current = &candidate;
            let result = self
                .retry
                .run("gate", move || self.gate(current, library))
                .await?;
            match result {
                GateResult::Admit { ast, report } => {
                    candidate.attach_ast(ast)?;
                    candidate.advance(CandidateStatus::Gated)?;
                    debug!(candidate = %candidate.id, evaluations, "Candidate passed gate");
                    return Ok(GateOutcome {
                        candidate,
                        report: Some(report),
                        evaluations,
                    });
                }
                GateResult::Reject(reason) => {
                    info!(
                        candidate = %candidate.id,
                        trajectory = %candidate.trajectory_id,
                        attempt = candidate.attempt(),
                        kind = %reason.kind(),
                        violations = ?reason.details(),
                        "Candidate rejected"
                    );
                    let report = match reason.kind() {
                        FailureKind::Parse | FailureKind::AttemptsExhausted => None,
                        _ => candidate
                            .ast_or_parse(&self.parser)
                            .ok()
                            .map(|ast| self.analyzer.measure(&ast)),
                    };
                    candidate.reject(reason)?;
                    return Ok(GateOutcome {
                        candidate,
                        report,
                        evaluations,
                    });
                }
                GateResult::Retry(diagnostic) => {
                    debug!(
                        candidate = %candidate.id,
                        attempt = diagnostic.attempt,
                        kind = %diagnostic.kind,
                        "Requesting correction"
                    );
                    let request = ProposalContext {
                        directive: Directive::Correct {
                            previous: candidate.spec.clone(),
                            diagnostic,
                        },
                        ..context.clone()
                    };
                    let oracle = &*self.oracle;
                    let request = &request;
                    let spec = self
                        .retry
                        .run("correct", move || async move {
                            oracle.propose(request).await.map_err(ForgeError::from)
                        })
                        .await?;
                    candidate = candidate.correction(spec);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorforge_common::{FactorSpec, Lineage, MockProposalOracle};
    use factorforge_expr::{parse, ComplexityRule};
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    const WIDE: &str = "$open + $high + $low + $close + $volume + $vwap + $amount + $return";

    fn spec(expression: &str) -> FactorSpec {
        FactorSpec {
            name: "test".into(),
            hypothesis: "Price spread mean-reverts".into(),
            description: "Close minus open, scaled by open".into(),
            formula: "(close - open) / open".into(),
            expression: expression.into(),
        }
    }

    fn candidate(expression: &str) -> FactorCandidate {
        FactorCandidate::new(Uuid::now_v7(), 0, spec(expression), Lineage::Original)
    }

    fn context() -> ProposalContext {
        ProposalContext {
            trajectory_id: Uuid::now_v7(),
            direction: "intraday reversal".into(),
            round: 0,
            directive: Directive::Explore,
            prior_expressions: Vec::new(),
        }
    }

    fn regulator(config: GateConfig, oracle: MockProposalOracle) -> Regulator {
        Regulator::new(config, Arc::new(oracle))
    }

    #[tokio::test]
    async fn test_price_spread_is_admitted() {
        let gate = regulator(GateConfig::default(), MockProposalOracle::new());
        let result = gate
            .gate(&candidate("($close-$open)/$open"), &ReferenceSet::new())
            .await
            .unwrap();
        match result {
            GateResult::Admit { report, .. } => {
                assert_eq!(report.symbol_length, 4);
                assert_eq!(report.base_feature_count(), 2);
                assert_eq!(report.free_parameters, 0);
            }
            other => panic!("expected admit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eight_features_is_complexity_violation() {
        let gate = regulator(
            GateConfig {
                max_correction_attempts: 0,
                ..GateConfig::default()
            },
            MockProposalOracle::new(),
        );
        let result = gate.gate(&candidate(WIDE), &ReferenceSet::new()).await.unwrap();
        match result {
            GateResult::Reject(RejectionReason::Complexity { rules, .. }) => {
                assert_eq!(rules, vec![ComplexityRule::BaseFeatureCount]);
            }
            other => panic!("expected complexity rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complexity_rejected_on_fourth_evaluation() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let mut oracle = MockProposalOracle::new();
        oracle.expect_propose().returning(move |ctx| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert!(matches!(ctx.directive, Directive::Correct { .. }));
            Ok(spec(WIDE))
        });

        let gate = regulator(GateConfig::default(), oracle);
        let outcome = gate
            .gate_with_corrections(candidate(WIDE), &ReferenceSet::new(), &context())
            .await
            .unwrap();

        assert_eq!(outcome.evaluations, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.candidate.attempt(), 3);
        assert_eq!(outcome.candidate.status(), CandidateStatus::Rejected);
        assert!(matches!(
            outcome.candidate.rejection(),
            Some(RejectionReason::Complexity { .. })
        ));
    }

    #[tokio::test]
    async fn test_correction_can_succeed() {
        let mut oracle = MockProposalOracle::new();
        oracle
            .expect_propose()
            .times(1)
            .returning(|_| Ok(spec("($close-$open)/$open")));

        let gate = regulator(GateConfig::default(), oracle);
        let outcome = gate
            .gate_with_corrections(candidate(WIDE), &ReferenceSet::new(), &context())
            .await
            .unwrap();
        assert!(outcome.passed());
        assert_eq!(outcome.candidate.attempt(), 1);
        assert!(outcome.candidate.ast().is_some());
    }

    #[tokio::test]
    async fn test_attempt_past_budget_is_rejected_unevaluated() {
        let gate = regulator(GateConfig::default(), MockProposalOracle::new());
        let mut late = candidate("($close-$open)/$open");
        for _ in 0..4 {
            late = late.correction(spec("($close-$open)/$open"));
        }
        let result = gate.gate(&late, &ReferenceSet::new()).await.unwrap();
        assert!(matches!(
            result,
            GateResult::Reject(RejectionReason::AttemptsExhausted { attempts: 4 })
        ));
    }

    #[tokio::test]
    async fn test_redundancy_always_rejects() {
        let mut library = ReferenceSet::new();
        library.insert("factor_momentum", &parse("TS_MEAN($close, 5) / DELAY($close, 10)").unwrap());

        let gate = regulator(GateConfig::default(), MockProposalOracle::new());
        let result = gate
            .gate(&candidate("TS_MEAN($close, 20) / DELAY($close, 60)"), &library)
            .await
            .unwrap();
        match result {
            GateResult::Reject(RejectionReason::Redundancy {
                factor_id,
                similarity,
            }) => {
                assert_eq!(factor_id, "factor_momentum");
                assert_eq!(similarity, 1.0);
            }
            other => panic!("expected redundancy rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exact_duplicate_id_rejected_even_without_redundancy_check() {
        let ast = parse("RANK($close - $open)").unwrap();
        let mut library = ReferenceSet::new();
        library.insert(factorforge_common::factor_id_for(&ast.canonical()), &ast);

        let gate = regulator(
            GateConfig {
                redundancy_enabled: false,
                ..GateConfig::default()
            },
            MockProposalOracle::new(),
        );
        let result = gate
            .gate(&candidate("RANK( $close-$open )"), &library)
            .await
            .unwrap();
        assert!(matches!(
            result,
            GateResult::Reject(RejectionReason::Redundancy { .. })
        ));
    }

    #[tokio::test]
    async fn test_parse_error_retried_only_on_first_attempt() {
        let gate = regulator(GateConfig::default(), MockProposalOracle::new());
        let first = candidate("MACD($close, 12, 26)");
        let result = gate.gate(&first, &ReferenceSet::new()).await.unwrap();
        match result {
            GateResult::Retry(diagnostic) => assert_eq!(diagnostic.kind, FailureKind::Parse),
            other => panic!("expected retry, got {:?}", other),
        }

        let second = first.correction(spec("MACD($close, 12, 26)"));
        let result = gate.gate(&second, &ReferenceSet::new()).await.unwrap();
        assert!(matches!(
            result,
            GateResult::Reject(RejectionReason::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_strict_inconsistent_is_correctable() {
        let mut oracle = MockProposalOracle::new();
        oracle
            .expect_verify()
            .returning(|_| Ok(r#"{"consistent": false, "explanation": "formula ignores open"}"#.into()));

        let gate = regulator(
            GateConfig {
                consistency_enabled: true,
                consistency_mode: ConsistencyMode::Strict,
                ..GateConfig::default()
            },
            oracle,
        );
        let result = gate
            .gate(&candidate("($close-$open)/$open"), &ReferenceSet::new())
            .await
            .unwrap();
        match result {
            GateResult::Retry(diagnostic) => {
                assert_eq!(diagnostic.kind, FailureKind::Consistency);
                assert_eq!(diagnostic.details, vec!["formula ignores open".to_string()]);
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lenient_inconsistent_passes() {
        let mut oracle = MockProposalOracle::new();
        oracle
            .expect_verify()
            .returning(|_| Ok(r#"{"consistent": false, "explanation": "mismatch"}"#.into()));

        let gate = regulator(
            GateConfig {
                consistency_enabled: true,
                ..GateConfig::default()
            },
            oracle,
        );
        let result = gate
            .gate(&candidate("($close-$open)/$open"), &ReferenceSet::new())
            .await
            .unwrap();
        assert!(result.is_admit());
    }

    #[tokio::test]
    async fn test_unknown_verdict_by_mode() {
        let make_oracle = || {
            let mut oracle = MockProposalOracle::new();
            oracle
                .expect_verify()
                .returning(|_| Err(OracleError::Unavailable("verifier down".into())));
            oracle
        };

        let lenient = regulator(
            GateConfig {
                consistency_enabled: true,
                ..GateConfig::default()
            },
            make_oracle(),
        );
        assert!(lenient
            .gate(&candidate("($close-$open)/$open"), &ReferenceSet::new())
            .await
            .unwrap()
            .is_admit());

        let strict = regulator(
            GateConfig {
                consistency_enabled: true,
                consistency_mode: ConsistencyMode::Strict,
                ..GateConfig::default()
            },
            make_oracle(),
        );
        let err = strict
            .gate(&candidate("($close-$open)/$open"), &ReferenceSet::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForgeError::Oracle(OracleError::VerdictUnknown(_))
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_disabled_checks_are_skipped() {
        let gate = regulator(
            GateConfig {
                complexity_enabled: false,
                ..GateConfig::default()
            },
            MockProposalOracle::new(),
        );
        assert!(gate
            .gate(&candidate(WIDE), &ReferenceSet::new())
            .await
            .unwrap()
            .is_admit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oracle_failure_during_correction_propagates() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let mut oracle = MockProposalOracle::new();
        oracle.expect_propose().returning(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(OracleError::Timeout { elapsed_ms: 600_000 })
        });

        let gate = regulator(GateConfig::default(), oracle).with_retry_policy(RetryPolicy::linear(2));
        let err = gate
            .gate_with_corrections(candidate(WIDE), &ReferenceSet::new(), &context())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correction_timeout_keeps_attempt_counter() {
        let calls = Arc::new(AtomicU32::new(0));
        let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let log = Arc::clone(&attempts);
        let mut oracle = MockProposalOracle::new();
        oracle.expect_propose().returning(move |ctx| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            if let Directive::Correct { diagnostic, .. } = &ctx.directive {
                log.lock().unwrap().push(diagnostic.attempt);
            }
            // the third correction request times out once
            if n == 2 {
                Err(OracleError::Timeout { elapsed_ms: 600_000 })
            } else {
                Ok(spec(WIDE))
            }
        });

        let gate = regulator(GateConfig::default(), oracle);
        let outcome = gate
            .gate_with_corrections(candidate(WIDE), &ReferenceSet::new(), &context())
            .await
            .unwrap();

        assert_eq!(*attempts.lock().unwrap(), vec![0, 1, 2, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.evaluations, 4);
        assert_eq!(outcome.candidate.attempt(), 3);
        assert!(matches!(
            outcome.candidate.rejection(),
            Some(RejectionReason::Complexity { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_strict_verdict_retried_on_same_version() {
        let verifications = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&verifications);
        let mut oracle = MockProposalOracle::new();
        oracle.expect_propose().never();
        oracle.expect_verify().returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(OracleError::Unavailable("verifier down".into()))
            } else {
                Ok(r#"{"consistent": true}"#.into())
            }
        });

        let gate = regulator(
            GateConfig {
                consistency_enabled: true,
                consistency_mode: ConsistencyMode::Strict,
                ..GateConfig::default()
            },
            oracle,
        );
        let outcome = gate
            .gate_with_corrections(candidate("($close-$open)/$open"), &ReferenceSet::new(), &context())
            .await
            .unwrap();
        assert!(outcome.passed());
        assert_eq!(outcome.candidate.attempt(), 0);
        assert_eq!(outcome.evaluations, 1);
        assert_eq!(verifications.load(Ordering::SeqCst), 2);
    }
}
