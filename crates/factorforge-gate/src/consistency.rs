//! Consistency Checker
//!
//! Asks the proposal oracle whether hypothesis, description, formula and
//! expression agree, and turns the raw answer into a [`ConsistencyVerdict`].
//! The verifier is expected to answer with a JSON object such as
//! `{"consistent": false, "explanation": "..."}`, possibly wrapped in prose
//! or a fenced code block.

use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use factorforge_common::{FactorSpec, ProposalOracle};

lazy_static::lazy_static! {
    static ref JSON_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

/// Parsed verifier answer
#[derive(Debug, Clone, PartialEq)]
pub enum ConsistencyVerdict {
    Consistent,
    Inconsistent { explanation: String },
    /// Oracle failed or produced something we could not read
    Unknown { reason: String },
}

/// Extract a verdict from raw verifier text
pub fn parse_verdict(raw: &str) -> ConsistencyVerdict {
    let Some(object) = JSON_OBJECT.find(raw) else {
        return ConsistencyVerdict::Unknown {
            reason: "no JSON object in verifier output".to_string(),
        };
    };
    let value: Value = match serde_json::from_str(object.as_str()) {
        Ok(value) => value,
        Err(err) => {
            return ConsistencyVerdict::Unknown {
                reason: format!("invalid verifier JSON: {}", err),
            }
        }
    };

    let flag = value
        .get("consistent")
        .or_else(|| value.get("is_consistent"))
        .and_then(Value::as_bool)
        .or_else(|| {
            value
                .get("verdict")
                .and_then(Value::as_str)
                .and_then(|v| match v.to_ascii_lowercase().as_str() {
                    "consistent" => Some(true),
                    "inconsistent" => Some(false),
                    _ => None,
                })
        });
    let explanation = value
        .get("explanation")
        .or_else(|| value.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match flag {
        Some(true) => ConsistencyVerdict::Consistent,
        Some(false) => ConsistencyVerdict::Inconsistent { explanation },
        None => ConsistencyVerdict::Unknown {
            reason: "verifier JSON has no verdict field".to_string(),
        },
    }
}

/// Oracle-backed consistency checker
pub struct ConsistencyChecker {
    oracle: Arc<dyn ProposalOracle>,
}

impl ConsistencyChecker {
    pub fn new(oracle: Arc<dyn ProposalOracle>) -> Self {
        Self { oracle }
    }

    /// Check that the four descriptions of `spec` agree. Never fails: oracle
    /// errors become [`ConsistencyVerdict::Unknown`] and the caller decides.
    #[instrument(skip(self, spec), fields(expression = %spec.expression))]
    pub async fn check(&self, spec: &FactorSpec) -> ConsistencyVerdict {
        let verdict = match self.oracle.verify(spec).await {
            Ok(raw) => parse_verdict(&raw),
            Err(err) => {
                warn!(error = %err, "Consistency oracle call failed");
                ConsistencyVerdict::Unknown {
                    reason: err.to_string(),
                }
            }
        };
        debug!(?verdict, "Consistency verdict");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorforge_common::{MockProposalOracle, OracleError};

    #[test]
    fn test_parse_plain_json() {
        assert_eq!(
            parse_verdict(r#"{"consistent": true}"#),
            ConsistencyVerdict::Consistent
        );
        assert_eq!(
            parse_verdict(r#"{"is_consistent": false, "reason": "formula uses volume"}"#),
            ConsistencyVerdict::Inconsistent {
                explanation: "formula uses volume".to_string()
            }
        );
    }

    #[test]
    fn test_parse_wrapped_json() {
        let raw = "Here is my assessment:\n```json\n{\"verdict\": \"Inconsistent\", \"explanation\": \"window differs\"}\n```";
        assert_eq!(
            parse_verdict(raw),
            ConsistencyVerdict::Inconsistent {
                explanation: "window differs".to_string()
            }
        );
    }

    #[test]
    fn test_parse_garbage_is_unknown() {
        assert!(matches!(
            parse_verdict("looks fine to me"),
            ConsistencyVerdict::Unknown { .. }
        ));
        assert!(matches!(
            parse_verdict("{not json}"),
            ConsistencyVerdict::Unknown { .. }
        ));
        assert!(matches!(
            parse_verdict(r#"{"score": 0.9}"#),
            ConsistencyVerdict::Unknown { .. }
        ));
    }

    #[tokio::test]
    async fn test_oracle_failure_is_unknown() {
        let mut oracle = MockProposalOracle::new();
        oracle
            .expect_verify()
            .returning(|_| Err(OracleError::Timeout { elapsed_ms: 1000 }));

        let checker = ConsistencyChecker::new(Arc::new(oracle));
        let verdict = checker.check(&FactorSpec::default()).await;
        assert!(matches!(verdict, ConsistencyVerdict::Unknown { .. }));
    }
}
