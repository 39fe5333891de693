//! Persisted factor library document
//!
//! The library file is a single JSON document:
//!
//! ```json
//! {
//!   "metadata": { "total_factors": 2, "last_updated": "...", "version": "1.0" },
//!   "factors": [ { "factor_id": "factor_1a2b3c4d5e6f", ... }, ... ]
//! }
//! ```
//!
//! `factors` keeps insertion order for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::candidate::{CandidateStatus, EvolutionPhase, FactorCandidate};
use super::feedback::FeedbackSummary;
use super::metrics::{BacktestMetrics, QualityTier};
use crate::error::LibraryError;

/// Library document format version
pub const LIBRARY_FORMAT_VERSION: &str = "1.0";

/// Where an admitted factor came from: the run that mined it and the
/// research direction of its trajectory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub experiment_id: Uuid,
    pub direction: String,
}

impl Provenance {
    pub fn new(experiment_id: Uuid, direction: impl Into<String>) -> Self {
        Self {
            experiment_id,
            direction: direction.into(),
        }
    }
}

/// One admitted factor as stored in the library file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorRecord {
    pub factor_id: String,
    pub candidate_id: Uuid,
    pub factor_name: String,
    pub hypothesis: String,
    pub description: String,
    pub formula: String,
    pub expression: String,
    /// Canonical form of the parsed expression
    pub canonical_expression: String,
    pub round_number: u32,
    pub trajectory_id: Uuid,
    /// Research direction of the trajectory
    #[serde(default)]
    pub direction: String,
    /// Mining run that admitted the factor
    #[serde(default)]
    pub experiment_id: Uuid,
    pub evolution_phase: EvolutionPhase,
    /// Parent candidate ids; empty for original factors
    pub parent_ids: Vec<Uuid>,
    pub attempt: u32,
    pub backtest_metrics: BacktestMetrics,
    pub quality: QualityTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackSummary>,
    pub created_at: DateTime<Utc>,
}

impl FactorRecord {
    /// Build the persisted form of an admitted candidate
    pub fn from_candidate(
        candidate: &FactorCandidate,
        provenance: &Provenance,
    ) -> Result<Self, LibraryError> {
        if candidate.status() != CandidateStatus::Admitted {
            return Err(LibraryError::NotAdmissible {
                candidate: candidate.id,
                status: candidate.status(),
            });
        }
        let metrics = candidate.metrics().cloned().unwrap_or_default();
        let canonical_expression = candidate
            .ast()
            .map(|ast| ast.canonical())
            .unwrap_or_else(|| candidate.spec.expression.clone());

        Ok(Self {
            factor_id: candidate.factor_id(),
            candidate_id: candidate.id,
            factor_name: candidate.spec.name.clone(),
            hypothesis: candidate.spec.hypothesis.clone(),
            description: candidate.spec.description.clone(),
            formula: candidate.spec.formula.clone(),
            expression: candidate.spec.expression.clone(),
            canonical_expression,
            round_number: candidate.round,
            trajectory_id: candidate.trajectory_id,
            direction: provenance.direction.clone(),
            experiment_id: provenance.experiment_id,
            evolution_phase: candidate.phase(),
            parent_ids: candidate.lineage.parent_ids(),
            attempt: candidate.attempt(),
            quality: metrics.quality(),
            backtest_metrics: metrics,
            feedback: candidate.feedback().cloned(),
            created_at: Utc::now(),
        })
    }
}

/// Library file header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryMetadata {
    pub total_factors: usize,
    pub last_updated: DateTime<Utc>,
    pub version: String,
}

impl Default for LibraryMetadata {
    fn default() -> Self {
        Self {
            total_factors: 0,
            last_updated: Utc::now(),
            version: LIBRARY_FORMAT_VERSION.to_string(),
        }
    }
}

/// Whole library file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryDocument {
    pub metadata: LibraryMetadata,
    pub factors: Vec<FactorRecord>,
}

impl LibraryDocument {
    pub fn new(factors: Vec<FactorRecord>) -> Self {
        Self {
            metadata: LibraryMetadata {
                total_factors: factors.len(),
                ..LibraryMetadata::default()
            },
            factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::candidate::{FactorSpec, Lineage};
    use factorforge_expr::parse;
    use std::sync::Arc;

    fn admitted() -> FactorCandidate {
        let mut candidate = FactorCandidate::new(
            Uuid::now_v7(),
            1,
            FactorSpec {
                name: "spread".into(),
                hypothesis: "h".into(),
                description: "d".into(),
                formula: "f".into(),
                expression: "($close-$open)/$open".into(),
            },
            Lineage::Mutation {
                parent: Uuid::now_v7(),
            },
        );
        candidate
            .attach_ast(Arc::new(parse("($close-$open)/$open").unwrap()))
            .unwrap();
        candidate.advance(CandidateStatus::Gated).unwrap();
        candidate
            .set_metrics(BacktestMetrics {
                information_ratio: Some(0.8),
                ..Default::default()
            })
            .unwrap();
        candidate.admit().unwrap();
        candidate
    }

    #[test]
    fn test_record_from_admitted_candidate() {
        let candidate = admitted();
        let provenance = Provenance::new(Uuid::now_v7(), "momentum");
        let record = FactorRecord::from_candidate(&candidate, &provenance).unwrap();
        assert_eq!(record.direction, "momentum");
        assert_eq!(record.experiment_id, provenance.experiment_id);
        assert_eq!(record.factor_id, candidate.factor_id());
        assert_eq!(record.evolution_phase, EvolutionPhase::Mutation);
        assert_eq!(record.parent_ids.len(), 1);
        assert_eq!(record.quality, QualityTier::High);
        assert_eq!(record.canonical_expression, "(($close - $open) / $open)");
    }

    #[test]
    fn test_record_requires_admission() {
        let candidate = FactorCandidate::new(
            Uuid::now_v7(),
            0,
            FactorSpec::default(),
            Lineage::Original,
        );
        assert!(matches!(
            FactorRecord::from_candidate(&candidate, &Provenance::default()),
            Err(LibraryError::NotAdmissible { .. })
        ));
    }

    #[test]
    fn test_document_shape() {
        let provenance = Provenance::new(Uuid::now_v7(), "reversal");
        let record = FactorRecord::from_candidate(&admitted(), &provenance).unwrap();
        let doc = LibraryDocument::new(vec![record]);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["factors"][0]["direction"], "reversal");
        assert_eq!(json["metadata"]["total_factors"], 1);
        assert_eq!(json["metadata"]["version"], LIBRARY_FORMAT_VERSION);
        assert_eq!(json["factors"][0]["evolution_phase"], "mutation");
        assert_eq!(json["factors"][0]["backtest_metrics"]["IR"], 0.8);
        assert_eq!(json["factors"][0]["quality"], "high");
    }

    #[test]
    fn test_records_without_provenance_still_load() {
        let record = FactorRecord::from_candidate(&admitted(), &Provenance::default()).unwrap();
        let mut json = serde_json::to_value(&record).unwrap();
        let fields = json.as_object_mut().unwrap();
        fields.remove("direction");
        fields.remove("experiment_id");

        let loaded: FactorRecord = serde_json::from_value(json).unwrap();
        assert_eq!(loaded.direction, "");
        assert!(loaded.experiment_id.is_nil());
        assert_eq!(loaded.candidate_id, record.candidate_id);
    }
}
