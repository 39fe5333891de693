//! Fitness calculation: η = max(RankIC, 0) × sqrt(max(RankICIR, 0))
//!
//! Absent or non-finite components count as zero, so a factor with a
//! negative or undefined Rank IC has fitness 0 rather than a NaN that would
//! poison parent selection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use factorforge_common::{BacktestMetrics, ForgeError, MetricKind};

/// How backtest metrics combine into one score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum FitnessModel {
    /// Rank IC weighted by the square root of its stability
    RankIcStability,
    /// Weighted sum of metrics keyed by short name ("RankIC", "IR", ...),
    /// each clamped to zero first
    Linear { weights: BTreeMap<String, f64> },
}

impl Default for FitnessModel {
    fn default() -> Self {
        FitnessModel::RankIcStability
    }
}

pub struct FitnessCalculator {
    model: FitnessModel,
    weights: Vec<(MetricKind, f64)>,
}

impl Default for FitnessCalculator {
    fn default() -> Self {
        Self {
            model: FitnessModel::RankIcStability,
            weights: Vec::new(),
        }
    }
}

impl FitnessCalculator {
    /// Build a calculator, resolving linear weight names
    pub fn new(model: FitnessModel) -> Result<Self, ForgeError> {
        let weights = match &model {
            FitnessModel::RankIcStability => Vec::new(),
            FitnessModel::Linear { weights } => weights
                .iter()
                .map(|(name, weight)| {
                    MetricKind::from_code(name)
                        .map(|kind| (kind, *weight))
                        .ok_or_else(|| {
                            ForgeError::Config(format!("unknown fitness metric: {}", name))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(Self { model, weights })
    }

    pub fn model(&self) -> &FitnessModel {
        &self.model
    }

    /// Composite fitness, always finite and non-negative
    pub fn calculate(&self, metrics: &BacktestMetrics) -> f64 {
        let clamped = |kind| metrics.get(kind).unwrap_or(0.0).max(0.0);
        let score = match self.model {
            FitnessModel::RankIcStability => {
                clamped(MetricKind::RankIc) * clamped(MetricKind::RankIcir).sqrt()
            }
            FitnessModel::Linear { .. } => self
                .weights
                .iter()
                .map(|(kind, weight)| weight * clamped(*kind))
                .sum(),
        };
        if score.is_finite() {
            score.max(0.0)
        } else {
            0.0
        }
    }
}
