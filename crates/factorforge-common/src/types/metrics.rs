//! Backtest metrics and quality classification
//!
//! Every metric is optional: the backtest oracle may fail to produce some of
//! them (e.g. a factor with constant values has no defined IC). Consumers
//! must treat an absent or non-finite value as "unknown", never as zero
//! fitness by accident of a NaN comparison.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Information ratio above which a factor is `high` quality
pub const HIGH_QUALITY_IR: f64 = 0.5;

/// Information ratio above which a factor is `medium` quality
pub const MEDIUM_QUALITY_IR: f64 = 0.1;

/// Metrics produced by the backtest oracle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    /// Information coefficient (Pearson)
    #[serde(rename = "IC", default, skip_serializing_if = "Option::is_none")]
    pub ic: Option<f64>,

    /// IC mean / IC std
    #[serde(rename = "ICIR", default, skip_serializing_if = "Option::is_none")]
    pub icir: Option<f64>,

    /// Rank information coefficient (Spearman)
    #[serde(rename = "RankIC", default, skip_serializing_if = "Option::is_none")]
    pub rank_ic: Option<f64>,

    /// Rank IC mean / Rank IC std
    #[serde(rename = "RankICIR", default, skip_serializing_if = "Option::is_none")]
    pub rank_icir: Option<f64>,

    /// Annualized return of the long-short portfolio
    #[serde(rename = "ARR", default, skip_serializing_if = "Option::is_none")]
    pub annualized_return: Option<f64>,

    /// Maximum drawdown (reported as a negative fraction)
    #[serde(rename = "MDD", default, skip_serializing_if = "Option::is_none")]
    pub max_drawdown: Option<f64>,

    /// Calmar ratio, ARR / |MDD|
    #[serde(rename = "CR", default, skip_serializing_if = "Option::is_none")]
    pub calmar_ratio: Option<f64>,

    /// Information ratio of excess returns
    #[serde(rename = "IR", default, skip_serializing_if = "Option::is_none")]
    pub information_ratio: Option<f64>,
}

impl BacktestMetrics {
    /// True when the oracle produced no usable metric at all
    pub fn is_empty(&self) -> bool {
        MetricKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }

    /// Finite value of `kind`, if present
    pub fn get(&self, kind: MetricKind) -> Option<f64> {
        let value = match kind {
            MetricKind::Ic => self.ic,
            MetricKind::Icir => self.icir,
            MetricKind::RankIc => self.rank_ic,
            MetricKind::RankIcir => self.rank_icir,
            MetricKind::AnnualizedReturn => self.annualized_return,
            MetricKind::MaxDrawdown => self.max_drawdown,
            MetricKind::CalmarRatio => self.calmar_ratio,
            MetricKind::InformationRatio => self.information_ratio,
        };
        value.filter(|v| v.is_finite())
    }

    /// Fill in the Calmar ratio from ARR and MDD when the oracle omitted it
    pub fn with_derived_calmar(mut self) -> Self {
        if self.get(MetricKind::CalmarRatio).is_none() {
            if let (Some(arr), Some(mdd)) = (
                self.get(MetricKind::AnnualizedReturn),
                self.get(MetricKind::MaxDrawdown),
            ) {
                if mdd != 0.0 {
                    self.calmar_ratio = Some(arr / mdd.abs());
                }
            }
        }
        self
    }

    pub fn quality(&self) -> QualityTier {
        QualityTier::classify(self)
    }
}

/// Named metric, used for library queries and feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    #[serde(rename = "IC")]
    Ic,
    #[serde(rename = "ICIR")]
    Icir,
    #[serde(rename = "RankIC")]
    RankIc,
    #[serde(rename = "RankICIR")]
    RankIcir,
    #[serde(rename = "ARR")]
    AnnualizedReturn,
    #[serde(rename = "MDD")]
    MaxDrawdown,
    #[serde(rename = "CR")]
    CalmarRatio,
    #[serde(rename = "IR")]
    InformationRatio,
}

impl MetricKind {
    pub const ALL: [MetricKind; 8] = [
        MetricKind::Ic,
        MetricKind::Icir,
        MetricKind::RankIc,
        MetricKind::RankIcir,
        MetricKind::AnnualizedReturn,
        MetricKind::MaxDrawdown,
        MetricKind::CalmarRatio,
        MetricKind::InformationRatio,
    ];

    /// Short name as written in the library file
    pub fn code(&self) -> &'static str {
        match self {
            MetricKind::Ic => "IC",
            MetricKind::Icir => "ICIR",
            MetricKind::RankIc => "RankIC",
            MetricKind::RankIcir => "RankICIR",
            MetricKind::AnnualizedReturn => "ARR",
            MetricKind::MaxDrawdown => "MDD",
            MetricKind::CalmarRatio => "CR",
            MetricKind::InformationRatio => "IR",
        }
    }

    /// Case-insensitive lookup by short name
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Coarse quality bucket stored with each library record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub fn classify(metrics: &BacktestMetrics) -> Self {
        match metrics.get(MetricKind::InformationRatio) {
            Some(ir) if ir > HIGH_QUALITY_IR => QualityTier::High,
            Some(ir) if ir > MEDIUM_QUALITY_IR => QualityTier::Medium,
            Some(_) => QualityTier::Low,
            None if !metrics.is_empty() => QualityTier::Medium,
            None => QualityTier::Low,
        }
    }
}

/// Backtest window handed to the backtest oracle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BacktestPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BacktestPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for BacktestPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
