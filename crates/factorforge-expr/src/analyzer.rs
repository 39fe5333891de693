//! Complexity & redundancy analysis
//!
//! Computes structural metrics over an AST and compares it against a
//! [`ReferenceSet`] of already admitted factors. Pure: neither the tree nor
//! the reference set is modified.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::trace;

use crate::ast::Expr;
use crate::ops::Feature;
use crate::reference::ReferenceSet;
use crate::similarity::{distinct_subtrees, SubtreeProfile};

/// Complexity rule a factor can violate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityRule {
    SymbolLength,
    FreeParameterRatio,
    BaseFeatureCount,
}

impl fmt::Display for ComplexityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComplexityRule::SymbolLength => "symbol_length",
            ComplexityRule::FreeParameterRatio => "free_parameter_ratio",
            ComplexityRule::BaseFeatureCount => "base_feature_count",
        })
    }
}

/// Ceilings for the complexity rules
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityThresholds {
    pub max_symbol_length: usize,
    pub max_free_parameter_ratio: f64,
    pub max_base_features: usize,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            max_symbol_length: crate::DEFAULT_MAX_SYMBOL_LENGTH,
            max_free_parameter_ratio: crate::DEFAULT_MAX_FREE_PARAMETER_RATIO,
            max_base_features: crate::DEFAULT_MAX_BASE_FEATURES,
        }
    }
}

/// Outcome of one complexity rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleCheck {
    pub rule: ComplexityRule,
    pub value: f64,
    pub limit: f64,
    pub passed: bool,
}

/// The single most similar library entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundancyMatch {
    pub factor_id: String,
    pub similarity: f64,
}

/// Structured analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityReport {
    /// Distinct subtree count
    pub symbol_length: usize,
    /// Raw node count
    pub tree_size: usize,
    pub free_parameters: usize,
    pub free_parameter_ratio: f64,
    pub base_features: BTreeSet<Feature>,
    pub checks: Vec<RuleCheck>,
    /// Closest library entry, if the library was consulted and is non-empty
    pub nearest: Option<RedundancyMatch>,
    /// Set only when `nearest` exceeds the redundancy threshold
    pub redundant_with: Option<RedundancyMatch>,
}

impl ComplexityReport {
    pub fn base_feature_count(&self) -> usize {
        self.base_features.len()
    }

    /// Rules that failed, in evaluation order
    pub fn violations(&self) -> Vec<ComplexityRule> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.rule)
            .collect()
    }

    pub fn passes_complexity(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn is_redundant(&self) -> bool {
        self.redundant_with.is_some()
    }

    /// Human-readable lines describing each failed rule
    pub fn violation_details(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| match c.rule {
                ComplexityRule::FreeParameterRatio => format!(
                    "{} is {:.3}, limit {:.3}",
                    c.rule, c.value, c.limit
                ),
                _ => format!("{} is {}, limit {}", c.rule, c.value, c.limit),
            })
            .collect()
    }
}

/// Analyzer with configured ceilings and redundancy threshold
#[derive(Debug, Clone)]
pub struct Analyzer {
    thresholds: ComplexityThresholds,
    redundancy_threshold: f64,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(
            ComplexityThresholds::default(),
            crate::DEFAULT_REDUNDANCY_THRESHOLD,
        )
    }
}

impl Analyzer {
    pub fn new(thresholds: ComplexityThresholds, redundancy_threshold: f64) -> Self {
        Self {
            thresholds,
            redundancy_threshold,
        }
    }

    pub fn thresholds(&self) -> &ComplexityThresholds {
        &self.thresholds
    }

    pub fn redundancy_threshold(&self) -> f64 {
        self.redundancy_threshold
    }

    /// Structural metrics only; the library is not consulted
    pub fn measure(&self, ast: &Expr) -> ComplexityReport {
        let symbol_length = distinct_subtrees(ast);
        let tree_size = ast.tree_size();
        let free_parameters = ast.literal_count();
        let free_parameter_ratio = free_parameters as f64 / tree_size as f64;
        let base_features = ast.features();

        let t = &self.thresholds;
        let checks = vec![
            RuleCheck {
                rule: ComplexityRule::SymbolLength,
                value: symbol_length as f64,
                limit: t.max_symbol_length as f64,
                passed: symbol_length <= t.max_symbol_length,
            },
            RuleCheck {
                rule: ComplexityRule::FreeParameterRatio,
                value: free_parameter_ratio,
                limit: t.max_free_parameter_ratio,
                passed: free_parameter_ratio <= t.max_free_parameter_ratio,
            },
            RuleCheck {
                rule: ComplexityRule::BaseFeatureCount,
                value: base_features.len() as f64,
                limit: t.max_base_features as f64,
                passed: base_features.len() <= t.max_base_features,
            },
        ];

        ComplexityReport {
            symbol_length,
            tree_size,
            free_parameters,
            free_parameter_ratio,
            base_features,
            checks,
            nearest: None,
            redundant_with: None,
        }
    }

    /// Closest library entry and whether it crosses the threshold
    pub fn redundancy(
        &self,
        ast: &Expr,
        library: &ReferenceSet,
    ) -> (Option<RedundancyMatch>, Option<RedundancyMatch>) {
        let nearest = library.nearest(&SubtreeProfile::from_expr(ast));
        let redundant = nearest
            .as_ref()
            .filter(|m| m.similarity > self.redundancy_threshold)
            .cloned();
        (nearest, redundant)
    }

    /// Full analysis: structural metrics plus redundancy against `library`
    pub fn analyze(&self, ast: &Expr, library: &ReferenceSet) -> ComplexityReport {
        let mut report = self.measure(ast);
        let (nearest, redundant) = self.redundancy(ast, library);
        report.nearest = nearest;
        report.redundant_with = redundant;
        trace!(
            symbol_length = report.symbol_length,
            free_parameter_ratio = report.free_parameter_ratio,
            base_features = report.base_feature_count(),
            redundant = report.is_redundant(),
            "Analyzed expression"
        );
        report
    }
}
