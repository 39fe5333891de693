//! Quality gate configuration

use serde::{Deserialize, Serialize};

use factorforge_common::ForgeError;
use factorforge_expr::{Analyzer, ComplexityThresholds, ExpressionParser};

/// What to do with an inconsistent or unknown consistency verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyMode {
    /// Log and pass through
    #[default]
    Lenient,
    /// Inconsistent is a correctable failure; unknown is a retryable error
    Strict,
}

/// Gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub complexity_enabled: bool,
    pub redundancy_enabled: bool,
    pub consistency_enabled: bool,
    pub consistency_mode: ConsistencyMode,
    /// Ceiling on distinct subtrees
    pub max_symbol_length: usize,
    pub max_free_parameter_ratio: f64,
    pub max_base_features: usize,
    /// Similarity strictly above this is redundant
    pub redundancy_threshold: f64,
    pub max_correction_attempts: u32,
    /// Character limit checked before parsing
    pub max_expression_chars: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            complexity_enabled: true,
            redundancy_enabled: true,
            consistency_enabled: false,
            consistency_mode: ConsistencyMode::Lenient,
            max_symbol_length: factorforge_expr::DEFAULT_MAX_SYMBOL_LENGTH,
            max_free_parameter_ratio: factorforge_expr::DEFAULT_MAX_FREE_PARAMETER_RATIO,
            max_base_features: factorforge_expr::DEFAULT_MAX_BASE_FEATURES,
            redundancy_threshold: factorforge_expr::DEFAULT_REDUNDANCY_THRESHOLD,
            max_correction_attempts: crate::DEFAULT_MAX_CORRECTION_ATTEMPTS,
            max_expression_chars: factorforge_expr::DEFAULT_MAX_EXPRESSION_CHARS,
        }
    }
}

impl GateConfig {
    pub fn thresholds(&self) -> ComplexityThresholds {
        ComplexityThresholds {
            max_symbol_length: self.max_symbol_length,
            max_free_parameter_ratio: self.max_free_parameter_ratio,
            max_base_features: self.max_base_features,
        }
    }

    pub fn analyzer(&self) -> Analyzer {
        Analyzer::new(self.thresholds(), self.redundancy_threshold)
    }

    pub fn parser(&self) -> ExpressionParser {
        ExpressionParser::new(self.max_expression_chars)
    }

    /// Reject settings that would make the gate meaningless
    pub fn validate(&self) -> Result<(), ForgeError> {
        if !(0.0..=1.0).contains(&self.redundancy_threshold) {
            return Err(ForgeError::Config(format!(
                "redundancy_threshold must be within [0, 1], got {}",
                self.redundancy_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.max_free_parameter_ratio) {
            return Err(ForgeError::Config(format!(
                "max_free_parameter_ratio must be within [0, 1], got {}",
                self.max_free_parameter_ratio
            )));
        }
        if self.max_expression_chars == 0 {
            return Err(ForgeError::Config(
                "max_expression_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert!(config.complexity_enabled);
        assert!(config.redundancy_enabled);
        assert!(!config.consistency_enabled);
        assert_eq!(config.consistency_mode, ConsistencyMode::Lenient);
        assert_eq!(config.max_correction_attempts, 3);
        assert_eq!(config.thresholds(), ComplexityThresholds::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: GateConfig =
            serde_json::from_str(r#"{"consistency_mode": "strict", "max_base_features": 4}"#)
                .unwrap();
        assert_eq!(config.consistency_mode, ConsistencyMode::Strict);
        assert_eq!(config.max_base_features, 4);
        assert_eq!(config.max_symbol_length, 250);
    }

    #[test]
    fn test_validate_threshold_range() {
        let config = GateConfig {
            redundancy_threshold: 1.5,
            ..GateConfig::default()
        };
        assert!(matches!(config.validate(), Err(ForgeError::Config(_))));
    }
}
