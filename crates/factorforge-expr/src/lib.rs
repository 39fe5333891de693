//! # FactorForge Expr
//!
//! Factor expression language: parsing, the immutable AST, and the
//! structural analysis used by the quality gate.
//!
//! ## Modules
//!
//! - [`ops`]: base features and the supported operator library
//! - [`ast`]: the expression tree and its measurements
//! - [`parser`]: bounded recursive-descent parser
//! - [`lint`]: pre-parse detection of pseudo-code constructs
//! - [`similarity`]: subtree fingerprints and structural similarity
//! - [`reference`]: precomputed profiles of admitted factors
//! - [`analyzer`]: complexity rules and redundancy detection

pub mod analyzer;
pub mod ast;
pub mod lint;
pub mod ops;
pub mod parser;
pub mod reference;
pub mod similarity;

pub use analyzer::{
    Analyzer, ComplexityReport, ComplexityRule, ComplexityThresholds, RedundancyMatch, RuleCheck,
};
pub use ast::Expr;
pub use ops::{BinaryOp, Feature, Operator, OperatorFamily, ParamKind};
pub use parser::{parse, ExpressionParser, ParseError};
pub use reference::{ReferenceEntry, ReferenceSet};
pub use similarity::{similarity, SubtreeProfile};

/// Character limit for a single expression
pub const DEFAULT_MAX_EXPRESSION_CHARS: usize = 1024;

/// Maximum parenthesis / call nesting accepted by the parser
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

/// Symbol length ceiling (distinct subtrees)
pub const DEFAULT_MAX_SYMBOL_LENGTH: usize = 250;

/// Free parameter ratio ceiling
pub const DEFAULT_MAX_FREE_PARAMETER_RATIO: f64 = 0.5;

/// Distinct base feature ceiling
pub const DEFAULT_MAX_BASE_FEATURES: usize = 6;

/// Similarity above which a candidate is redundant
pub const DEFAULT_REDUNDANCY_THRESHOLD: f64 = 0.85;
