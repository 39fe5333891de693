//! Operator vocabulary
//!
//! The closed set of base market fields and functions a factor expression may
//! reference. Anything outside this vocabulary is rejected by the parser.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base market field referenced by a leaf node (`$close`, `$volume`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Open,
    High,
    Low,
    Close,
    Volume,
    Vwap,
    Amount,
    Return,
}

impl Feature {
    pub const ALL: [Feature; 8] = [
        Feature::Open,
        Feature::High,
        Feature::Low,
        Feature::Close,
        Feature::Volume,
        Feature::Vwap,
        Feature::Amount,
        Feature::Return,
    ];

    /// Resolve a field name without the leading `$`
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "open" => Some(Feature::Open),
            "high" => Some(Feature::High),
            "low" => Some(Feature::Low),
            "close" => Some(Feature::Close),
            "volume" => Some(Feature::Volume),
            "vwap" => Some(Feature::Vwap),
            "amount" => Some(Feature::Amount),
            "return" => Some(Feature::Return),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Feature::Open => "open",
            Feature::High => "high",
            Feature::Low => "low",
            Feature::Close => "close",
            Feature::Volume => "volume",
            Feature::Vwap => "vwap",
            Feature::Amount => "amount",
            Feature::Return => "return",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name())
    }
}

/// Infix arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(&self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }

    /// Operand order does not change the result
    pub fn is_commutative(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul)
    }
}

/// Declared type of a function argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Any sub-expression (a time series)
    Series,
    /// Positive integer literal (lookback window or lag)
    Window,
    /// Numeric literal
    Scalar,
}

/// Family an operator belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorFamily {
    /// Rolling-window statistics over one series
    Rolling,
    /// Rolling statistics over a pair of series
    PairRolling,
    /// Reference / lag
    Reference,
    /// Cross-sectional ranking and normalisation
    CrossSectional,
    /// Element-wise math
    Elementwise,
}

/// Supported function library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    TsMean,
    TsStd,
    TsSum,
    TsMax,
    TsMin,
    TsRank,
    TsZscore,
    TsArgmax,
    TsArgmin,
    TsPctChange,
    Ema,
    Wma,
    TsCorr,
    TsCovariance,
    Delta,
    Delay,
    Rank,
    Zscore,
    Abs,
    Log,
    Sign,
    Sqrt,
    Inv,
    Max,
    Min,
    Pow,
}

const SERIES_WINDOW: &[ParamKind] = &[ParamKind::Series, ParamKind::Window];
const PAIR_WINDOW: &[ParamKind] = &[ParamKind::Series, ParamKind::Series, ParamKind::Window];
const SERIES: &[ParamKind] = &[ParamKind::Series];
const SERIES_PAIR: &[ParamKind] = &[ParamKind::Series, ParamKind::Series];
const SERIES_SCALAR: &[ParamKind] = &[ParamKind::Series, ParamKind::Scalar];

impl Operator {
    pub const ALL: [Operator; 26] = [
        Operator::TsMean,
        Operator::TsStd,
        Operator::TsSum,
        Operator::TsMax,
        Operator::TsMin,
        Operator::TsRank,
        Operator::TsZscore,
        Operator::TsArgmax,
        Operator::TsArgmin,
        Operator::TsPctChange,
        Operator::Ema,
        Operator::Wma,
        Operator::TsCorr,
        Operator::TsCovariance,
        Operator::Delta,
        Operator::Delay,
        Operator::Rank,
        Operator::Zscore,
        Operator::Abs,
        Operator::Log,
        Operator::Sign,
        Operator::Sqrt,
        Operator::Inv,
        Operator::Max,
        Operator::Min,
        Operator::Pow,
    ];

    /// Look up an operator by its (case-insensitive) name
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        Self::ALL.iter().copied().find(|op| op.name() == upper)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::TsMean => "TS_MEAN",
            Operator::TsStd => "TS_STD",
            Operator::TsSum => "TS_SUM",
            Operator::TsMax => "TS_MAX",
            Operator::TsMin => "TS_MIN",
            Operator::TsRank => "TS_RANK",
            Operator::TsZscore => "TS_ZSCORE",
            Operator::TsArgmax => "TS_ARGMAX",
            Operator::TsArgmin => "TS_ARGMIN",
            Operator::TsPctChange => "TS_PCTCHANGE",
            Operator::Ema => "EMA",
            Operator::Wma => "WMA",
            Operator::TsCorr => "TS_CORR",
            Operator::TsCovariance => "TS_COVARIANCE",
            Operator::Delta => "DELTA",
            Operator::Delay => "DELAY",
            Operator::Rank => "RANK",
            Operator::Zscore => "ZSCORE",
            Operator::Abs => "ABS",
            Operator::Log => "LOG",
            Operator::Sign => "SIGN",
            Operator::Sqrt => "SQRT",
            Operator::Inv => "INV",
            Operator::Max => "MAX",
            Operator::Min => "MIN",
            Operator::Pow => "POW",
        }
    }

    /// Declared argument types, in call order
    pub fn params(&self) -> &'static [ParamKind] {
        match self.family() {
            OperatorFamily::Rolling | OperatorFamily::Reference => SERIES_WINDOW,
            OperatorFamily::PairRolling => PAIR_WINDOW,
            OperatorFamily::CrossSectional => SERIES,
            OperatorFamily::Elementwise => match self {
                Operator::Max | Operator::Min => SERIES_PAIR,
                Operator::Pow => SERIES_SCALAR,
                _ => SERIES,
            },
        }
    }

    pub fn arity(&self) -> usize {
        self.params().len()
    }

    pub fn family(&self) -> OperatorFamily {
        match self {
            Operator::TsMean
            | Operator::TsStd
            | Operator::TsSum
            | Operator::TsMax
            | Operator::TsMin
            | Operator::TsRank
            | Operator::TsZscore
            | Operator::TsArgmax
            | Operator::TsArgmin
            | Operator::TsPctChange
            | Operator::Ema
            | Operator::Wma => OperatorFamily::Rolling,
            Operator::TsCorr | Operator::TsCovariance => OperatorFamily::PairRolling,
            Operator::Delta | Operator::Delay => OperatorFamily::Reference,
            Operator::Rank | Operator::Zscore => OperatorFamily::CrossSectional,
            Operator::Abs
            | Operator::Log
            | Operator::Sign
            | Operator::Sqrt
            | Operator::Inv
            | Operator::Max
            | Operator::Min
            | Operator::Pow => OperatorFamily::Elementwise,
        }
    }

    /// Argument order does not change the result
    pub fn is_commutative(&self) -> bool {
        matches!(self, Operator::Max | Operator::Min)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_lookup_is_case_insensitive() {
        assert_eq!(Operator::from_name("ts_mean"), Some(Operator::TsMean));
        assert_eq!(Operator::from_name("Rank"), Some(Operator::Rank));
        assert_eq!(Operator::from_name("MACD"), None);
    }

    #[test]
    fn test_every_operator_round_trips_by_name() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_name(op.name()), Some(op));
            assert!(op.arity() >= 1);
        }
    }

    #[test]
    fn test_declared_arity() {
        assert_eq!(Operator::TsCorr.arity(), 3);
        assert_eq!(Operator::Delay.params(), &[ParamKind::Series, ParamKind::Window]);
        assert_eq!(Operator::Pow.params(), &[ParamKind::Series, ParamKind::Scalar]);
        assert_eq!(Operator::Rank.arity(), 1);
    }

    #[test]
    fn test_feature_names() {
        for feature in Feature::ALL {
            assert_eq!(Feature::from_name(feature.name()), Some(feature));
        }
        assert_eq!(Feature::Close.to_string(), "$close");
        assert_eq!(Feature::from_name("turnover"), None);
    }
}
