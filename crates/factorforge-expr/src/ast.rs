//! Factor expression AST
//!
//! Trees are immutable once built. Analysis walks them and produces derived
//! scalars; nothing in this crate rewrites a node in place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::ops::{BinaryOp, Feature, Operator};

/// A node of a parsed factor expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    /// Base market field leaf
    Feature(Feature),
    /// Numeric constant leaf (also used for window and scalar parameters)
    Literal(f64),
    /// Unary negation of a non-literal sub-expression
    Neg(Box<Expr>),
    /// Infix arithmetic
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Function call from the supported operator library
    Call { op: Operator, args: Vec<Expr> },
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(op: Operator, args: Vec<Expr>) -> Self {
        Expr::Call { op, args }
    }

    /// Direct children in left-to-right order
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Feature(_) | Expr::Literal(_) => Vec::new(),
            Expr::Neg(inner) => vec![inner.as_ref()],
            Expr::Binary { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            Expr::Call { args, .. } => args.iter().collect(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Expr::Feature(_) | Expr::Literal(_))
    }

    /// Number of nodes in the tree, counting repeated subtrees every time
    pub fn tree_size(&self) -> usize {
        1 + self.children().into_iter().map(Expr::tree_size).sum::<usize>()
    }

    /// Longest root-to-leaf path (a single leaf has depth 1)
    pub fn depth(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(Expr::depth)
            .max()
            .unwrap_or(0)
    }

    /// Number of numeric literal leaves (free parameters)
    pub fn literal_count(&self) -> usize {
        match self {
            Expr::Literal(_) => 1,
            _ => self
                .children()
                .into_iter()
                .map(Expr::literal_count)
                .sum(),
        }
    }

    /// Distinct base fields referenced anywhere in the tree
    pub fn features(&self) -> BTreeSet<Feature> {
        let mut out = BTreeSet::new();
        self.collect_features(&mut out);
        out
    }

    fn collect_features(&self, out: &mut BTreeSet<Feature>) {
        if let Expr::Feature(feature) = self {
            out.insert(*feature);
        }
        for child in self.children() {
            child.collect_features(out);
        }
    }

    /// Operators used anywhere in the tree, in first-seen order
    pub fn operators(&self) -> Vec<Operator> {
        let mut out = Vec::new();
        self.collect_operators(&mut out);
        out
    }

    fn collect_operators(&self, out: &mut Vec<Operator>) {
        if let Expr::Call { op, .. } = self {
            if !out.contains(op) {
                out.push(*op);
            }
        }
        for child in self.children() {
            child.collect_operators(out);
        }
    }

    /// Canonical textual form: fully parenthesised, upper-case operators,
    /// no insignificant whitespace differences
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Feature(feature) => write!(f, "{}", feature),
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Neg(inner) => write!(f, "-({})", inner),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Call { op, args } => {
                write!(f, "{}(", op)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}
