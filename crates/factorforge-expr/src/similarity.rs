//! Subtree fingerprints and structural similarity
//!
//! Every node is hashed bottom-up together with its children's hashes, so a
//! fingerprint identifies a whole rooted subtree. Two fingerprinting modes:
//!
//! - `Exact`: literal values matter, operand order matters.
//! - `Shape`: literal values are abstracted to a placeholder and operands of
//!   commutative operators are order-normalised. A factor that only renames
//!   its constants has the same shape as the original.

use std::collections::{HashMap, HashSet};

use crate::ast::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintMode {
    Exact,
    Shape,
}

fn digest_u64(hasher: &blake3::Hasher) -> u64 {
    let digest = hasher.finalize();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(buf)
}

/// Fingerprint `expr`, pushing the fingerprint of every subtree (post-order)
/// into `out`. Returns the root fingerprint.
pub fn fingerprint(expr: &Expr, mode: FingerprintMode, out: &mut Vec<u64>) -> u64 {
    let mut hasher = blake3::Hasher::new();
    match expr {
        Expr::Feature(feature) => {
            hasher.update(b"F");
            hasher.update(feature.name().as_bytes());
        }
        Expr::Literal(value) => {
            hasher.update(b"L");
            if mode == FingerprintMode::Exact {
                hasher.update(&value.to_bits().to_le_bytes());
            }
        }
        Expr::Neg(inner) => {
            let child = fingerprint(inner, mode, out);
            hasher.update(b"N");
            hasher.update(&child.to_le_bytes());
        }
        Expr::Binary { op, lhs, rhs } => {
            let mut children = [fingerprint(lhs, mode, out), fingerprint(rhs, mode, out)];
            if mode == FingerprintMode::Shape && op.is_commutative() {
                children.sort_unstable();
            }
            hasher.update(b"B");
            hasher.update(&[op.symbol() as u8]);
            for child in children {
                hasher.update(&child.to_le_bytes());
            }
        }
        Expr::Call { op, args } => {
            let mut children: Vec<u64> = args.iter().map(|a| fingerprint(a, mode, out)).collect();
            if mode == FingerprintMode::Shape && op.is_commutative() {
                children.sort_unstable();
            }
            hasher.update(b"C");
            hasher.update(op.name().as_bytes());
            for child in children {
                hasher.update(&child.to_le_bytes());
            }
        }
    }
    let fp = digest_u64(&hasher);
    out.push(fp);
    fp
}

/// Number of distinct subtrees (identical subtrees counted once)
pub fn distinct_subtrees(expr: &Expr) -> usize {
    let mut all = Vec::with_capacity(expr.tree_size());
    fingerprint(expr, FingerprintMode::Exact, &mut all);
    all.into_iter().collect::<HashSet<_>>().len()
}

/// Multiset of subtree shapes for one AST, precomputed once per library entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeProfile {
    counts: HashMap<u64, usize>,
    size: usize,
    root: u64,
}

impl SubtreeProfile {
    pub fn from_expr(expr: &Expr) -> Self {
        let mut all = Vec::with_capacity(expr.tree_size());
        let root = fingerprint(expr, FingerprintMode::Shape, &mut all);
        let size = all.len();
        let mut counts = HashMap::with_capacity(size);
        for fp in all {
            *counts.entry(fp).or_insert(0) += 1;
        }
        Self { counts, size, root }
    }

    /// Total number of subtrees (the tree size)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Shape fingerprint of the whole tree
    pub fn root(&self) -> u64 {
        self.root
    }

    /// Fraction of matching subtrees, normalised by the larger tree.
    /// Symmetric, in `[0, 1]`, and `1.0` exactly when the shapes coincide.
    pub fn similarity(&self, other: &SubtreeProfile) -> f64 {
        let larger = self.size.max(other.size);
        if larger == 0 {
            return 0.0;
        }
        if self.root == other.root && self.size == other.size {
            return 1.0;
        }
        let (small, big) = if self.counts.len() <= other.counts.len() {
            (&self.counts, &other.counts)
        } else {
            (&other.counts, &self.counts)
        };
        let shared: usize = small
            .iter()
            .map(|(fp, n)| big.get(fp).map_or(0, |m| (*n).min(*m)))
            .sum();
        shared as f64 / larger as f64
    }
}

/// Similarity between two ASTs
pub fn similarity(a: &Expr, b: &Expr) -> f64 {
    SubtreeProfile::from_expr(a).similarity(&SubtreeProfile::from_expr(b))
}
