//! Reference set of admitted ASTs
//!
//! Holds one precomputed [`SubtreeProfile`] per admitted factor so that
//! redundancy checks never re-fingerprint the library.

use std::collections::HashSet;

use crate::analyzer::RedundancyMatch;
use crate::ast::Expr;
use crate::similarity::SubtreeProfile;

#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub factor_id: String,
    pub profile: SubtreeProfile,
}

/// Ordered (insertion order) collection of admitted factor profiles
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    entries: Vec<ReferenceEntry>,
    ids: HashSet<String>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a profile; returns false if the id is already present
    pub fn insert(&mut self, factor_id: impl Into<String>, expr: &Expr) -> bool {
        let factor_id = factor_id.into();
        if self.ids.contains(&factor_id) {
            return false;
        }
        self.ids.insert(factor_id.clone());
        self.entries.push(ReferenceEntry {
            factor_id,
            profile: SubtreeProfile::from_expr(expr),
        });
        true
    }

    pub fn contains(&self, factor_id: &str) -> bool {
        self.ids.contains(factor_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceEntry> {
        self.entries.iter()
    }

    /// Most similar entry. Ties keep the earliest inserted entry.
    pub fn nearest(&self, profile: &SubtreeProfile) -> Option<RedundancyMatch> {
        let mut best: Option<RedundancyMatch> = None;
        for entry in &self.entries {
            let similarity = entry.profile.similarity(profile);
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(RedundancyMatch {
                    factor_id: entry.factor_id.clone(),
                    similarity,
                });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_insert_rejects_duplicate_ids() {
        let mut set = ReferenceSet::new();
        let expr = parse("RANK($close)").unwrap();
        assert!(set.insert("factor_a", &expr));
        assert!(!set.insert("factor_a", &expr));
        assert_eq!(set.len(), 1);
        assert!(set.contains("factor_a"));
    }

    #[test]
    fn test_nearest_prefers_earliest_on_tie() {
        let mut set = ReferenceSet::new();
        set.insert("first", &parse("RANK($close)").unwrap());
        set.insert("second", &parse("RANK($close)").unwrap());
        set.insert("third", &parse("ZSCORE($volume)").unwrap());

        let query = SubtreeProfile::from_expr(&parse("RANK($close)").unwrap());
        let nearest = set.nearest(&query).unwrap();
        assert_eq!(nearest.factor_id, "first");
        assert_eq!(nearest.similarity, 1.0);
    }

    #[test]
    fn test_nearest_on_empty_set() {
        let query = SubtreeProfile::from_expr(&parse("$close").unwrap());
        assert!(ReferenceSet::new().nearest(&query).is_none());
    }
}
