//! Parent selection strategies
//!
//! - `best`: highest fitness, earliest admission wins ties
//! - `random`: uniform over the eligible heads
//! - `weighted`: rank-proportional; the worst head has weight 1, the best n,
//!   equal fitness shares the higher rank. Every head keeps a non-zero
//!   chance, which preserves exploration.

use ordered_float::OrderedFloat;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::trajectory::PoolMember;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    #[default]
    Best,
    Random,
    Weighted,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SelectionStrategy::Best => "best",
            SelectionStrategy::Random => "random",
            SelectionStrategy::Weighted => "weighted",
        })
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best" => Ok(SelectionStrategy::Best),
            "random" => Ok(SelectionStrategy::Random),
            "weighted" => Ok(SelectionStrategy::Weighted),
            other => Err(format!("unknown selection strategy: {}", other)),
        }
    }
}

/// Fitter first; earlier admission first on equal fitness
pub fn fitter(a: &PoolMember, b: &PoolMember) -> Ordering {
    OrderedFloat(b.fitness)
        .cmp(&OrderedFloat(a.fitness))
        .then(a.admission_seq.cmp(&b.admission_seq))
}

/// Weakest member: lowest fitness, earliest admission on ties
pub fn weakest<'a>(members: &[&'a PoolMember]) -> Option<&'a PoolMember> {
    members.iter().copied().min_by(|a, b| {
        OrderedFloat(a.fitness)
            .cmp(&OrderedFloat(b.fitness))
            .then(a.admission_seq.cmp(&b.admission_seq))
    })
}

/// Rank weights aligned with `members`
pub fn rank_weights(members: &[&PoolMember]) -> Vec<f64> {
    members
        .iter()
        .map(|m| {
            // rank = 1 + number of members strictly worse
            let worse = members
                .iter()
                .filter(|other| OrderedFloat(other.fitness) < OrderedFloat(m.fitness))
                .count();
            // ties share the best rank of their group
            let tied = members
                .iter()
                .filter(|other| OrderedFloat(other.fitness) == OrderedFloat(m.fitness))
                .count();
            (worse + tied) as f64
        })
        .collect()
}

/// Pick one member according to `strategy`. `None` only when `members` is empty.
pub fn choose<'a, R: Rng + ?Sized>(
    strategy: SelectionStrategy,
    members: &[&'a PoolMember],
    rng: &mut R,
) -> Option<&'a PoolMember> {
    if members.is_empty() {
        return None;
    }
    match strategy {
        SelectionStrategy::Best => members.iter().copied().min_by(|a, b| fitter(a, b)),
        SelectionStrategy::Random => Some(members[rng.gen_range(0..members.len())]),
        SelectionStrategy::Weighted => {
            let weights = rank_weights(members);
            match WeightedIndex::new(&weights) {
                Ok(dist) => Some(members[dist.sample(rng)]),
                Err(_) => Some(members[rng.gen_range(0..members.len())]),
            }
        }
    }
}
