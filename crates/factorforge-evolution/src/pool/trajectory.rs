//! Trajectory - one research direction tracked across rounds
//!
//! A trajectory references its admitted candidates by id; the records
//! themselves live in the factor library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An admitted candidate as seen by the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMember {
    pub candidate_id: Uuid,
    pub trajectory_id: Uuid,
    /// Round in which it was admitted
    pub round: u32,
    pub fitness: f64,
    /// Global admission order, used as the deterministic tie-break
    pub admission_seq: u64,
}

/// Research direction with its admission history and current frontier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: Uuid,
    pub direction: String,
    /// Rounds the trajectory took part in, ascending
    pub rounds: Vec<u32>,
    /// Every admitted member, oldest first
    pub history: Vec<PoolMember>,
    /// Members admitted in the most recent round that admitted anything
    pub heads: Vec<PoolMember>,
    pub exhausted: bool,
    /// Consecutive participated rounds without an admission
    pub stale_rounds: u32,
    pub created_at: DateTime<Utc>,
}

impl Trajectory {
    pub fn new(direction: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            direction: direction.into(),
            rounds: Vec::new(),
            history: Vec::new(),
            heads: Vec::new(),
            exhausted: false,
            stale_rounds: 0,
            created_at: Utc::now(),
        }
    }

    /// Append an admitted member; a member from a newer round replaces the
    /// head set, one from the same round joins it
    pub fn push(&mut self, member: PoolMember) {
        match self.heads.first() {
            Some(head) if head.round == member.round => {}
            _ => self.heads.clear(),
        }
        self.heads.push(member.clone());
        self.history.push(member);
    }

    pub fn mark_round(&mut self, round: u32) {
        if self.rounds.last() != Some(&round) {
            self.rounds.push(round);
        }
    }

    pub fn admitted_in(&self, round: u32) -> usize {
        self.history.iter().filter(|m| m.round == round).count()
    }

    /// Highest fitness ever admitted
    pub fn best_fitness(&self) -> Option<f64> {
        self.history
            .iter()
            .map(|m| m.fitness)
            .fold(None, |best, f| Some(best.map_or(f, |b: f64| b.max(f))))
    }

    /// Fitness values in admission order
    pub fn fitness_history(&self) -> Vec<f64> {
        self.history.iter().map(|m| m.fitness).collect()
    }

    /// Heads admitted before `round`
    pub fn heads_before(&self, round: u32) -> impl Iterator<Item = &PoolMember> {
        self.heads.iter().filter(move |m| m.round < round)
    }

    pub fn is_viable(&self) -> bool {
        !self.exhausted && !self.heads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(trajectory: &Trajectory, round: u32, fitness: f64, seq: u64) -> PoolMember {
        PoolMember {
            candidate_id: Uuid::now_v7(),
            trajectory_id: trajectory.id,
            round,
            fitness,
            admission_seq: seq,
        }
    }

    #[test]
    fn test_heads_follow_latest_round() {
        let mut trajectory = Trajectory::new("momentum");
        let first = member(&trajectory, 0, 0.02, 0);
        trajectory.push(first);
        assert_eq!(trajectory.heads.len(), 1);

        let a = member(&trajectory, 2, 0.01, 3);
        let b = member(&trajectory, 2, 0.05, 4);
        trajectory.push(a);
        trajectory.push(b);
        assert_eq!(trajectory.heads.len(), 2);
        assert!(trajectory.heads.iter().all(|h| h.round == 2));
        assert_eq!(trajectory.history.len(), 3);
        assert_eq!(trajectory.best_fitness(), Some(0.05));
        assert_eq!(trajectory.heads_before(2).count(), 0);
        assert_eq!(trajectory.heads_before(3).count(), 2);
    }

    #[test]
    fn test_viability() {
        let mut trajectory = Trajectory::new("volume");
        assert!(!trajectory.is_viable());
        let m = member(&trajectory, 0, 0.0, 0);
        trajectory.push(m);
        assert!(trajectory.is_viable());
        trajectory.exhausted = true;
        assert!(!trajectory.is_viable());
    }
}
