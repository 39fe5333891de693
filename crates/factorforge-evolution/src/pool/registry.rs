//! Trajectory pool
//!
//! Owns every trajectory of an experiment. Trajectories are registered once
//! at planning time and never removed; they are only marked exhausted.
//! Parent selection only considers heads admitted in earlier rounds, so a
//! round never breeds from its own, still uncommitted, output.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use factorforge_common::{CandidateStatus, FactorCandidate, PoolError};

use super::selection::{choose, fitter, weakest, SelectionStrategy};
use super::trajectory::{PoolMember, Trajectory};
use crate::culling::ExhaustionPolicy;

/// Serializable view of the pool, written as the round checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Last committed round
    pub round: u32,
    pub next_admission_seq: u64,
    pub trajectories: Vec<Trajectory>,
}

pub struct TrajectoryPool {
    trajectories: Vec<Trajectory>,
    index: HashMap<Uuid, usize>,
    next_seq: u64,
    rng: StdRng,
}

impl TrajectoryPool {
    /// Empty pool; `seed` makes random and weighted selection reproducible
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            trajectories: Vec::new(),
            index: HashMap::new(),
            next_seq: 0,
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }

    /// Rebuild a pool from a checkpoint written by [`snapshot`](Self::snapshot)
    pub fn restore(snapshot: PoolSnapshot, seed: Option<u64>) -> Self {
        let mut pool = Self::new(seed);
        pool.index = snapshot
            .trajectories
            .iter()
            .enumerate()
            .map(|(slot, t)| (t.id, slot))
            .collect();
        pool.trajectories = snapshot.trajectories;
        pool.next_seq = snapshot.next_admission_seq;
        info!(
            round = snapshot.round,
            trajectories = pool.trajectories.len(),
            "Restored trajectory pool"
        );
        pool
    }

    /// Candidate ids referenced by any trajectory history
    pub fn member_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.trajectories
            .iter()
            .flat_map(|t| t.history.iter().map(|m| m.candidate_id))
    }

    pub fn register_trajectory(&mut self, direction: impl Into<String>) -> Uuid {
        let trajectory = Trajectory::new(direction);
        let id = trajectory.id;
        debug!(trajectory = %id, direction = %trajectory.direction, "Registered trajectory");
        self.index.insert(id, self.trajectories.len());
        self.trajectories.push(trajectory);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&Trajectory> {
        self.index.get(id).map(|&i| &self.trajectories[i])
    }

    /// Trajectories in registration order
    pub fn trajectories(&self) -> &[Trajectory] {
        &self.trajectories
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Ids of trajectories that are not exhausted
    pub fn active(&self) -> Vec<Uuid> {
        self.trajectories
            .iter()
            .filter(|t| !t.exhausted)
            .map(|t| t.id)
            .collect()
    }

    /// Append an admitted candidate to a trajectory's history and head set
    pub fn record(
        &mut self,
        trajectory_id: Uuid,
        candidate: &FactorCandidate,
        fitness: f64,
    ) -> Result<PoolMember, PoolError> {
        if candidate.status() != CandidateStatus::Admitted {
            return Err(PoolError::NotAdmitted {
                candidate: candidate.id,
                status: candidate.status(),
            });
        }
        let slot = *self
            .index
            .get(&trajectory_id)
            .ok_or(PoolError::UnknownTrajectory(trajectory_id))?;
        let trajectory = &mut self.trajectories[slot];
        if trajectory.exhausted {
            return Err(PoolError::Exhausted(trajectory_id));
        }

        let member = PoolMember {
            candidate_id: candidate.id,
            trajectory_id,
            round: candidate.round,
            fitness,
            admission_seq: self.next_seq,
        };
        self.next_seq += 1;
        trajectory.push(member.clone());
        Ok(member)
    }

    /// Bookkeeping after a round commits: participation, rounds without an
    /// admission, and exhaustion. Returns the trajectories exhausted by this
    /// round.
    pub fn close_round(
        &mut self,
        round: u32,
        participants: &HashSet<Uuid>,
        policy: &ExhaustionPolicy,
    ) -> Vec<Uuid> {
        let mut exhausted = Vec::new();
        for trajectory in self.trajectories.iter_mut().filter(|t| !t.exhausted) {
            if participants.contains(&trajectory.id) {
                trajectory.mark_round(round);
                if trajectory.admitted_in(round) > 0 {
                    trajectory.stale_rounds = 0;
                } else {
                    trajectory.stale_rounds += 1;
                }
            }
            if policy.should_exhaust(!trajectory.heads.is_empty()) {
                trajectory.exhausted = true;
                info!(
                    trajectory = %trajectory.id,
                    round,
                    stale_rounds = trajectory.stale_rounds,
                    admitted = trajectory.history.len(),
                    "Trajectory exhausted"
                );
                exhausted.push(trajectory.id);
            }
        }
        exhausted
    }

    fn eligible_heads(&self, round: u32) -> Vec<PoolMember> {
        self.trajectories
            .iter()
            .filter(|t| !t.exhausted)
            .flat_map(|t| t.heads_before(round).cloned())
            .collect()
    }

    /// One parent among the heads of all viable trajectories
    ///
    /// # Errors
    ///
    /// `PoolError::Empty` when no trajectory has an eligible head.
    pub fn select_parent(
        &mut self,
        strategy: SelectionStrategy,
        round: u32,
    ) -> Result<PoolMember, PoolError> {
        let heads = self.eligible_heads(round);
        let refs: Vec<&PoolMember> = heads.iter().collect();
        choose(strategy, &refs, &mut self.rng)
            .cloned()
            .ok_or(PoolError::Empty)
    }

    fn viable(&self, trajectory_id: Uuid) -> Result<&Trajectory, PoolError> {
        let slot = *self
            .index
            .get(&trajectory_id)
            .ok_or(PoolError::UnknownTrajectory(trajectory_id))?;
        let trajectory = &self.trajectories[slot];
        if trajectory.exhausted {
            return Err(PoolError::Exhausted(trajectory_id));
        }
        Ok(trajectory)
    }

    /// One parent among the heads of a single trajectory
    pub fn select_parent_in(
        &mut self,
        trajectory_id: Uuid,
        strategy: SelectionStrategy,
        round: u32,
    ) -> Result<PoolMember, PoolError> {
        let heads: Vec<PoolMember> = self
            .viable(trajectory_id)?
            .heads_before(round)
            .cloned()
            .collect();
        let refs: Vec<&PoolMember> = heads.iter().collect();
        choose(strategy, &refs, &mut self.rng)
            .cloned()
            .ok_or(PoolError::Empty)
    }

    /// Mutation parent of a trajectory: the head with the poorest fitness,
    /// i.e. the one furthest behind the trajectory's history
    ///
    /// # Errors
    ///
    /// `PoolError::Empty` when the trajectory has no head from an earlier
    /// round.
    pub fn select_mutation_target(
        &self,
        trajectory_id: Uuid,
        round: u32,
    ) -> Result<PoolMember, PoolError> {
        let refs: Vec<&PoolMember> = self.viable(trajectory_id)?.heads_before(round).collect();
        weakest(&refs).cloned().ok_or(PoolError::Empty)
    }

    /// Up to `count` crossover pairs, each from two distinct trajectories,
    /// fitter parent first. No trajectory pair is used twice. Fewer than two
    /// viable trajectories yields no pairs; crossover is skipped, not failed.
    pub fn select_crossover_pairs(
        &mut self,
        strategy: SelectionStrategy,
        round: u32,
        count: usize,
    ) -> Vec<(PoolMember, PoolMember)> {
        let heads = self.eligible_heads(round);
        let trajectories: BTreeSet<Uuid> = heads.iter().map(|h| h.trajectory_id).collect();
        if trajectories.len() < 2 {
            debug!(round, viable = trajectories.len(), "Too few trajectories for crossover");
            return Vec::new();
        }

        let key = |a: Uuid, b: Uuid| if a < b { (a, b) } else { (b, a) };
        let mut used: HashSet<(Uuid, Uuid)> = HashSet::new();
        let mut pairs = Vec::new();

        while pairs.len() < count {
            let firsts: Vec<&PoolMember> = heads
                .iter()
                .filter(|m| {
                    trajectories
                        .iter()
                        .any(|t| *t != m.trajectory_id && !used.contains(&key(m.trajectory_id, *t)))
                })
                .collect();
            let Some(first) = choose(strategy, &firsts, &mut self.rng) else {
                break;
            };
            let seconds: Vec<&PoolMember> = heads
                .iter()
                .filter(|m| {
                    m.trajectory_id != first.trajectory_id
                        && !used.contains(&key(first.trajectory_id, m.trajectory_id))
                })
                .collect();
            let Some(second) = choose(strategy, &seconds, &mut self.rng) else {
                break;
            };

            used.insert(key(first.trajectory_id, second.trajectory_id));
            let pair = if fitter(first, second) == Ordering::Greater {
                (second.clone(), first.clone())
            } else {
                (first.clone(), second.clone())
            };
            pairs.push(pair);
        }
        pairs
    }

    /// A single crossover pair, if one exists
    pub fn select_crossover_pair(
        &mut self,
        strategy: SelectionStrategy,
        round: u32,
    ) -> Option<(PoolMember, PoolMember)> {
        self.select_crossover_pairs(strategy, round, 1).pop()
    }

    pub fn snapshot(&self, round: u32) -> PoolSnapshot {
        PoolSnapshot {
            round,
            next_admission_seq: self.next_seq,
            trajectories: self.trajectories.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorforge_common::{FactorSpec, Lineage};
    use factorforge_expr::parse;
    use std::sync::Arc;

    fn admitted(trajectory_id: Uuid, round: u32) -> FactorCandidate {
        let mut candidate =
            FactorCandidate::new(trajectory_id, round, FactorSpec::default(), Lineage::Original);
        candidate
            .attach_ast(Arc::new(parse("RANK($close)").unwrap()))
            .unwrap();
        candidate.advance(CandidateStatus::Gated).unwrap();
        candidate.admit().unwrap();
        candidate
    }

    fn seeded_pool(fitness: &[f64]) -> (TrajectoryPool, Vec<Uuid>) {
        let mut pool = TrajectoryPool::new(Some(11));
        let ids: Vec<Uuid> = fitness
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let id = pool.register_trajectory(format!("direction {}", i));
                pool.record(id, &admitted(id, 0), *f).unwrap();
                id
            })
            .collect();
        (pool, ids)
    }

    #[test]
    fn test_record_requires_admission() {
        let mut pool = TrajectoryPool::new(Some(0));
        let id = pool.register_trajectory("momentum");
        let proposed = FactorCandidate::new(id, 0, FactorSpec::default(), Lineage::Original);
        assert!(matches!(
            pool.record(id, &proposed, 0.1),
            Err(PoolError::NotAdmitted { .. })
        ));
        let stranger = Uuid::now_v7();
        assert_eq!(
            pool.record(stranger, &admitted(stranger, 0), 0.1),
            Err(PoolError::UnknownTrajectory(stranger))
        );
    }

    #[test]
    fn test_empty_pool_is_an_error() {
        let mut pool = TrajectoryPool::new(Some(0));
        assert_eq!(
            pool.select_parent(SelectionStrategy::Best, 1),
            Err(PoolError::Empty)
        );
        pool.register_trajectory("value");
        assert_eq!(
            pool.select_parent(SelectionStrategy::Random, 1),
            Err(PoolError::Empty)
        );
    }

    #[test]
    fn test_best_parent_across_trajectories() {
        let (mut pool, ids) = seeded_pool(&[0.01, 0.07, 0.03]);
        let parent = pool.select_parent(SelectionStrategy::Best, 1).unwrap();
        assert_eq!(parent.trajectory_id, ids[1]);

        // heads admitted in the selecting round are not eligible
        assert_eq!(
            pool.select_parent(SelectionStrategy::Best, 0),
            Err(PoolError::Empty)
        );
    }

    #[test]
    fn test_crossover_never_pairs_a_trajectory_with_itself() {
        let (mut pool, _) = seeded_pool(&[0.01, 0.07, 0.03, 0.02]);
        for strategy in [
            SelectionStrategy::Best,
            SelectionStrategy::Random,
            SelectionStrategy::Weighted,
        ] {
            let pairs = pool.select_crossover_pairs(strategy, 1, 6);
            assert_eq!(pairs.len(), 6);
            let mut seen = HashSet::new();
            for (a, b) in &pairs {
                assert_ne!(a.trajectory_id, b.trajectory_id);
                assert!(a.fitness >= b.fitness);
                let key = if a.trajectory_id < b.trajectory_id {
                    (a.trajectory_id, b.trajectory_id)
                } else {
                    (b.trajectory_id, a.trajectory_id)
                };
                assert!(seen.insert(key));
            }
        }
    }

    #[test]
    fn test_crossover_skipped_with_one_viable_trajectory() {
        let (mut pool, _) = seeded_pool(&[0.05]);
        pool.register_trajectory("empty direction");
        assert!(pool.select_crossover_pair(SelectionStrategy::Best, 1).is_none());
    }

    #[test]
    fn test_close_round_exhausts_only_headless() {
        let (mut pool, ids) = seeded_pool(&[0.02, 0.04]);
        let headless = pool.register_trajectory("nothing admitted");
        let policy = ExhaustionPolicy::new();

        let all: HashSet<Uuid> = pool.trajectories().iter().map(|t| t.id).collect();
        let exhausted = pool.close_round(0, &all, &policy);
        assert_eq!(exhausted, vec![headless]);
        assert_eq!(
            pool.select_parent_in(headless, SelectionStrategy::Best, 1),
            Err(PoolError::Exhausted(headless))
        );

        // trajectory 0 admits in round 1, trajectory 1 never does again
        pool.record(ids[0], &admitted(ids[0], 1), 0.03).unwrap();
        let both: HashSet<Uuid> = ids.iter().copied().collect();
        for round in 1..6 {
            assert!(pool.close_round(round, &both, &policy).is_empty());
        }
        assert_eq!(pool.get(&ids[1]).unwrap().stale_rounds, 5);
        assert_eq!(pool.active(), ids);
        assert!(pool.select_parent_in(ids[1], SelectionStrategy::Best, 6).is_ok());
    }

    #[test]
    fn test_mutation_targets_weakest_head() {
        let mut pool = TrajectoryPool::new(Some(3));
        let id = pool.register_trajectory("momentum");
        let strong = pool.record(id, &admitted(id, 0), 0.08).unwrap();
        let weak = pool.record(id, &admitted(id, 0), 0.02).unwrap();

        assert_eq!(pool.select_mutation_target(id, 1).unwrap(), weak);
        assert_eq!(
            pool.select_parent_in(id, SelectionStrategy::Best, 1).unwrap(),
            strong
        );
        // heads admitted in the current round are not yet eligible
        assert_eq!(pool.select_mutation_target(id, 0), Err(PoolError::Empty));
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let picks = |seed| {
            let mut pool = TrajectoryPool::new(Some(seed));
            for i in 0..5 {
                let id = pool.register_trajectory(format!("d{}", i));
                pool.record(id, &admitted(id, 0), i as f64 * 0.01).unwrap();
            }
            (0..10)
                .map(|_| pool.select_parent(SelectionStrategy::Weighted, 1).unwrap().admission_seq)
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(99), picks(99));
    }

    #[test]
    fn test_snapshot() {
        let (pool, ids) = seeded_pool(&[0.02, 0.04]);
        let snapshot = pool.snapshot(0);
        assert_eq!(snapshot.next_admission_seq, 2);
        assert_eq!(snapshot.trajectories.len(), 2);
        assert_eq!(snapshot.trajectories[0].id, ids[0]);
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: PoolSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.trajectories[1].heads[0].fitness, 0.04);
    }

    #[test]
    fn test_restore_continues_admission_order() {
        let (pool, ids) = seeded_pool(&[0.02, 0.04]);
        let mut restored = TrajectoryPool::restore(pool.snapshot(0), Some(7));
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.active(), ids);
        assert_eq!(restored.member_ids().count(), 2);

        let member = restored.record(ids[0], &admitted(ids[0], 1), 0.05).unwrap();
        assert_eq!(member.admission_seq, 2);
        assert_eq!(restored.get(&ids[0]).unwrap().heads, vec![member]);
        assert_eq!(restored.select_mutation_target(ids[1], 1).unwrap().fitness, 0.04);
    }
}
