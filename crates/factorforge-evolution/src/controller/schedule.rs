//! Round schedule
//!
//! Round 0 is always `Original`. With both operators enabled, odd rounds
//! mutate and even rounds cross over; with one enabled every later round
//! uses it; with neither the run ends after round 0.

use factorforge_common::EvolutionPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSchedule {
    max_rounds: u32,
    mutation: bool,
    crossover: bool,
}

impl RoundSchedule {
    pub fn new(max_rounds: u32, mutation: bool, crossover: bool) -> Self {
        Self {
            max_rounds,
            mutation,
            crossover,
        }
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Phase of `round`, or `None` once the run is terminal
    pub fn phase_for(&self, round: u32) -> Option<EvolutionPhase> {
        if round >= self.max_rounds {
            return None;
        }
        if round == 0 {
            return Some(EvolutionPhase::Original);
        }
        match (self.mutation, self.crossover) {
            (true, true) if round % 2 == 1 => Some(EvolutionPhase::Mutation),
            (true, true) => Some(EvolutionPhase::Crossover),
            (true, false) => Some(EvolutionPhase::Mutation),
            (false, true) => Some(EvolutionPhase::Crossover),
            (false, false) => None,
        }
    }

    /// Every scheduled round with its phase
    pub fn rounds(&self) -> impl Iterator<Item = (u32, EvolutionPhase)> + '_ {
        (0..self.max_rounds).map_while(move |round| self.phase_for(round).map(|p| (round, p)))
    }
}
