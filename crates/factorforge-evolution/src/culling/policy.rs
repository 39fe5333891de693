//! Exhaustion policy: a trajectory is retired only once no viable parent
//! remains. Rounds without an admission are tracked but never retire a
//! trajectory that still has a head to evolve from.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExhaustionPolicy;

impl ExhaustionPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn should_exhaust(&self, has_viable_head: bool) -> bool {
        !has_viable_head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion() {
        let policy = ExhaustionPolicy::new();
        assert!(policy.should_exhaust(false));
        assert!(!policy.should_exhaust(true));
    }
}
