//! A deterministic counter environment.

use crate::handle::{DType, Environment, Space, Step};

/// Episode ends once the running total reaches this value.
pub const DONE_THRESHOLD: i64 = 10;

const BOUND: f64 = 1e9;

/// `reset()` → 0; `step(x)` adds `x` to the total, rewards `x`, and is done
/// once the total reaches [`DONE_THRESHOLD`].
#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: i64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> i64 {
        self.value
    }
}

impl Environment for Counter {
    type Observation = i64;
    type Action = i64;

    fn observation_space(&self) -> Space {
        Space::uniform(-BOUND, BOUND, &[], DType::Int64)
    }

    fn action_space(&self) -> Space {
        Space::uniform(-BOUND, BOUND, &[], DType::Int64)
    }

    fn reset(&mut self) -> anyhow::Result<i64> {
        self.value = 0;
        Ok(self.value)
    }

    fn step(&mut self, action: i64) -> anyhow::Result<Step<i64>> {
        self.value += action;
        Ok(Step::new(
            self.value,
            action as f64,
            self.value >= DONE_THRESHOLD,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_episode() {
        let mut env = Counter::new();
        assert_eq!(env.reset().unwrap(), 0);

        let outcomes: Vec<_> = [3, 4, 5].into_iter().map(|a| env.step(a).unwrap()).collect();
        assert_eq!(outcomes[0], Step::new(3, 3.0, false));
        assert_eq!(outcomes[1], Step::new(7, 4.0, false));
        assert_eq!(outcomes[2], Step::new(12, 5.0, true));
        assert_eq!(env.value(), 12);
    }

    #[test]
    fn test_scalar_spaces() {
        let env = Counter::new();
        assert_eq!(env.observation_space().flat_len(), Some(1));
        assert_eq!(env.action_space(), env.observation_space());
    }
}
