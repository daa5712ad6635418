//! Environments that fail on purpose, for exercising worker failure paths.

use serde_json::{Map, Value};

use super::counter::Counter;
use crate::handle::{EnvHandle, Environment, HandleError, SimulationHandle, Space, Step};

/// A counter whose `step` raises a value error on one chosen step.
#[derive(Debug, Clone)]
pub struct Faulty {
    inner: Counter,
    steps: usize,
    fail_on: usize,
}

impl Faulty {
    /// Fail on the `fail_on`-th step (1-based) since construction.
    pub fn new(fail_on: usize) -> Self {
        Self {
            inner: Counter::new(),
            steps: 0,
            fail_on,
        }
    }
}

impl Environment for Faulty {
    type Observation = i64;
    type Action = i64;

    fn observation_space(&self) -> Space {
        self.inner.observation_space()
    }

    fn action_space(&self) -> Space {
        self.inner.action_space()
    }

    fn reset(&mut self) -> anyhow::Result<i64> {
        self.inner.reset()
    }

    fn step(&mut self, action: i64) -> anyhow::Result<Step<i64>> {
        self.steps += 1;
        if self.steps == self.fail_on {
            return Err(HandleError::Value(format!(
                "invalid action {} on step {}",
                action, self.steps
            ))
            .into());
        }
        self.inner.step(action)
    }
}

/// Factory body that always fails, like a simulator that cannot start.
pub fn broken() -> anyhow::Result<Counter> {
    anyhow::bail!("simulator failed to initialise: no physics backend available")
}

/// A counter with an extra `abort` method that kills the hosting process.
///
/// Only meaningful in an isolated worker, where it stands in for a native
/// crash. Run inline or on a shared task it takes the caller down with it.
pub struct Crashing {
    inner: EnvHandle<Counter>,
}

impl Crashing {
    pub const ABORT: &'static str = "abort";

    pub fn new() -> Self {
        Self {
            inner: EnvHandle::new(Counter::new()),
        }
    }
}

impl Default for Crashing {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationHandle for Crashing {
    fn attribute(&self, name: &str) -> anyhow::Result<Value> {
        self.inner.attribute(name)
    }

    fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> anyhow::Result<Value> {
        if method == Self::ABORT {
            std::process::abort();
        }
        self.inner.call(method, args, kwargs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faulty_fails_on_chosen_step() {
        let mut env = Faulty::new(2);
        env.reset().unwrap();
        assert_eq!(env.step(1).unwrap().observation, 1);

        let err = env.step(5).unwrap_err();
        assert_eq!(err.to_string(), "ValueError: invalid action 5 on step 2");
        assert_eq!(env.step(1).unwrap().observation, 2);
    }

    #[test]
    fn test_broken_factory() {
        let err = broken().unwrap_err();
        assert!(err.to_string().contains("failed to initialise"));
    }

    #[test]
    fn test_crashing_delegates_regular_calls() {
        let mut handle = Crashing::new();
        assert_eq!(handle.call("reset", vec![], Map::new()).unwrap(), Value::from(0));
        assert!(handle.attribute("action_space").is_ok());
    }
}
