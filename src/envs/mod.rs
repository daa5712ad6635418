//! Built-in environments.
//!
//! These are served by the `envproxy worker` subcommand and drive the CLI and
//! the integration tests.

mod counter;
mod faulty;

pub use counter::{Counter, DONE_THRESHOLD};
pub use faulty::{broken, Crashing, Faulty};

use crate::handle::{EnvFactory, Registry};

/// Step on which the registered `faulty` environment raises.
pub const FAULTY_STEP: usize = 3;

/// Registry of every built-in environment.
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(EnvFactory::environment("counter", || Ok(Counter::new())))
        .register(EnvFactory::environment("faulty", || Ok(Faulty::new(FAULTY_STEP))))
        .register(EnvFactory::environment("broken", broken))
        .register(EnvFactory::new("crashing", || Ok(Crashing::new())));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let registry = builtin_registry();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["broken", "counter", "crashing", "faulty"]
        );
    }

    #[test]
    fn test_broken_factory_fails_to_build() {
        let registry = builtin_registry();
        assert!(registry.get("broken").unwrap().build().is_err());
        assert!(registry.get("counter").unwrap().build().is_ok());
    }
}
