//! Named zero-argument factories.
//!
//! An isolated worker process cannot receive a closure, so factories are
//! registered under a name that both sides of the process boundary know.
//! Only a factory handed out by [`Registry::get`] carries that promise; an
//! ad hoc factory can run inline or on a shared worker, never in a child.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::adapter::{EnvHandle, Environment};
use super::SimulationHandle;
use crate::worker::{WorkerError, WorkerResult};

type BuildFn = dyn Fn() -> anyhow::Result<Box<dyn SimulationHandle>> + Send + Sync;

/// A named, zero-argument constructor for a simulation handle.
#[derive(Clone)]
pub struct EnvFactory {
    name: String,
    build: Arc<BuildFn>,
    registered: bool,
}

impl EnvFactory {
    /// Wrap a constructor of a raw [`SimulationHandle`].
    pub fn new<F, H>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> anyhow::Result<H> + Send + Sync + 'static,
        H: SimulationHandle + 'static,
    {
        Self {
            name: name.into(),
            build: Arc::new(move || {
                let handle = build()?;
                Ok(Box::new(handle) as Box<dyn SimulationHandle>)
            }),
            registered: false,
        }
    }

    /// Wrap a constructor of a typed [`Environment`].
    pub fn environment<F, E>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> anyhow::Result<E> + Send + Sync + 'static,
        E: Environment + 'static,
    {
        Self::new(name, move || build().map(EnvHandle::new))
    }

    /// A factory whose every build fails with `reason`.
    ///
    /// Lets a worker that cannot resolve its environment still answer the
    /// first request with an exception instead of silently exiting.
    pub fn failing(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        let reason = reason.to_string();
        Self {
            name: name.into(),
            build: Arc::new(move || Err(anyhow::anyhow!("{}", reason))),
            registered: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this factory was looked up by name in a [`Registry`], so a
    /// worker program serving that registry can rebuild it.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Construct a fresh handle.
    pub fn build(&self) -> anyhow::Result<Box<dyn SimulationHandle>> {
        (self.build)()
    }
}

impl fmt::Debug for EnvFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvFactory")
            .field("name", &self.name)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

/// Factories keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, EnvFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any earlier one with the same name.
    pub fn register(&mut self, factory: EnvFactory) -> &mut Self {
        self.factories.insert(factory.name.clone(), factory);
        self
    }

    pub fn get(&self, name: &str) -> WorkerResult<EnvFactory> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| WorkerError::UnknownEnvironment(name.to_string()))?;
        Ok(EnvFactory {
            registered: true,
            ..factory.clone()
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    struct Constant(i64);

    impl SimulationHandle for Constant {
        fn attribute(&self, _name: &str) -> anyhow::Result<Value> {
            Ok(json!(self.0))
        }

        fn call(&mut self, _method: &str, _args: Vec<Value>, _kwargs: Map<String, Value>)
            -> anyhow::Result<Value> {
            Ok(json!(self.0))
        }
    }

    #[test]
    fn test_factory_builds_fresh_handles() {
        let factory = EnvFactory::new("constant", || Ok(Constant(7)));
        let a = factory.build().unwrap();
        let b = factory.build().unwrap();
        assert_eq!(a.attribute("x").unwrap(), json!(7));
        assert_eq!(b.attribute("y").unwrap(), json!(7));
        assert_eq!(factory.name(), "constant");
        assert!(format!("{:?}", factory).contains("constant"));
    }

    #[test]
    fn test_factory_failure_is_returned() {
        let factory = EnvFactory::new("broken", || -> anyhow::Result<Constant> {
            anyhow::bail!("simulator missing")
        });
        let err = factory.build().err().unwrap();
        assert_eq!(err.to_string(), "simulator missing");
    }

    #[test]
    fn test_failing_factory() {
        let factory = EnvFactory::failing("ghost", WorkerError::UnknownEnvironment("ghost".into()));
        let err = factory.build().err().unwrap();
        assert!(err.to_string().contains("ghost"));
        assert_eq!(factory.name(), "ghost");
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = Registry::new();
        registry
            .register(EnvFactory::new("b", || Ok(Constant(2))))
            .register(EnvFactory::new("a", || Ok(Constant(1))));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(registry.get("b").unwrap().name(), "b");
        assert!(matches!(
            registry.get("c"),
            Err(WorkerError::UnknownEnvironment(name)) if name == "c"
        ));
    }

    #[test]
    fn test_only_looked_up_factories_are_registered() {
        let ad_hoc = EnvFactory::new("a", || Ok(Constant(1)));
        assert!(!ad_hoc.is_registered());

        let mut registry = Registry::new();
        registry.register(ad_hoc.clone());
        assert!(registry.get("a").unwrap().is_registered());
        assert!(!ad_hoc.is_registered());
    }
}
