//! The simulation handle contract consumed by workers.
//!
//! A worker only ever talks to a [`SimulationHandle`]: a name-keyed dispatch
//! table of attributes and methods whose inputs and outputs are JSON values.
//! Typed environments implement [`Environment`] and are adapted onto that
//! table by [`EnvHandle`], which forwards an enumerated set of names.
//!
//! # Example
//!
//! ```ignore
//! use envproxy::handle::{EnvFactory, Registry};
//! use envproxy::envs::Counter;
//!
//! let mut registry = Registry::new();
//! registry.register(EnvFactory::environment("counter", || Ok(Counter::new())));
//! ```

mod adapter;
mod error;
mod registry;
mod space;

use serde_json::{Map, Value};

pub use adapter::{EnvHandle, Environment, Step};
pub use error::HandleError;
pub use registry::{EnvFactory, Registry};
pub use space::{DType, Space};

/// A stateful object a worker owns exclusively and drives by name.
///
/// Failures are reported as `anyhow::Error`; the worker formats them with
/// their full cause chain and sends the text back to the controller.
pub trait SimulationHandle: Send {
    /// Read a named attribute.
    fn attribute(&self, name: &str) -> anyhow::Result<Value>;

    /// Invoke a named method.
    fn call(&mut self, method: &str, args: Vec<Value>, kwargs: Map<String, Value>)
        -> anyhow::Result<Value>;

    /// Release resources. Handles without anything to release keep the default.
    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<H: SimulationHandle + ?Sized> SimulationHandle for Box<H> {
    fn attribute(&self, name: &str) -> anyhow::Result<Value> {
        (**self).attribute(name)
    }

    fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> anyhow::Result<Value> {
        (**self).call(method, args, kwargs)
    }

    fn close(&mut self) -> anyhow::Result<()> {
        (**self).close()
    }
}
