//! # envproxy
//!
//! Run a stateful simulation environment on a separate execution context and
//! drive it through a proxy that looks like the environment itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Caller (training loop)                  │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [worker::EnvProxy]
//! ┌─────────────────────────────────────────────────────────┐
//! │      Protocol messages: Access / Call / Close and       │
//! │      Result / Exception, one request at a time          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [worker::channel]
//! ┌─────────────────────────────────────────────────────────┐
//! │   inline call  |  in-memory queue  |  stdio (NDJSON)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [worker::Worker]
//! ┌─────────────────────────────────────────────────────────┐
//! │     handle::SimulationHandle built by an EnvFactory     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`worker`]: proxy, worker loop, protocol, channels and strategies
//! - [`handle`]: the handle contract, typed environments and the registry
//! - [`envs`]: built-in environments served by the `envproxy` binary
//! - [`config`]: settings file and logging setup

pub mod config;
pub mod envs;
pub mod handle;
pub mod worker;

pub use handle::{EnvFactory, Environment, Registry, SimulationHandle};
pub use worker::{EnvProxy, ExecutionStrategy, WorkerError, WorkerResult};
