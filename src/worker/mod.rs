//! Worker proxy: run an environment on a separate execution context.
//!
//! An [`EnvProxy`] turns attribute reads and method calls into protocol
//! messages, and a [`Worker`] loop on the other end of a duplex channel turns
//! them back into operations on one exclusively owned simulation handle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Caller (Rust + Tokio)                      │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                   EnvProxy (Supervisor)                   │  │
//! │  │  - caches observation_space / action_space                │  │
//! │  │  - one outstanding request, deferred calls → Promise      │  │
//! │  │  - close(): Close, drop endpoint, join worker             │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │        Access / Call / Close │ Result / Exception               │
//! │                              ▼                                  │
//! └─────────────────────────────────────────────────────────────────┘
//!          │ inline             │ in-memory queue     │ stdin/stdout (NDJSON)
//!          ▼                    ▼                     ▼
//!   handle called        Worker on a Tokio     Worker in a child process
//!   directly             task (shared memory)  (crash isolated)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use envproxy::envs::builtin_registry;
//! use envproxy::worker::{EnvProxy, ExecutionStrategy};
//!
//! let factory = builtin_registry().get("counter")?;
//! let mut proxy = EnvProxy::spawn(factory, ExecutionStrategy::IsolatedProcess).await?;
//!
//! proxy.reset().await?;
//! let step = proxy.step(3).await?;
//!
//! proxy.close().await?;
//! ```

pub mod channel;
mod client;
mod error;
pub mod protocol;
mod server;
mod strategy;

pub use client::{EnvProxy, Promise};
pub use error::{WorkerError, WorkerResult};
pub use server::{serve_stdio, Interrupt, Worker, WorkerExit, POLL_INTERVAL};
pub use strategy::{ExecutionStrategy, WorkerCommand};
