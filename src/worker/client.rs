//! Caller-facing proxy over an environment worker.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::process::Child;
use tokio::runtime;
use tracing::{debug, info, warn};

use super::channel::{self, Endpoint};
use super::error::{WorkerError, WorkerResult};
use super::protocol::{attributes, methods, Message};
use super::server::{guarded, Interrupt, Worker, WorkerExit, POLL_INTERVAL};
use super::strategy::{ExecutionStrategy, WorkerCommand};
use crate::config::Settings;
use crate::handle::{EnvFactory, SimulationHandle};

/// Proxy that exposes one environment, wherever it runs, to a single caller.
///
/// Requests are strictly one at a time: every `Access` or `Call` must be
/// answered before the next one goes out. A deferred call hands back a
/// [`Promise`] that mutably borrows the proxy until it is resolved.
///
/// Call [`close`](Self::close) when done. Dropping an open proxy is a last
/// resort: it asks the worker to stop and kills a worker process outright.
///
/// # Example
///
/// ```ignore
/// use envproxy::worker::{EnvProxy, ExecutionStrategy};
///
/// let mut proxy = EnvProxy::spawn(factory, ExecutionStrategy::SharedProcess).await?;
/// let obs = proxy.reset().await?;
/// let pending = proxy.step_deferred(3)?;
/// // ... unrelated local work ...
/// let step = pending.resolve().await?;
/// proxy.close().await?;
/// ```
pub struct EnvProxy {
    env: String,
    strategy: ExecutionStrategy,
    backend: Backend,
    observation_space: Option<Value>,
    action_space: Option<Value>,
    closed: bool,
}

enum Backend {
    Inline(Box<dyn SimulationHandle>),
    Worker(WorkerLink),
}

/// Controller side of a running worker.
struct WorkerLink {
    endpoint: Endpoint,
    context: ExecutionContext,
    /// A request has been sent and its response not yet received.
    awaiting: bool,
}

/// The execution context a worker loop runs on.
enum ExecutionContext {
    /// A dedicated OS thread in this process, so slow handle code never
    /// stalls the caller's runtime or other workers.
    Thread {
        thread: Option<JoinHandle<WorkerExit>>,
        interrupt: Interrupt,
    },
    Process {
        child: Child,
    },
}

impl EnvProxy {
    /// Start `factory` under `strategy`.
    ///
    /// Isolated workers re-run the current executable, which must dispatch
    /// the `worker` subcommand (see [`serve_stdio`](super::serve_stdio)) and
    /// rebuild the factory by name. Only factories taken from a
    /// [`Registry`](crate::handle::Registry) qualify; any other fails with
    /// [`WorkerError::Unregistered`].
    pub async fn spawn(factory: EnvFactory, strategy: ExecutionStrategy) -> WorkerResult<Self> {
        let command = match strategy {
            ExecutionStrategy::IsolatedProcess => Some(WorkerCommand::current_exe()?),
            _ => None,
        };
        Self::start(factory, strategy, command, POLL_INTERVAL)
    }

    /// Start `factory` in an isolated process launched by `command`.
    ///
    /// `factory` must come from the registry `command` serves.
    pub async fn spawn_with_command(
        factory: EnvFactory,
        command: WorkerCommand,
    ) -> WorkerResult<Self> {
        Self::start(
            factory,
            ExecutionStrategy::IsolatedProcess,
            Some(command),
            POLL_INTERVAL,
        )
    }

    /// Start `factory` with strategy, worker program and poll interval taken
    /// from settings.
    pub async fn spawn_with_settings(factory: EnvFactory, settings: &Settings) -> WorkerResult<Self> {
        let strategy = settings.worker.strategy;
        let command = match strategy {
            ExecutionStrategy::IsolatedProcess => Some(match settings.worker_command()? {
                Some(command) => command,
                None => WorkerCommand::current_exe()?,
            }),
            _ => None,
        };
        Self::start(factory, strategy, command, settings.worker.poll_interval())
    }

    fn start(
        factory: EnvFactory,
        strategy: ExecutionStrategy,
        command: Option<WorkerCommand>,
        poll_interval: Duration,
    ) -> WorkerResult<Self> {
        let env = factory.name().to_string();

        if strategy == ExecutionStrategy::IsolatedProcess && !factory.is_registered() {
            return Err(WorkerError::Unregistered(env));
        }

        let backend = match (strategy, command) {
            (ExecutionStrategy::Inline, _) => {
                let handle = guarded(|| factory.build()).map_err(WorkerError::Factory)?;
                Backend::Inline(handle)
            }
            (ExecutionStrategy::SharedProcess, _) => {
                let (endpoint, worker_side) = channel::duplex();
                let interrupt = Interrupt::new();
                let worker = Worker::new(factory, worker_side)
                    .interrupt(interrupt.clone())
                    .poll_interval(poll_interval);

                // The worker polls with a timeout, so it gets its own timer.
                let rt = runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .map_err(WorkerError::SpawnFailed)?;
                let thread = thread::Builder::new()
                    .name(format!("envproxy-{}", env))
                    .spawn(move || rt.block_on(worker.run()))
                    .map_err(WorkerError::SpawnFailed)?;
                debug!(env = %env, "spawned environment worker thread");

                Backend::Worker(WorkerLink::new(
                    endpoint,
                    ExecutionContext::Thread {
                        thread: Some(thread),
                        interrupt,
                    },
                ))
            }
            (ExecutionStrategy::IsolatedProcess, command) => {
                let command = match command {
                    Some(command) => command,
                    None => WorkerCommand::current_exe()?,
                };
                let mut child = command
                    .command(&env, poll_interval)
                    .spawn()
                    .map_err(WorkerError::SpawnFailed)?;

                let stdin = child.stdin.take().ok_or_else(|| not_captured("stdin"))?;
                let stdout = child.stdout.take().ok_or_else(|| not_captured("stdout"))?;
                debug!(env = %env, pid = ?child.id(), "spawned environment worker process");

                Backend::Worker(WorkerLink::new(
                    Endpoint::over_stream(stdout, stdin),
                    ExecutionContext::Process { child },
                ))
            }
        };

        info!(env = %env, strategy = %strategy, "environment proxy started");
        Ok(Self {
            env,
            strategy,
            backend,
            observation_space: None,
            action_space: None,
            closed: false,
        })
    }

    /// Name of the proxied environment.
    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the worker's execution context is still running.
    ///
    /// Inline proxies are alive until closed.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.backend {
            Backend::Inline(_) => !self.closed,
            Backend::Worker(link) => link.context.is_running(),
        }
    }

    /// Whether a deferred call is still waiting to be resolved.
    pub fn is_awaiting(&self) -> bool {
        matches!(&self.backend, Backend::Worker(link) if link.awaiting)
    }

    /// OS process id of an isolated worker.
    pub fn worker_pid(&self) -> Option<u32> {
        match &self.backend {
            Backend::Worker(WorkerLink {
                context: ExecutionContext::Process { child },
                ..
            }) => child.id(),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    /// Read a named attribute of the environment.
    pub async fn get_attribute(&mut self, name: &str) -> WorkerResult<Value> {
        self.ensure_open()?;
        match &mut self.backend {
            Backend::Inline(handle) => guarded(|| handle.attribute(name)).map_err(WorkerError::raised),
            Backend::Worker(link) => {
                link.issue(Message::Access(name.to_string()))?;
                link.receive().await
            }
        }
    }

    /// Observation space, read once and cached.
    pub async fn observation_space(&mut self) -> WorkerResult<Value> {
        if let Some(space) = &self.observation_space {
            return Ok(space.clone());
        }
        let space = self.get_attribute(attributes::OBSERVATION_SPACE).await?;
        self.observation_space = Some(space.clone());
        Ok(space)
    }

    /// Action space, read once and cached.
    pub async fn action_space(&mut self) -> WorkerResult<Value> {
        if let Some(space) = &self.action_space {
            return Ok(space.clone());
        }
        let space = self.get_attribute(attributes::ACTION_SPACE).await?;
        self.action_space = Some(space.clone());
        Ok(space)
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    /// Invoke a method and wait for its result.
    pub async fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> WorkerResult<Value> {
        self.call_deferred(method, args, kwargs)?.resolve().await
    }

    /// Invoke a method and deserialize its result.
    pub async fn call_as<R: DeserializeOwned>(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> WorkerResult<R> {
        self.call_deferred(method, args, kwargs)?.resolve_as().await
    }

    /// Send a call without waiting for its result.
    ///
    /// Inline proxies run the call right away and return a resolved promise.
    pub fn call_deferred(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> WorkerResult<Promise<'_>> {
        self.ensure_open()?;
        match &mut self.backend {
            Backend::Inline(handle) => {
                let outcome =
                    guarded(|| handle.call(method, args, kwargs)).map_err(WorkerError::raised);
                Ok(Promise::ready(outcome))
            }
            Backend::Worker(link) => {
                link.issue(Message::call(method, args, kwargs))?;
                Ok(Promise::pending(link))
            }
        }
    }

    /// Advance the environment by one action.
    pub async fn step<A: Serialize>(&mut self, action: A) -> WorkerResult<Value> {
        self.step_deferred(action)?.resolve().await
    }

    pub fn step_deferred<A: Serialize>(&mut self, action: A) -> WorkerResult<Promise<'_>> {
        let action = serde_json::to_value(action).map_err(WorkerError::SerializeFailed)?;
        self.call_deferred(methods::STEP, vec![action], Map::new())
    }

    /// Start a new episode.
    pub async fn reset(&mut self) -> WorkerResult<Value> {
        self.reset_deferred()?.resolve().await
    }

    pub fn reset_deferred(&mut self) -> WorkerResult<Promise<'_>> {
        self.call_deferred(methods::RESET, Vec::new(), Map::new())
    }

    pub async fn render(&mut self) -> WorkerResult<Value> {
        self.call(methods::RENDER, Vec::new(), Map::new()).await
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Stop the worker and wait for its execution context to finish.
    ///
    /// Safe to call repeatedly and after the worker crashed.
    pub async fn close(&mut self) -> WorkerResult<()> {
        match &mut self.backend {
            Backend::Inline(handle) => {
                if !self.closed {
                    if let Err(trace) = guarded(|| handle.close()) {
                        debug!(env = %self.env, "environment close failed: {}", trace);
                    }
                }
            }
            Backend::Worker(link) => {
                if !self.closed {
                    if let Err(err) = link.endpoint.send(Message::Close) {
                        // The connection was already closed.
                        debug!(env = %self.env, error = %err, "worker channel already closed");
                    }
                }
                link.endpoint.close().await;
                link.context.join().await?;
            }
        }

        if !self.closed {
            info!(env = %self.env, "environment proxy closed");
        }
        self.closed = true;
        Ok(())
    }

    /// Stop the worker's execution context without asking it to stop.
    ///
    /// A worker process is killed. A worker thread cannot be killed; it is
    /// interrupted and leaves its loop at the next poll tick, so a handle
    /// call that never returns keeps this waiting. Any later request fails
    /// with [`WorkerError::WorkerCrashed`].
    pub async fn terminate(&mut self) -> WorkerResult<()> {
        match &mut self.backend {
            Backend::Inline(_) => {
                debug!(env = %self.env, "inline proxy has no worker to terminate");
                Ok(())
            }
            Backend::Worker(link) => {
                warn!(env = %self.env, "terminating environment worker");
                link.context.kill().await
            }
        }
    }

    fn ensure_open(&self) -> WorkerResult<()> {
        if self.closed {
            Err(WorkerError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for EnvProxy {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Backend::Worker(link) = &mut self.backend {
            debug!(env = %self.env, "environment proxy dropped without close");
            let _ = link.endpoint.send(Message::Close);
        }
    }
}

impl WorkerLink {
    fn new(endpoint: Endpoint, context: ExecutionContext) -> Self {
        Self {
            endpoint,
            context,
            awaiting: false,
        }
    }

    /// Send a request, enforcing one outstanding request at a time.
    fn issue(&mut self, message: Message) -> WorkerResult<()> {
        if self.awaiting {
            return Err(WorkerError::RequestOutstanding);
        }
        match self.endpoint.send(message) {
            Ok(()) => {}
            // A worker that raised may hang up before we ask again. Its
            // exception is still queued, and receive reports it first.
            Err(WorkerError::ChannelClosed) => debug!("worker hung up before the request"),
            Err(err) => return Err(err),
        }
        self.awaiting = true;
        Ok(())
    }

    /// Receive exactly one response.
    async fn receive(&mut self) -> WorkerResult<Value> {
        let inbound = self.endpoint.recv().await;
        self.awaiting = false;

        match inbound {
            None => {
                warn!("environment worker crashed");
                Err(WorkerError::WorkerCrashed)
            }
            Some(Err(err)) => Err(err),
            Some(Ok(Message::Result(value))) => Ok(value),
            // Re-raise exceptions from the worker.
            Some(Ok(Message::Exception(trace))) => Err(WorkerError::Raised { trace }),
            Some(Ok(other)) => Err(WorkerError::unexpected(other.kind())),
        }
    }
}

impl ExecutionContext {
    fn is_running(&mut self) -> bool {
        match self {
            ExecutionContext::Thread { thread, .. } => {
                thread.as_ref().is_some_and(|thread| !thread.is_finished())
            }
            ExecutionContext::Process { child } => matches!(child.try_wait(), Ok(None)),
        }
    }

    /// Wait for the execution context to finish.
    async fn join(&mut self) -> WorkerResult<()> {
        match self {
            ExecutionContext::Thread { thread, .. } => {
                if let Some(thread) = thread.take() {
                    // Joining blocks, so keep it off the caller's runtime.
                    match tokio::task::spawn_blocking(move || thread.join()).await {
                        Ok(Ok(exit)) => debug!(exit = ?exit, "worker thread finished"),
                        Ok(Err(_)) => warn!("worker thread panicked"),
                        Err(e) => {
                            return Err(WorkerError::JoinFailed(std::io::Error::other(e)));
                        }
                    }
                }
                Ok(())
            }
            ExecutionContext::Process { child } => {
                let status = child.wait().await.map_err(WorkerError::JoinFailed)?;
                debug!(status = %status, "worker process exited");
                Ok(())
            }
        }
    }

    async fn kill(&mut self) -> WorkerResult<()> {
        match self {
            ExecutionContext::Thread { interrupt, .. } => {
                interrupt.trigger();
                self.join().await
            }
            ExecutionContext::Process { child } => {
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "worker process already gone");
                }
                self.join().await
            }
        }
    }
}

fn not_captured(stream: &str) -> WorkerError {
    WorkerError::SpawnFailed(std::io::Error::other(format!(
        "worker {} not captured",
        stream
    )))
}

// ============================================================================
// Promise
// ============================================================================

/// The not-yet-received result of a deferred call.
///
/// Resolving consumes the promise, so it can be resolved at most once. While
/// it exists the proxy cannot issue another request. Dropping it unresolved
/// leaves the response in flight; the proxy then rejects further requests
/// with [`WorkerError::RequestOutstanding`].
#[must_use = "the proxy accepts no further requests until this promise is resolved"]
pub struct Promise<'a> {
    state: PromiseState<'a>,
}

enum PromiseState<'a> {
    Ready(WorkerResult<Value>),
    Pending(&'a mut WorkerLink),
}

impl<'a> Promise<'a> {
    fn ready(outcome: WorkerResult<Value>) -> Self {
        Self {
            state: PromiseState::Ready(outcome),
        }
    }

    fn pending(link: &'a mut WorkerLink) -> Self {
        Self {
            state: PromiseState::Pending(link),
        }
    }

    /// Whether the result is already available without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, PromiseState::Ready(_))
    }

    /// Wait for the worker's response.
    pub async fn resolve(self) -> WorkerResult<Value> {
        match self.state {
            PromiseState::Ready(outcome) => outcome,
            PromiseState::Pending(link) => link.receive().await,
        }
    }

    /// Wait for the worker's response and deserialize it.
    pub async fn resolve_as<R: DeserializeOwned>(self) -> WorkerResult<R> {
        let value = self.resolve().await?;
        serde_json::from_value(value).map_err(WorkerError::DeserializeFailed)
    }
}
