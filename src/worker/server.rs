//! The worker loop: serves one simulation handle over one endpoint.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::channel::{Endpoint, Polled};
use super::protocol::Message;
use crate::handle::{EnvFactory, SimulationHandle};

/// Default bound on how long the worker waits for a message before looking
/// at its interrupt flag again.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared flag that asks a worker loop to stop at its next poll tick.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The controller sent `Close`.
    Closed,
    /// The controller's endpoint went away.
    Disconnected,
    /// The interrupt flag was raised.
    Interrupted,
    /// The factory or the handle raised; an `Exception` was sent.
    Failed,
    /// A message arrived that a worker never accepts.
    ProtocolViolation,
}

/// A worker loop bound to a factory and the worker side of a channel.
///
/// # Example
///
/// ```ignore
/// let (controller, worker_side) = envproxy::worker::channel::duplex();
/// let task = tokio::spawn(Worker::new(factory, worker_side).run());
/// ```
pub struct Worker {
    factory: EnvFactory,
    endpoint: Endpoint,
    interrupt: Interrupt,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(factory: EnvFactory, endpoint: Endpoint) -> Self {
        Self {
            factory,
            endpoint,
            interrupt: Interrupt::new(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Build the handle, serve messages until a terminal condition, then
    /// close the endpoint.
    pub async fn run(mut self) -> WorkerExit {
        let env = self.factory.name().to_string();
        debug!(env = %env, "environment worker starting");

        let exit = match guarded(|| self.factory.build()) {
            Ok(mut handle) => {
                let exit = self.serve(handle.as_mut()).await;
                if let Err(trace) = guarded(|| handle.close()) {
                    warn!(env = %env, "closing environment failed: {}", trace);
                }
                exit
            }
            Err(trace) => {
                self.report_failure(&env, trace);
                WorkerExit::Failed
            }
        };

        self.endpoint.close().await;
        info!(env = %env, exit = ?exit, "environment worker stopped");
        exit
    }

    async fn serve(&mut self, handle: &mut dyn SimulationHandle) -> WorkerExit {
        let env = self.factory.name().to_string();

        loop {
            if self.interrupt.is_triggered() {
                return WorkerExit::Interrupted;
            }

            // Only block for short times so the interrupt flag is honoured.
            let message = match self.endpoint.recv_timeout(self.poll_interval).await {
                Polled::Idle => continue,
                Polled::Disconnected => return WorkerExit::Disconnected,
                Polled::Ready(Ok(message)) => message,
                Polled::Ready(Err(err)) => {
                    self.report_failure(&env, err.to_string());
                    return WorkerExit::ProtocolViolation;
                }
            };

            let outcome = match message {
                Message::Access(name) => guarded(|| handle.attribute(&name)),
                Message::Call(call) => guarded(|| handle.call(&call.method, call.args, call.kwargs)),
                Message::Close => return WorkerExit::Closed,
                other => {
                    self.report_failure(
                        &env,
                        format!("received message of unknown type `{}`", other.kind()),
                    );
                    return WorkerExit::ProtocolViolation;
                }
            };

            match outcome {
                Ok(value) => {
                    if self.endpoint.send(Message::Result(value)).is_err() {
                        return WorkerExit::Disconnected;
                    }
                }
                Err(trace) => {
                    self.report_failure(&env, trace);
                    return WorkerExit::Failed;
                }
            }
        }
    }

    fn report_failure(&self, env: &str, trace: String) {
        error!(env = %env, "error in environment worker: {}", trace);
        if let Err(err) = self.endpoint.send(Message::Exception(trace)) {
            debug!(env = %env, error = %err, "could not deliver exception");
        }
    }
}

/// Serve `factory` over this process's stdin/stdout.
///
/// This is the body of an isolated worker process. Ctrl-C raises the
/// interrupt flag, so the loop exits within one poll interval.
pub async fn serve_stdio(factory: EnvFactory, poll_interval: Duration) -> WorkerExit {
    let endpoint = Endpoint::over_stream(tokio::io::stdin(), tokio::io::stdout());
    let interrupt = Interrupt::new();

    let on_ctrl_c = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.trigger();
            }
        })
    };

    let exit = Worker::new(factory, endpoint)
        .interrupt(interrupt)
        .poll_interval(poll_interval)
        .run()
        .await;

    on_ctrl_c.abort();
    exit
}

/// Run handle code, turning both errors and panics into a formatted trace.
pub(crate) fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{:?}", err)),
        Err(payload) => Err(panic_message(payload)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    };
    format!("panicked: {}", detail)
}
