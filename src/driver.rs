//! Instrument driver front end.
//!
//! One [`InstrumentDriver`] task is the single point of communication with
//! one instrument: it owns the transport (through its executor) and
//! processes request envelopes strictly one at a time, which serializes all
//! hardware access. Concurrent callers hold a cloneable [`DriverHandle`] and
//! block on the reply — a request travels over an mpsc channel and the reply
//! comes back on a oneshot embedded in the request, so there is no shared
//! mutable response field and no polling.
//!
//! It is up to the deployment to make sure only one driver instance per
//! physical instrument is ever running.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{CommandExecutor, CommandRegistry, ExecutorConfig};
use crate::error::{ControlError, ControlResult};
use crate::protocol::{unix_now, CommandResult, Method, Reply, Request};
use crate::transport::Transport;

/// Capacity of the request channel; senders beyond this queue up.
const REQUEST_CHANNEL_CAPACITY: usize = 32;

struct DriverRequest {
    request: Request,
    reply: oneshot::Sender<Reply>,
}

/// Cloneable handle for submitting envelopes to a driver task.
#[derive(Clone)]
pub struct DriverHandle {
    queue: String,
    tx: mpsc::Sender<DriverRequest>,
}

impl DriverHandle {
    /// The queue name this handle is addressed to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Sends a request envelope and blocks until the reply envelope arrives.
    pub async fn send(&self, request: Request) -> ControlResult<Reply> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(DriverRequest { request, reply: tx })
            .await
            .map_err(|_| ControlError::ChannelClosed)?;
        rx.await.map_err(|_| ControlError::ChannelClosed)
    }

    /// Sends a single query instruction and returns its result envelope.
    pub async fn query_line(&self, line: &str) -> ControlResult<CommandResult> {
        let mut reply = self.send(Request::query(line)).await?;
        if reply.result.is_empty() {
            let error = reply
                .first_error()
                .unwrap_or("Empty reply envelope")
                .to_string();
            return Err(ControlError::Transport(error));
        }
        Ok(reply.result.remove(0))
    }

    /// Sends a single write instruction and returns its result envelope.
    pub async fn write_line(&self, line: &str) -> ControlResult<CommandResult> {
        let mut reply = self.send(Request::write(line)).await?;
        if reply.result.is_empty() {
            let error = reply
                .first_error()
                .unwrap_or("Empty reply envelope")
                .to_string();
            return Err(ControlError::Transport(error));
        }
        Ok(reply.result.remove(0))
    }
}

/// The single-threaded serializer owning one instrument's executor.
pub struct InstrumentDriver<T: Transport> {
    queue: String,
    executor: CommandExecutor<T>,
    rx: mpsc::Receiver<DriverRequest>,
}

impl<T: Transport + 'static> InstrumentDriver<T> {
    /// Spawns the driver task and returns its handle.
    pub fn spawn(
        queue: impl Into<String>,
        registry: CommandRegistry,
        transport: T,
        config: ExecutorConfig,
    ) -> (DriverHandle, JoinHandle<()>) {
        let queue = queue.into();
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let driver = InstrumentDriver {
            queue: queue.clone(),
            executor: CommandExecutor::new(registry, transport, config),
            rx,
        };
        let task = tokio::spawn(driver.run());
        (DriverHandle { queue, tx }, task)
    }

    async fn run(mut self) {
        info!(queue = %self.queue, "Driver started");
        while let Some(DriverRequest { request, reply }) = self.rx.recv().await {
            debug!(queue = %self.queue, method = %request.method, cmd = %request.cmd, "Received envelope");
            let response = self.process(&request).await;
            if reply.send(response).is_err() {
                warn!(queue = %self.queue, "Caller went away before the reply was ready");
            }
        }
        info!(queue = %self.queue, "Driver stopped");
    }

    /// Processes one request envelope into one reply envelope. Never fails:
    /// every problem ends up in the envelope's error fields.
    async fn process(&mut self, request: &Request) -> Reply {
        let t0 = unix_now();

        let method = match Method::parse(&request.method) {
            Ok(method) => method,
            Err(error) => {
                warn!(queue = %self.queue, %error, "Rejected envelope");
                return Reply::rejected(t0, error);
            }
        };

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for line in request.cmd.split(';') {
            let outcome = match method {
                Method::Read => self.executor.read_raw().await,
                Method::Write | Method::Query => self.executor.execute_line(line).await,
            };
            errors.push(outcome.error.clone());
            results.push(outcome);
        }

        Reply {
            t0,
            t1: unix_now(),
            result: results,
            error: errors,
        }
    }
}
