//! Dispatch channel between the host and worker contexts.
//!
//! The dispatch core is a tokio task that owns every worker handle and the
//! table of calls awaiting a response. Host code talks to it through a
//! cloneable [`DispatchHandle`]; workers talk to it through [`WorkerEvent`]s.
//!
//! Calls are correlated by a per-call id, so responses may arrive in any
//! order. A call that times out is abandoned: its record is dropped and a late
//! response for it is ignored.

mod message;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use message::{
    extension_service, CallId, WireError, WireErrorKind, WireMessage, LOAD_EXTENSION_METHOD,
    WORKER_SERVICE,
};

use self::worker::{WorkerEvent, WorkerHandle};
use super::catalog::ExtensionCatalog;
use super::error::{ExtensionError, ExtensionResult};
use super::WorkerId;

/// Configuration for the dispatch channel.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Deadline for a call when none is given explicitly.
    pub call_timeout: Duration,

    /// Maximum number of live workers.
    pub max_workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(5000),
            max_workers: 8,
        }
    }
}

/// Commands sent from handles to the dispatch task.
enum DispatchCommand {
    Spawn {
        reply: oneshot::Sender<ExtensionResult<WorkerId>>,
    },
    Call {
        worker: WorkerId,
        call_id: CallId,
        service: String,
        method: String,
        args: Vec<Value>,
        reply: oneshot::Sender<ExtensionResult<Value>>,
    },
    Post {
        worker: WorkerId,
        service: String,
        method: String,
        args: Vec<Value>,
        reply: oneshot::Sender<ExtensionResult<()>>,
    },
    /// Drop the record of a timed-out call.
    Abandon { call_id: CallId },
    Terminate {
        worker: WorkerId,
        reply: oneshot::Sender<ExtensionResult<()>>,
    },
    PendingCount {
        worker: WorkerId,
        reply: oneshot::Sender<usize>,
    },
    Workers {
        reply: oneshot::Sender<Vec<WorkerId>>,
    },
    Shutdown,
}

/// A call awaiting its response.
struct PendingCall {
    worker: WorkerId,
    method: String,
    reply: oneshot::Sender<ExtensionResult<Value>>,
}

/// Owner of the dispatch task.
///
/// Dropping the channel shuts the task down and closes every worker.
pub struct DispatchChannel {
    handle: DispatchHandle,
    task: Option<JoinHandle<()>>,
}

impl DispatchChannel {
    /// Start the dispatch task. Must be called from within a tokio runtime.
    pub fn start(catalog: ExtensionCatalog, config: DispatchConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let core = DispatchCore {
            catalog,
            max_workers: config.max_workers,
            workers: HashMap::new(),
            pending: HashMap::new(),
            next_worker: 1,
            events: events_tx,
        };
        let task = tokio::spawn(dispatch_loop(core, rx, events_rx));

        Self {
            handle: DispatchHandle {
                tx,
                next_call: Arc::new(AtomicU64::new(1)),
                call_timeout: config.call_timeout,
            },
            task: Some(task),
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Stop the dispatch task and close every worker.
    pub async fn shutdown(&mut self) -> ExtensionResult<()> {
        let _ = self.handle.tx.send(DispatchCommand::Shutdown);
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                ExtensionError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Dispatch task failed: {}", e),
                ))
            })?;
        }
        Ok(())
    }
}

impl Drop for DispatchChannel {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.handle.tx.send(DispatchCommand::Shutdown);
        }
    }
}

/// Cloneable host-side access to the dispatch task.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<DispatchCommand>,
    next_call: Arc<AtomicU64>,
    call_timeout: Duration,
}

impl DispatchHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> DispatchCommand,
    ) -> ExtensionResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| ExtensionError::ChannelClosed)?;
        rx.await.map_err(|_| ExtensionError::ChannelClosed)
    }

    /// Start a new worker and return its id.
    pub async fn spawn_worker(&self) -> ExtensionResult<WorkerId> {
        self.request(|reply| DispatchCommand::Spawn { reply }).await?
    }

    /// Call `service.method` on a worker with the default deadline.
    pub async fn call(
        &self,
        worker: WorkerId,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> ExtensionResult<Value> {
        self.call_with_timeout(worker, service, method, args, self.call_timeout)
            .await
    }

    /// Call `service.method` on a worker, failing with `WorkerCallTimeout`
    /// once `timeout` elapses.
    pub async fn call_with_timeout(
        &self,
        worker: WorkerId,
        service: &str,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> ExtensionResult<Value> {
        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatchCommand::Call {
                worker,
                call_id,
                service: service.to_string(),
                method: method.to_string(),
                args,
                reply,
            })
            .map_err(|_| ExtensionError::ChannelClosed)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ExtensionError::ChannelClosed),
            Err(_) => {
                let _ = self.tx.send(DispatchCommand::Abandon { call_id });
                warn!(worker_id = worker, call_id, method = %method, "Worker call timed out");
                Err(ExtensionError::WorkerCallTimeout {
                    worker,
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send `service.method` to a worker without waiting for a result.
    ///
    /// Fails only if the message cannot be delivered.
    pub async fn post(
        &self,
        worker: WorkerId,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> ExtensionResult<()> {
        self.request(|reply| DispatchCommand::Post {
            worker,
            service: service.to_string(),
            method: method.to_string(),
            args,
            reply,
        })
        .await?
    }

    /// Close a worker. Its pending calls fail with `WorkerTerminated`.
    pub async fn terminate_worker(&self, worker: WorkerId) -> ExtensionResult<()> {
        self.request(|reply| DispatchCommand::Terminate { worker, reply })
            .await?
    }

    /// Number of calls on `worker` still awaiting a response.
    pub async fn pending_calls(&self, worker: WorkerId) -> ExtensionResult<usize> {
        self.request(|reply| DispatchCommand::PendingCount { worker, reply })
            .await
    }

    /// Ids of the live workers, ascending.
    pub async fn workers(&self) -> ExtensionResult<Vec<WorkerId>> {
        self.request(|reply| DispatchCommand::Workers { reply }).await
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

/// State owned by the dispatch task.
struct DispatchCore {
    catalog: ExtensionCatalog,
    max_workers: usize,
    workers: HashMap<WorkerId, WorkerHandle>,
    pending: HashMap<CallId, PendingCall>,
    next_worker: WorkerId,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

async fn dispatch_loop(
    mut core: DispatchCore,
    mut commands: mpsc::UnboundedReceiver<DispatchCommand>,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(DispatchCommand::Shutdown) | None => break,
                Some(command) => core.handle_command(command),
            },
            Some(event) = events.recv() => core.handle_event(event),
        }
    }

    core.close();
}

impl DispatchCore {
    fn handle_command(&mut self, command: DispatchCommand) {
        match command {
            DispatchCommand::Spawn { reply } => {
                let _ = reply.send(self.spawn());
            }

            DispatchCommand::Call {
                worker,
                call_id,
                service,
                method,
                args,
                reply,
            } => {
                let frame = WireMessage::Call {
                    call_id,
                    service,
                    method: method.clone(),
                    args,
                };
                match self.deliver(worker, &frame) {
                    Ok(()) => {
                        debug!(worker_id = worker, call_id, method = %method, "Sent call");
                        self.pending.insert(
                            call_id,
                            PendingCall {
                                worker,
                                method,
                                reply,
                            },
                        );
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            DispatchCommand::Post {
                worker,
                service,
                method,
                args,
                reply,
            } => {
                let frame = WireMessage::Post {
                    service,
                    method,
                    args,
                };
                let _ = reply.send(self.deliver(worker, &frame));
            }

            DispatchCommand::Abandon { call_id } => {
                if self.pending.remove(&call_id).is_some() {
                    debug!(call_id, "Abandoned call");
                }
            }

            DispatchCommand::Terminate { worker, reply } => {
                let result = match self.workers.remove(&worker) {
                    Some(_) => {
                        info!(worker_id = worker, "Terminated worker");
                        self.fail_pending(worker);
                        Ok(())
                    }
                    None => Err(ExtensionError::UnknownWorker(worker)),
                };
                let _ = reply.send(result);
            }

            DispatchCommand::PendingCount { worker, reply } => {
                let count = self.pending.values().filter(|p| p.worker == worker).count();
                let _ = reply.send(count);
            }

            DispatchCommand::Workers { reply } => {
                let mut ids: Vec<WorkerId> = self.workers.keys().copied().collect();
                ids.sort_unstable();
                let _ = reply.send(ids);
            }

            DispatchCommand::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Frame { worker, frame } => match WireMessage::from_frame(&frame) {
                Ok(WireMessage::Response {
                    call_id,
                    result,
                    error,
                    ..
                }) => {
                    let Some(pending) = self.pending.remove(&call_id) else {
                        debug!(worker_id = worker, call_id, "Ignoring response for unknown or abandoned call");
                        return;
                    };
                    let outcome = match error {
                        Some(error) => Err(ExtensionError::WorkerCallError {
                            worker,
                            method: pending.method,
                            kind: error.kind,
                            message: error.message,
                        }),
                        None => Ok(result.unwrap_or(Value::Null)),
                    };
                    let _ = pending.reply.send(outcome);
                }
                Ok(other) => {
                    debug!(worker_id = worker, frame = ?other, "Ignoring non-response frame from worker");
                }
                Err(e) => warn!(worker_id = worker, error = %e, "Malformed frame from worker"),
            },

            WorkerEvent::Exited { worker } => {
                if self.workers.remove(&worker).is_some() {
                    warn!(worker_id = worker, "Worker exited unexpectedly");
                }
                self.fail_pending(worker);
            }
        }
    }

    fn spawn(&mut self) -> ExtensionResult<WorkerId> {
        if self.workers.len() >= self.max_workers {
            return Err(ExtensionError::TooManyWorkers(self.max_workers));
        }
        let id = self.next_worker;
        let handle = worker::spawn(id, self.catalog.clone(), self.events.clone())?;
        self.next_worker += 1;
        self.workers.insert(id, handle);
        Ok(id)
    }

    fn deliver(&self, worker: WorkerId, message: &WireMessage) -> ExtensionResult<()> {
        let handle = self
            .workers
            .get(&worker)
            .ok_or(ExtensionError::UnknownWorker(worker))?;
        if handle.send(message.to_frame()?) {
            Ok(())
        } else {
            Err(ExtensionError::WorkerTerminated(worker))
        }
    }

    /// Fail every pending call on `worker` with `WorkerTerminated`.
    fn fail_pending(&mut self, worker: WorkerId) {
        let ids: Vec<CallId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.worker == worker)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(pending) = self.pending.remove(&id) {
                let _ = pending.reply.send(Err(ExtensionError::WorkerTerminated(worker)));
            }
        }
    }

    fn close(&mut self) {
        info!(workers = self.workers.len(), "Shutting down dispatch channel");
        let workers: Vec<WorkerId> = self.workers.drain().map(|(id, _)| id).collect();
        for worker in workers {
            self.fail_pending(worker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_assigns_increasing_ids() {
        let channel = DispatchChannel::start(ExtensionCatalog::new(), DispatchConfig::default());
        let handle = channel.handle();

        let first = handle.spawn_worker().await.unwrap();
        let second = handle.spawn_worker().await.unwrap();
        assert!(second > first);
        assert_eq!(handle.workers().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_worker_limit() {
        let config = DispatchConfig {
            max_workers: 1,
            ..Default::default()
        };
        let channel = DispatchChannel::start(ExtensionCatalog::new(), config);
        let handle = channel.handle();

        handle.spawn_worker().await.unwrap();
        let err = handle.spawn_worker().await.unwrap_err();
        assert!(matches!(err, ExtensionError::TooManyWorkers(1)));
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let channel = DispatchChannel::start(ExtensionCatalog::new(), DispatchConfig::default());
        let handle = channel.handle();

        let err = handle.call(42, WORKER_SERVICE, "ping", vec![]).await.unwrap_err();
        assert!(matches!(err, ExtensionError::UnknownWorker(42)));
        let err = handle.post(42, WORKER_SERVICE, "ping", vec![]).await.unwrap_err();
        assert!(matches!(err, ExtensionError::UnknownWorker(42)));
        let err = handle.terminate_worker(42).await.unwrap_err();
        assert!(matches!(err, ExtensionError::UnknownWorker(42)));
    }

    #[tokio::test]
    async fn test_unknown_service_reported() {
        let channel = DispatchChannel::start(ExtensionCatalog::new(), DispatchConfig::default());
        let handle = channel.handle();
        let worker = handle.spawn_worker().await.unwrap();

        let err = handle.call(worker, "nothing", "go", vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            ExtensionError::WorkerCallError { kind: WireErrorKind::UnknownService, .. }
        ));
        assert_eq!(handle.pending_calls(worker).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_terminate_removes_worker() {
        let channel = DispatchChannel::start(ExtensionCatalog::new(), DispatchConfig::default());
        let handle = channel.handle();
        let worker = handle.spawn_worker().await.unwrap();

        handle.terminate_worker(worker).await.unwrap();
        assert!(handle.workers().await.unwrap().is_empty());
        let err = handle.call(worker, WORKER_SERVICE, "ping", vec![]).await.unwrap_err();
        assert!(matches!(err, ExtensionError::UnknownWorker(_)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handles() {
        let mut channel = DispatchChannel::start(ExtensionCatalog::new(), DispatchConfig::default());
        let handle = channel.handle();
        channel.shutdown().await.unwrap();

        let err = handle.spawn_worker().await.unwrap_err();
        assert!(matches!(err, ExtensionError::ChannelClosed));
    }
}
