//! Worker contexts.
//!
//! A worker is a dedicated OS thread with its own [`HostRuntime`] and a copy of
//! the extension catalog. It shares no state with the host: frames arrive as
//! JSON strings on its inbox and replies leave as [`WorkerEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::message::{
    extension_service, WireError, WireErrorKind, WireMessage, LOAD_EXTENSION_METHOD, WORKER_SERVICE,
};
use crate::extensions::catalog::ExtensionCatalog;
use crate::extensions::error::ExtensionError;
use crate::extensions::extension::{BlockArgs, BlockContext, Extension};
use crate::extensions::normalizer::MENU_METHOD_PREFIX;
use crate::extensions::runtime::HostRuntime;
use crate::extensions::WorkerId;

/// Something a worker reports back to the dispatch core.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Frame { worker: WorkerId, frame: String },
    /// The worker thread ended, normally or by panic.
    Exited { worker: WorkerId },
}

/// Host-side handle of a running worker.
pub(crate) struct WorkerHandle {
    inbox: mpsc::UnboundedSender<String>,
}

impl WorkerHandle {
    /// Queue a frame. Fails if the worker thread is gone.
    pub(crate) fn send(&self, frame: String) -> bool {
        self.inbox.send(frame).is_ok()
    }
}

/// Start a worker thread. The thread is detached; it exits once its inbox
/// closes.
pub(crate) fn spawn(
    id: WorkerId,
    catalog: ExtensionCatalog,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> std::io::Result<WorkerHandle> {
    let (inbox, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name(format!("blockext-worker-{}", id))
        .spawn(move || run(id, catalog, rx, events))?;
    debug!(worker_id = id, "Spawned worker");
    Ok(WorkerHandle { inbox })
}

/// Reports the worker's exit when dropped, including during a panic unwind.
struct ExitGuard {
    worker: WorkerId,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.events.send(WorkerEvent::Exited {
            worker: self.worker,
        });
    }
}

struct WorkerState {
    id: WorkerId,
    runtime: Arc<HostRuntime>,
    catalog: ExtensionCatalog,
    services: HashMap<String, Box<dyn Extension>>,
}

fn run(
    id: WorkerId,
    catalog: ExtensionCatalog,
    mut inbox: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let _guard = ExitGuard {
        worker: id,
        events: events.clone(),
    };
    let mut state = WorkerState {
        id,
        runtime: Arc::new(HostRuntime::new()),
        catalog,
        services: HashMap::new(),
    };

    while let Some(frame) = inbox.blocking_recv() {
        match WireMessage::from_frame(&frame) {
            Ok(WireMessage::Call {
                call_id,
                service,
                method,
                args,
            }) => {
                let response = match state.handle(&service, &method, args) {
                    Ok(result) => WireMessage::reply(call_id, &service, &method, result),
                    Err(error) => WireMessage::fail(call_id, &service, &method, error),
                };
                match response.to_frame() {
                    Ok(frame) => {
                        if events.send(WorkerEvent::Frame { worker: id, frame }).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(worker_id = id, call_id, error = %e, "Failed to encode response"),
                }
            }
            Ok(WireMessage::Post {
                service, method, args,
            }) => {
                if let Err(error) = state.handle(&service, &method, args) {
                    warn!(
                        worker_id = id,
                        service = %service,
                        method = %method,
                        error = %error.message,
                        "Posted message failed"
                    );
                }
            }
            Ok(WireMessage::Response { call_id, .. }) => {
                debug!(worker_id = id, call_id, "Ignoring response sent to worker");
            }
            Err(e) => warn!(worker_id = id, error = %e, "Dropping malformed frame"),
        }
    }

    debug!(worker_id = id, "Worker inbox closed");
}

impl WorkerState {
    fn handle(&mut self, service: &str, method: &str, args: Vec<Value>) -> Result<Value, WireError> {
        if service == WORKER_SERVICE {
            return match method {
                LOAD_EXTENSION_METHOD => self.load_extension(args),
                other => Err(WireError::new(
                    WireErrorKind::UnknownService,
                    format!("worker service has no method '{}'", other),
                )),
            };
        }

        let extension = self.services.get_mut(service).ok_or_else(|| {
            WireError::new(WireErrorKind::UnknownService, format!("no service named '{}'", service))
        })?;

        if let Some(provider) = method.strip_prefix(MENU_METHOD_PREFIX) {
            let items = extension
                .menu_items(provider)
                .map_err(|e| WireError::new(WireErrorKind::Runtime, format!("{:#}", e)))?;
            let options: Vec<_> = items.iter().map(|i| i.to_option()).collect();
            return serde_json::to_value(options)
                .map_err(|e| WireError::new(WireErrorKind::Runtime, e.to_string()));
        }

        let mut args = args.into_iter();
        let block_args: BlockArgs = match args.next() {
            None | Some(Value::Null) => BlockArgs::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(WireError::new(
                    WireErrorKind::Malformed,
                    format!("block arguments must be an object, got {}", other),
                ))
            }
        };
        let context: BlockContext = match args.next() {
            None | Some(Value::Null) => BlockContext::default(),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| WireError::new(WireErrorKind::Malformed, e.to_string()))?,
        };

        extension
            .invoke(method, &block_args, &context)
            .map_err(|e| WireError::new(WireErrorKind::Runtime, format!("{:#}", e)))
    }

    fn load_extension(&mut self, args: Vec<Value>) -> Result<Value, WireError> {
        let extension_id = match args.first() {
            Some(Value::String(id)) => id.clone(),
            _ => {
                return Err(WireError::new(
                    WireErrorKind::Malformed,
                    "loadExtension expects an extension id",
                ))
            }
        };

        let mut extension = self
            .catalog
            .instantiate(self.runtime.clone(), &extension_id)
            .map_err(|e| match e {
                ExtensionError::ExtensionNotFound(_) => {
                    WireError::new(WireErrorKind::NotFound, e.to_string())
                }
                ExtensionError::ExtensionConstructionError { ref source, .. } => {
                    WireError::new(WireErrorKind::Construction, source.to_string())
                }
                other => WireError::new(WireErrorKind::Runtime, other.to_string()),
            })?;

        let descriptor = extension.get_info();
        let menu_providers: Vec<&str> = descriptor
            .menus
            .iter()
            .filter_map(|(_, spec)| spec.provider_name())
            .filter(|provider| extension.has_menu_provider(provider))
            .collect();

        let service = extension_service(self.id, &extension_id);
        let reply = json!({
            "service": service,
            "descriptor": descriptor,
            "menuProviders": menu_providers,
        });

        debug!(worker_id = self.id, extension_id = %extension_id, service = %service, "Loaded extension on worker");
        self.services.insert(service, extension);
        Ok(reply)
    }
}
