//! Extension manager - the composition root of the extension system.
//!
//! The ExtensionManager is responsible for:
//! - Resolving extension ids through the catalog
//! - Loading extensions in-process or on a worker
//! - Normalizing descriptors and registering opcode functions
//! - Keeping the ordered block info list for the editor

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::HostConfig;

use super::catalog::ExtensionCatalog;
use super::descriptor::ExtensionDescriptor;
use super::dispatch::{
    DispatchChannel, DispatchConfig, DispatchHandle, WireErrorKind, LOAD_EXTENSION_METHOD,
    WORKER_SERVICE,
};
use super::error::{ExtensionError, ExtensionResult};
use super::extension::{share, BlockArgs, BlockContext, Extension};
use super::loader::{LoadState, LoadTracker};
use super::normalizer::{normalize, BlockInfoEntry, InstanceBinding, WorkerBinding};
use super::registry::{BlockReturn, OpcodeFunction, OpcodeRegistry, OPCODE_SEPARATOR};
use super::runtime::HostRuntime;
use super::{ExtensionId, WorkerId};

/// Configuration for the extension manager.
#[derive(Debug, Clone)]
pub struct ExtensionManagerConfig {
    /// Deadline for a worker to report an extension's descriptor.
    pub load_timeout: Duration,

    /// Deadline for a call to a worker-hosted opcode or menu.
    pub call_timeout: Duration,

    /// Load every async extension into one shared worker instead of one
    /// worker per extension.
    pub share_worker: bool,

    /// Maximum number of live workers.
    pub max_workers: usize,
}

impl Default for ExtensionManagerConfig {
    fn default() -> Self {
        Self::from(&HostConfig::default())
    }
}

impl From<&HostConfig> for ExtensionManagerConfig {
    fn from(config: &HostConfig) -> Self {
        Self {
            load_timeout: config.load_timeout(),
            call_timeout: config.call_timeout(),
            share_worker: config.share_worker,
            max_workers: config.max_workers,
        }
    }
}

/// What a worker reports after loading an extension.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadReply {
    service: String,
    descriptor: ExtensionDescriptor,
    #[serde(default)]
    menu_providers: Vec<String>,
}

/// Loads extensions and owns everything they register.
pub struct ExtensionManager {
    config: ExtensionManagerConfig,

    /// Runtime handed to in-process extensions.
    runtime: Arc<HostRuntime>,

    catalog: ExtensionCatalog,

    registry: OpcodeRegistry,

    /// Normalized metadata, in load order.
    block_info: Vec<BlockInfoEntry>,

    loads: LoadTracker,

    /// Started on the first async load.
    dispatch: Option<DispatchChannel>,

    /// Worker reused for every async load when `share_worker` is set.
    shared_worker: Option<WorkerId>,

    /// Worker hosting each async-loaded extension.
    worker_extensions: HashMap<ExtensionId, WorkerId>,
}

impl ExtensionManager {
    /// Create a manager over the built-in catalog with default settings.
    pub fn new(runtime: Arc<HostRuntime>) -> Self {
        Self::with_catalog(runtime, ExtensionCatalog::builtin(), ExtensionManagerConfig::default())
    }

    pub fn with_catalog(
        runtime: Arc<HostRuntime>,
        catalog: ExtensionCatalog,
        config: ExtensionManagerConfig,
    ) -> Self {
        Self {
            config,
            runtime,
            catalog,
            registry: OpcodeRegistry::new(),
            block_info: Vec::new(),
            loads: LoadTracker::new(),
            dispatch: None,
            shared_worker: None,
            worker_extensions: HashMap::new(),
        }
    }

    /// Whether `id` has been loaded.
    pub fn is_extension_loaded(&self, id: &str) -> bool {
        self.loads.is_loaded(id)
    }

    /// Load an extension into this process.
    ///
    /// Loading an id that is already loaded is a no-op.
    pub fn load_extension_id_sync(&mut self, id: &str) -> ExtensionResult<()> {
        if !self.loads.begin(id) {
            warn!(extension_id = %id, "Rejecting attempt to load a second extension with the same id");
            return Ok(());
        }
        info!(extension_id = %id, "Loading extension");

        let result = self.load_local(id);
        self.record(id, &result);
        result
    }

    fn load_local(&mut self, id: &str) -> ExtensionResult<()> {
        let extension = self.catalog.instantiate(self.runtime.clone(), id)?;
        let shared = share(extension);
        let descriptor = shared.lock().get_info();
        ensure_descriptor_id(id, &descriptor)?;
        self.install(&descriptor, InstanceBinding::Local(shared))
    }

    /// Load an extension on a worker.
    ///
    /// The extension runs on its own worker, or on the shared worker when
    /// `share_worker` is set. Its opcode functions return pending results that
    /// resolve when the worker replies.
    pub async fn load_extension_id_async(&mut self, id: &str) -> ExtensionResult<()> {
        if !self.loads.begin(id) {
            warn!(extension_id = %id, "Rejecting attempt to load a second extension with the same id");
            return Ok(());
        }
        info!(extension_id = %id, "Loading extension on a worker");

        let result = self.load_on_worker(id).await;
        self.record(id, &result);
        result
    }

    async fn load_on_worker(&mut self, id: &str) -> ExtensionResult<()> {
        let dispatch = self.dispatch_handle();
        self.forget_dead_workers(&dispatch).await?;

        let shared = if self.config.share_worker { self.shared_worker } else { None };
        match shared {
            Some(worker) => match self.load_into(&dispatch, worker, id, false).await {
                Err(ExtensionError::UnknownWorker(_) | ExtensionError::WorkerTerminated(_)) => {
                    warn!(worker_id = worker, extension_id = %id, "Shared worker is gone, starting a new one");
                    self.shared_worker = None;
                    let worker = dispatch.spawn_worker().await?;
                    self.load_into(&dispatch, worker, id, true).await
                }
                other => other,
            },
            None => {
                let worker = dispatch.spawn_worker().await?;
                self.load_into(&dispatch, worker, id, true).await
            }
        }
    }

    async fn load_into(
        &mut self,
        dispatch: &DispatchHandle,
        worker: WorkerId,
        id: &str,
        fresh: bool,
    ) -> ExtensionResult<()> {
        let outcome = match self.request_load(dispatch, worker, id).await {
            Ok(reply) => {
                let binding = InstanceBinding::Worker(WorkerBinding {
                    dispatch: dispatch.clone(),
                    worker,
                    service: reply.service,
                    menu_providers: reply.menu_providers.into_iter().collect::<HashSet<_>>(),
                });
                ensure_descriptor_id(id, &reply.descriptor)
                    .and_then(|()| self.install(&reply.descriptor, binding))
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                if self.config.share_worker {
                    self.shared_worker = Some(worker);
                }
                self.worker_extensions.insert(id.to_string(), worker);
                Ok(())
            }
            Err(e) => {
                if fresh {
                    if let Err(te) = dispatch.terminate_worker(worker).await {
                        debug!(worker_id = worker, error = %te, "Worker already gone");
                    }
                }
                Err(e)
            }
        }
    }

    /// Drop worker assignments whose worker has exited.
    ///
    /// Opcode functions of extensions on a dead worker stay registered and
    /// fail with `UnknownWorker`. Restarting them is up to the caller.
    pub async fn prune_workers(&mut self) -> ExtensionResult<()> {
        match self.dispatch() {
            Some(dispatch) => self.forget_dead_workers(&dispatch).await,
            None => Ok(()),
        }
    }

    async fn forget_dead_workers(&mut self, dispatch: &DispatchHandle) -> ExtensionResult<()> {
        let live: HashSet<WorkerId> = dispatch.workers().await?.into_iter().collect();
        self.worker_extensions.retain(|id, worker| {
            let alive = live.contains(worker);
            if !alive {
                debug!(extension_id = %id, worker_id = *worker, "Forgetting extension on exited worker");
            }
            alive
        });
        if self.shared_worker.is_some_and(|worker| !live.contains(&worker)) {
            self.shared_worker = None;
        }
        Ok(())
    }

    async fn request_load(
        &self,
        dispatch: &DispatchHandle,
        worker: WorkerId,
        id: &str,
    ) -> ExtensionResult<LoadReply> {
        let timeout = self.config.load_timeout;
        let value = dispatch
            .call_with_timeout(worker, WORKER_SERVICE, LOAD_EXTENSION_METHOD, vec![json!(id)], timeout)
            .await
            .map_err(|e| match e {
                ExtensionError::WorkerCallTimeout { timeout_ms, .. } => {
                    ExtensionError::ExtensionLoadTimeout {
                        extension: id.to_string(),
                        timeout_ms,
                    }
                }
                ExtensionError::WorkerCallError {
                    kind: WireErrorKind::NotFound,
                    ..
                } => ExtensionError::ExtensionNotFound(id.to_string()),
                ExtensionError::WorkerCallError {
                    kind: WireErrorKind::Construction,
                    message,
                    ..
                } => ExtensionError::construction(id, message),
                other => other,
            })?;

        serde_json::from_value(value).map_err(|e| ExtensionError::InvalidDescriptor {
            extension: id.to_string(),
            message: e.to_string(),
        })
    }

    /// Register an already constructed extension in this process.
    ///
    /// The extension id comes from its descriptor. Registering an id that is
    /// already loaded is a no-op.
    pub fn register_internal_extension(&mut self, extension: Box<dyn Extension>) -> ExtensionResult<ExtensionId> {
        let shared = share(extension);
        let descriptor = shared.lock().get_info();
        let id = descriptor.id.clone();

        if !self.loads.begin(&id) {
            warn!(extension_id = %id, "Rejecting attempt to register a second extension with the same id");
            return Ok(id);
        }

        let result = self.install(&descriptor, InstanceBinding::Local(shared));
        self.record(&id, &result);
        result.map(|()| id)
    }

    /// Normalize and register a descriptor. Nothing is registered on failure.
    fn install(&mut self, descriptor: &ExtensionDescriptor, binding: InstanceBinding) -> ExtensionResult<()> {
        if descriptor.id.is_empty() || descriptor.id.contains(OPCODE_SEPARATOR) {
            return Err(ExtensionError::InvalidOpcodeName(descriptor.id.clone()));
        }
        let normalized = normalize(descriptor, &binding)?;
        let opcodes = normalized.functions.len();
        self.registry.register_all(normalized.functions)?;
        self.block_info.push(normalized.entry);
        info!(
            extension_id = %descriptor.id,
            blocks = descriptor.blocks.len(),
            opcodes,
            menus = descriptor.menus.len(),
            "Registered extension"
        );
        Ok(())
    }

    fn record(&mut self, id: &str, result: &ExtensionResult<()>) {
        match result {
            Ok(()) => self.loads.finish(id),
            Err(e) => {
                warn!(extension_id = %id, error = %e, "Failed to load extension");
                self.loads.fail(id, e.to_string());
            }
        }
    }

    fn dispatch_handle(&mut self) -> DispatchHandle {
        if let Some(dispatch) = &self.dispatch {
            return dispatch.handle();
        }
        let channel = DispatchChannel::start(
            self.catalog.clone(),
            DispatchConfig {
                call_timeout: self.config.call_timeout,
                max_workers: self.config.max_workers,
            },
        );
        let handle = channel.handle();
        self.dispatch = Some(channel);
        handle
    }

    /// Opcode function registered under `qualified`, if any.
    pub fn get_opcode_function(&self, qualified: &str) -> Option<OpcodeFunction> {
        self.registry.get(qualified)
    }

    /// Look up and call an opcode function.
    pub fn invoke(&self, qualified: &str, args: &BlockArgs, context: &BlockContext) -> BlockReturn {
        self.registry.invoke(qualified, args, context)
    }

    /// Normalized metadata of every loaded extension, in load order.
    pub fn block_info(&self) -> &[BlockInfoEntry] {
        &self.block_info
    }

    pub fn block_info_for(&self, id: &str) -> Option<&BlockInfoEntry> {
        self.block_info.iter().find(|entry| entry.id == id)
    }

    pub fn registry(&self) -> &OpcodeRegistry {
        &self.registry
    }

    pub fn load_state(&self, id: &str) -> LoadState {
        self.loads.state(id)
    }

    /// Loaded extension ids in load order.
    pub fn loaded_extensions(&self) -> &[ExtensionId] {
        self.loads.loaded()
    }

    /// Worker hosting an async-loaded extension.
    pub fn worker_for(&self, id: &str) -> Option<WorkerId> {
        self.worker_extensions.get(id).copied()
    }

    /// Handle to the dispatch channel, once an async load has started it.
    pub fn dispatch(&self) -> Option<DispatchHandle> {
        self.dispatch.as_ref().map(DispatchChannel::handle)
    }

    pub fn runtime(&self) -> &Arc<HostRuntime> {
        &self.runtime
    }

    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ExtensionManagerConfig {
        &self.config
    }

    /// Close every worker. Opcode functions bound to workers fail afterwards.
    pub async fn shutdown(&mut self) -> ExtensionResult<()> {
        if let Some(mut dispatch) = self.dispatch.take() {
            dispatch.shutdown().await?;
        }
        self.shared_worker = None;
        self.worker_extensions.clear();
        Ok(())
    }
}

fn ensure_descriptor_id(id: &str, descriptor: &ExtensionDescriptor) -> ExtensionResult<()> {
    if descriptor.id == id {
        Ok(())
    } else {
        Err(ExtensionError::InvalidDescriptor {
            extension: id.to_string(),
            message: format!("descriptor reports id '{}'", descriptor.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::builtin::CORE_EXAMPLE_ID;
    use crate::extensions::runtime::Target;

    #[test]
    fn test_sync_load_core_example() {
        let runtime = Arc::new(HostRuntime::new());
        let mut manager = ExtensionManager::new(runtime.clone());

        manager.load_extension_id_sync(CORE_EXAMPLE_ID).unwrap();
        assert!(manager.is_extension_loaded(CORE_EXAMPLE_ID));
        assert_eq!(manager.registry().len(), 1);

        let function = manager.get_opcode_function("coreExample_exampleOpcode").unwrap();
        let args = BlockArgs::new();
        let context = BlockContext::default();
        assert_eq!(function.call(&args, &context).ready().unwrap().unwrap(), "no stage yet");

        runtime.add_target(Target::stage("Stage"));
        assert_eq!(function.call(&args, &context).ready().unwrap().unwrap(), "Stage");
    }

    #[test]
    fn test_sync_load_is_idempotent() {
        let mut manager = ExtensionManager::new(Arc::new(HostRuntime::new()));
        manager.load_extension_id_sync(CORE_EXAMPLE_ID).unwrap();
        manager.load_extension_id_sync(CORE_EXAMPLE_ID).unwrap();

        assert_eq!(manager.block_info().len(), 1);
        assert_eq!(manager.loaded_extensions(), [CORE_EXAMPLE_ID.to_string()]);
    }

    #[test]
    fn test_unknown_extension() {
        let mut manager = ExtensionManager::new(Arc::new(HostRuntime::new()));
        let err = manager.load_extension_id_sync("nope").unwrap_err();
        assert!(matches!(err, ExtensionError::ExtensionNotFound(_)));
        assert!(matches!(manager.load_state("nope"), LoadState::Failed { .. }));
        assert!(manager.block_info().is_empty());
    }

    #[test]
    fn test_descriptor_id_mismatch() {
        let catalog = ExtensionCatalog::builtin().with("alias", |runtime, _| {
            Ok(Box::new(crate::extensions::builtin::CoreExample::new(runtime)) as Box<dyn Extension>)
        });
        let mut manager =
            ExtensionManager::with_catalog(Arc::new(HostRuntime::new()), catalog, ExtensionManagerConfig::default());

        let err = manager.load_extension_id_sync("alias").unwrap_err();
        assert!(matches!(err, ExtensionError::InvalidDescriptor { .. }));
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn test_config_from_host_config() {
        let host = HostConfig {
            load_timeout_ms: 100,
            share_worker: true,
            ..Default::default()
        };
        let config = ExtensionManagerConfig::from(&host);
        assert_eq!(config.load_timeout, Duration::from_millis(100));
        assert!(config.share_worker);
    }
}
