//! Extension system for blockext.
//!
//! This module provides the infrastructure for loading block extensions,
//! turning their declarative descriptors into invocable opcode functions, and
//! dispatching calls to extensions hosted on isolated worker threads.
//!
//! # Architecture
//!
//! ```text
//! ExtensionManager
//! ├── runtime: Arc<HostRuntime>            (targets, peripherals, step time)
//! ├── catalog: ExtensionCatalog            (id -> constructor)
//! ├── registry: OpcodeRegistry             ("<ext>_<opcode>" -> OpcodeFunction)
//! ├── block_info: Vec<BlockInfoEntry>      (normalized editor metadata)
//! ├── loads: LoadTracker                   (Loading / Loaded / Failed)
//! └── dispatch: Option<DispatchChannel>
//!
//! DispatchChannel (tokio task)
//! ├── workers: HashMap<WorkerId, WorkerHandle>
//! └── pending: HashMap<CallId, PendingCall>
//!
//! Worker (OS thread)
//! ├── runtime: HostRuntime                 (private to the worker)
//! └── services: "extension_<worker>_<ext>" -> Box<dyn Extension>
//! ```
//!
//! Extensions loaded synchronously live in-process. Extensions loaded
//! asynchronously live on a worker and are reached through JSON frames; the
//! opcode functions registered for them return pending results that resolve
//! when the worker replies.

pub mod builtin;
mod catalog;
mod descriptor;
pub mod dispatch;
mod error;
mod extension;
mod loader;
mod manager;
mod normalizer;
pub mod peripheral;
mod registry;
mod runtime;

pub use catalog::{ExtensionCatalog, ExtensionFactory};
pub use descriptor::{
    ArgSpec, ArgumentType, BlockDescriptor, BlockType, ExtensionDescriptor, MenuItem, MenuItems,
    MenuOption, MenuSpec, MenuTable, DEFAULT_COLOR1, DEFAULT_COLOR2, DEFAULT_COLOR3,
};
pub use dispatch::{DispatchChannel, DispatchConfig, DispatchHandle};
pub use error::{ExtensionError, ExtensionFailure, ExtensionResult};
pub use extension::{BlockArgs, BlockContext, BlockValue, Extension, SharedExtension};
pub use loader::{LoadState, LoadTracker};
pub use manager::{ExtensionManager, ExtensionManagerConfig};
pub use normalizer::{
    normalize, BlockFunc, BlockInfo, BlockInfoEntry, DynamicMenu, InstanceBinding, MenuField,
    MenuInfo, MenuJson, MenuOptions, NormalizedExtension, PreparedBlock, WorkerBinding,
};
pub use peripheral::{BleConnection, PeripheralExtension};
pub use registry::{qualify, BlockReturn, OpcodeFunction, OpcodeHandler, OpcodeRegistry, OPCODE_SEPARATOR};
pub use runtime::{HostRuntime, Target};

/// Unique identifier for an extension.
pub type ExtensionId = String;

/// Unique identifier for a worker context.
pub type WorkerId = u32;
