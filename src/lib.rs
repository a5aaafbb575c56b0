//! blockext - extension registration and block-dispatch runtime.
//!
//! Block extensions describe themselves with a declarative descriptor (blocks,
//! arguments, menus). blockext turns those descriptors into invocable opcode
//! functions under a stable `<extensionId>_<opcode>` namespace, whether the
//! extension runs in-process or on an isolated worker.
//!
//! # Architecture
//!
//! The library is organized into these main modules:
//!
//! - [`extensions`] - Descriptor model, registry, normalizer, dispatch, manager
//! - [`config`] - Host configuration loading
//! - [`logging`] - Tracing subscriber setup for binaries
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use blockext::extensions::{BlockArgs, BlockContext, ExtensionManager, HostRuntime};
//!
//! let mut manager = ExtensionManager::new(Arc::new(HostRuntime::new()));
//! manager.load_extension_id_sync("coreExample")?;
//!
//! let function = manager.get_opcode_function("coreExample_exampleOpcode").unwrap();
//! let value = function.call(&BlockArgs::new(), &BlockContext::default()).resolve().await?;
//! ```

// Public modules
pub mod cli;
pub mod config;
pub mod extensions;
pub mod logging;

// Internal modules
mod error;

// Re-export commonly used types for convenience
pub use config::HostConfig;
pub use error::{BlockextError, BlockextResult};
pub use extensions::{
    Extension, ExtensionDescriptor, ExtensionError, ExtensionManager, ExtensionResult, HostRuntime,
};
