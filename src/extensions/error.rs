//! Error types for the extension system.

use thiserror::Error;

use super::dispatch::WireErrorKind;
use super::WorkerId;

/// Boxed failure raised by extension-authored code.
pub type ExtensionFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in the extension system.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Extension '{0}' not found")]
    ExtensionNotFound(String),

    #[error("Failed to construct extension '{extension}': {source}")]
    ExtensionConstructionError {
        extension: String,
        #[source]
        source: ExtensionFailure,
    },

    #[error("Menu '{menu}' in extension '{extension}' has unresolved reference '{reference}'")]
    InvalidMenuReference {
        extension: String,
        menu: String,
        reference: String,
    },

    #[error("Invalid opcode name: '{0}'")]
    InvalidOpcodeName(String),

    #[error("Opcode '{opcode}' is already registered by extension '{existing}' (conflicting source '{incoming}')")]
    DuplicateOpcode {
        opcode: String,
        existing: String,
        incoming: String,
    },

    #[error("Unknown opcode '{0}'")]
    UnknownOpcode(String),

    #[error("Loading extension '{extension}' timed out after {timeout_ms} ms")]
    ExtensionLoadTimeout { extension: String, timeout_ms: u64 },

    #[error("Call to '{method}' on worker {worker} timed out after {timeout_ms} ms")]
    WorkerCallTimeout {
        worker: WorkerId,
        method: String,
        timeout_ms: u64,
    },

    #[error("Worker {worker} failed to handle '{method}': {message}")]
    WorkerCallError {
        worker: WorkerId,
        method: String,
        kind: WireErrorKind,
        message: String,
    },

    #[error("Worker {0} terminated")]
    WorkerTerminated(WorkerId),

    #[error("Opcode '{opcode}' failed: {source}")]
    ExtensionRuntimeError {
        opcode: String,
        #[source]
        source: ExtensionFailure,
    },

    #[error("Invalid descriptor for extension '{extension}': {message}")]
    InvalidDescriptor { extension: String, message: String },

    #[error("Unknown worker {0}")]
    UnknownWorker(WorkerId),

    #[error("Too many workers running (max: {0})")]
    TooManyWorkers(usize),

    #[error("Dispatch channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExtensionError {
    /// Wrap a failure raised while constructing an extension.
    pub fn construction(extension: impl Into<String>, source: impl Into<ExtensionFailure>) -> Self {
        Self::ExtensionConstructionError {
            extension: extension.into(),
            source: source.into(),
        }
    }

    /// Wrap a failure raised by an invoked opcode function.
    pub fn runtime(opcode: impl Into<String>, source: impl Into<ExtensionFailure>) -> Self {
        Self::ExtensionRuntimeError {
            opcode: opcode.into(),
            source: source.into(),
        }
    }
}

/// Result type for extension operations.
pub type ExtensionResult<T> = Result<T, ExtensionError>;
