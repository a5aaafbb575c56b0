//! Opcode registry.
//!
//! Maps fully-qualified opcodes (`<extensionId>_<opcode>`) to the functions
//! that run them. Entries are tagged with the extension that registered them
//! so a conflicting registration from another extension is rejected.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::error::{ExtensionError, ExtensionResult};
use super::extension::{BlockArgs, BlockContext, BlockValue};
use super::ExtensionId;

/// Separator between extension id and opcode.
pub const OPCODE_SEPARATOR: char = '_';

/// Build the qualified opcode for `opcode` in `extension_id`.
///
/// Neither part may be empty or contain [`OPCODE_SEPARATOR`], so every
/// qualified name splits back into exactly one pair.
pub fn qualify(extension_id: &str, opcode: &str) -> ExtensionResult<String> {
    let qualified = format!("{}{}{}", extension_id, OPCODE_SEPARATOR, opcode);
    for part in [extension_id, opcode] {
        if part.is_empty() || part.contains(OPCODE_SEPARATOR) {
            return Err(ExtensionError::InvalidOpcodeName(qualified));
        }
    }
    Ok(qualified)
}

/// Result of invoking an opcode function.
pub enum BlockReturn {
    /// The value is available now.
    Ready(ExtensionResult<BlockValue>),
    /// The value resolves later, for example when a worker replies.
    Pending(BoxFuture<'static, ExtensionResult<BlockValue>>),
}

impl BlockReturn {
    pub fn is_pending(&self) -> bool {
        matches!(self, BlockReturn::Pending(_))
    }

    /// The result, if it is already available.
    pub fn ready(self) -> Option<ExtensionResult<BlockValue>> {
        match self {
            BlockReturn::Ready(result) => Some(result),
            BlockReturn::Pending(_) => None,
        }
    }

    /// Wait for the result.
    pub async fn resolve(self) -> ExtensionResult<BlockValue> {
        match self {
            BlockReturn::Ready(result) => result,
            BlockReturn::Pending(future) => future.await,
        }
    }
}

impl fmt::Debug for BlockReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReturn::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            BlockReturn::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Callable body of an opcode function.
pub type OpcodeHandler = Arc<dyn Fn(&BlockArgs, &BlockContext) -> BlockReturn + Send + Sync>;

/// An invocable opcode, tagged with the extension that provides it.
#[derive(Clone)]
pub struct OpcodeFunction {
    pub extension_id: ExtensionId,
    /// Unqualified opcode.
    pub opcode: String,
    handler: OpcodeHandler,
}

impl OpcodeFunction {
    pub fn new(extension_id: impl Into<ExtensionId>, opcode: impl Into<String>, handler: OpcodeHandler) -> Self {
        Self {
            extension_id: extension_id.into(),
            opcode: opcode.into(),
            handler,
        }
    }

    /// Build from a closure.
    pub fn from_fn<F>(extension_id: impl Into<ExtensionId>, opcode: impl Into<String>, f: F) -> Self
    where
        F: Fn(&BlockArgs, &BlockContext) -> BlockReturn + Send + Sync + 'static,
    {
        Self::new(extension_id, opcode, Arc::new(f))
    }

    pub fn call(&self, args: &BlockArgs, context: &BlockContext) -> BlockReturn {
        (self.handler)(args, context)
    }
}

impl fmt::Debug for OpcodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcodeFunction")
            .field("extension_id", &self.extension_id)
            .field("opcode", &self.opcode)
            .finish_non_exhaustive()
    }
}

/// Qualified opcode -> function table.
#[derive(Debug, Default, Clone)]
pub struct OpcodeRegistry {
    functions: HashMap<String, OpcodeFunction>,
}

impl OpcodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single function.
    ///
    /// Re-registering from the same extension replaces the previous entry.
    pub fn register(&mut self, qualified: impl Into<String>, function: OpcodeFunction) -> ExtensionResult<()> {
        let qualified = qualified.into();
        self.check_one(&qualified, &function)?;
        debug!(opcode = %qualified, extension_id = %function.extension_id, "Registered opcode");
        self.functions.insert(qualified, function);
        Ok(())
    }

    /// Validate a batch without inserting anything.
    pub fn check(&self, batch: &[(String, OpcodeFunction)]) -> ExtensionResult<()> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (qualified, function) in batch {
            self.check_one(qualified, function)?;
            if let Some(existing) = seen.insert(qualified, &function.extension_id) {
                if existing != function.extension_id {
                    return Err(ExtensionError::DuplicateOpcode {
                        opcode: qualified.clone(),
                        existing: existing.to_string(),
                        incoming: function.extension_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Register a batch. Either every entry is inserted or none is.
    pub fn register_all(&mut self, batch: Vec<(String, OpcodeFunction)>) -> ExtensionResult<()> {
        self.check(&batch)?;
        for (qualified, function) in batch {
            self.functions.insert(qualified, function);
        }
        Ok(())
    }

    fn check_one(&self, qualified: &str, function: &OpcodeFunction) -> ExtensionResult<()> {
        match qualified.split_once(OPCODE_SEPARATOR) {
            Some((ext, op)) => {
                qualify(ext, op)?;
            }
            None => return Err(ExtensionError::InvalidOpcodeName(qualified.to_string())),
        }
        match self.functions.get(qualified) {
            Some(existing) if existing.extension_id != function.extension_id => {
                Err(ExtensionError::DuplicateOpcode {
                    opcode: qualified.to_string(),
                    existing: existing.extension_id.clone(),
                    incoming: function.extension_id.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Look up a function, failing with `UnknownOpcode`.
    pub fn resolve(&self, qualified: &str) -> ExtensionResult<&OpcodeFunction> {
        self.functions
            .get(qualified)
            .ok_or_else(|| ExtensionError::UnknownOpcode(qualified.to_string()))
    }

    pub fn get(&self, qualified: &str) -> Option<OpcodeFunction> {
        self.functions.get(qualified).cloned()
    }

    /// Look up and call a function.
    pub fn invoke(&self, qualified: &str, args: &BlockArgs, context: &BlockContext) -> BlockReturn {
        match self.resolve(qualified) {
            Ok(function) => function.call(args, context),
            Err(e) => BlockReturn::Ready(Err(e)),
        }
    }

    pub fn contains(&self, qualified: &str) -> bool {
        self.functions.contains_key(qualified)
    }

    /// Qualified opcodes registered by `extension_id`, sorted.
    pub fn opcodes_for(&self, extension_id: &str) -> Vec<String> {
        let mut opcodes: Vec<String> = self
            .functions
            .iter()
            .filter(|(_, f)| f.extension_id == extension_id)
            .map(|(q, _)| q.clone())
            .collect();
        opcodes.sort();
        opcodes
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(extension_id: &str, opcode: &str, value: i64) -> (String, OpcodeFunction) {
        (
            qualify(extension_id, opcode).unwrap(),
            OpcodeFunction::from_fn(extension_id, opcode, move |_, _| BlockReturn::Ready(Ok(json!(value)))),
        )
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("music", "playNote").unwrap(), "music_playNote");
        assert!(matches!(qualify("my_ext", "go"), Err(ExtensionError::InvalidOpcodeName(_))));
        assert!(matches!(qualify("ext", "go_now"), Err(ExtensionError::InvalidOpcodeName(_))));
        assert!(matches!(qualify("", "go"), Err(ExtensionError::InvalidOpcodeName(_))));
        assert!(matches!(qualify("ext", ""), Err(ExtensionError::InvalidOpcodeName(_))));
    }

    #[test]
    fn test_register_and_invoke() {
        let mut registry = OpcodeRegistry::new();
        let (name, function) = constant("ext", "answer", 42);
        registry.register(name, function).unwrap();

        let result = registry
            .invoke("ext_answer", &BlockArgs::new(), &BlockContext::default())
            .ready()
            .unwrap()
            .unwrap();
        assert_eq!(result, json!(42));
        assert!(registry.get("ext_missing").is_none());
        assert!(matches!(registry.resolve("ext_missing"), Err(ExtensionError::UnknownOpcode(_))));
    }

    #[test]
    fn test_same_extension_replaces() {
        let mut registry = OpcodeRegistry::new();
        let (name, first) = constant("ext", "value", 1);
        registry.register(name.clone(), first).unwrap();
        let (_, second) = constant("ext", "value", 2);
        registry.register(name.clone(), second).unwrap();

        assert_eq!(registry.len(), 1);
        let value = registry.invoke(&name, &BlockArgs::new(), &BlockContext::default()).ready().unwrap().unwrap();
        assert_eq!(value, json!(2));
    }

    #[test]
    fn test_other_extension_conflict_rejected() {
        let mut registry = OpcodeRegistry::new();
        let (name, function) = constant("ext", "value", 1);
        registry.register(name, function).unwrap();

        let (_, intruder) = constant("other", "value", 2);
        let err = registry.register("ext_value", intruder).unwrap_err();
        assert!(matches!(err, ExtensionError::DuplicateOpcode { ref existing, .. } if existing == "ext"));

        let (_, function) = constant("ext", "bad", 1);
        let err = registry.register("ext_bad_name", function).unwrap_err();
        assert!(matches!(err, ExtensionError::InvalidOpcodeName(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut registry = OpcodeRegistry::new();
        let batch = vec![constant("ext", "a", 1), constant("ext", "b", 2)];
        registry.register_all(batch).unwrap();

        let (_, intruder) = constant("other", "a", 9);
        let bad = vec![constant("ext", "c", 3), ("ext_a".to_string(), intruder)];
        assert!(registry.register_all(bad).is_err());
        assert!(!registry.contains("ext_c"));
        assert_eq!(registry.opcodes_for("ext"), vec!["ext_a", "ext_b"]);
    }

    #[tokio::test]
    async fn test_pending_return_resolves() {
        let function = OpcodeFunction::from_fn("ext", "later", |_, _| {
            BlockReturn::Pending(Box::pin(async { Ok(json!("done")) }))
        });
        let ret = function.call(&BlockArgs::new(), &BlockContext::default());
        assert!(ret.is_pending());
        assert_eq!(ret.resolve().await.unwrap(), json!("done"));
    }
}
