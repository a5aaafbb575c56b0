//! The contract every extension implements.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::descriptor::{ExtensionDescriptor, MenuItem};
use super::runtime::Target;

/// Arguments passed to a block, keyed by argument name.
pub type BlockArgs = Map<String, Value>;

/// Value produced by a block.
pub type BlockValue = Value;

/// An extension instance shared between its opcode functions.
pub type SharedExtension = Arc<Mutex<Box<dyn Extension>>>;

/// Context of a block invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockContext {
    /// Target running the block, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

impl BlockContext {
    pub fn for_target(target: Target) -> Self {
        Self {
            target: Some(target),
        }
    }
}

/// A block extension.
///
/// Only [`Extension::get_info`] is required. Blocks are dispatched through
/// [`Extension::invoke`] by opcode, and dynamic menus through
/// [`Extension::menu_items`] by provider name.
pub trait Extension: Send {
    /// Describe the blocks and menus this extension provides.
    fn get_info(&mut self) -> ExtensionDescriptor;

    /// Run the block `opcode`.
    fn invoke(
        &mut self,
        opcode: &str,
        args: &BlockArgs,
        context: &BlockContext,
    ) -> anyhow::Result<BlockValue> {
        let _ = (args, context);
        anyhow::bail!("opcode '{}' is not implemented", opcode)
    }

    /// Whether `name` is a menu provider method on this instance.
    fn has_menu_provider(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    /// Build the current items of the dynamic menu served by `name`.
    fn menu_items(&mut self, name: &str) -> anyhow::Result<Vec<MenuItem>> {
        anyhow::bail!("no menu provider named '{}'", name)
    }
}

/// Wrap an extension for sharing between opcode functions.
pub fn share(extension: Box<dyn Extension>) -> SharedExtension {
    Arc::new(Mutex::new(extension))
}
