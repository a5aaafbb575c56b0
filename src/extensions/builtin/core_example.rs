use std::sync::Arc;

use crate::extensions::descriptor::{BlockDescriptor, BlockType, ExtensionDescriptor};
use crate::extensions::extension::{BlockArgs, BlockContext, BlockValue, Extension};
use crate::extensions::runtime::HostRuntime;

pub const CORE_EXAMPLE_ID: &str = "coreExample";

/// Returned by `exampleOpcode` before any stage exists.
const NO_STAGE: &str = "no stage yet";

/// Minimal built-in extension: one button and one reporter.
pub struct CoreExample {
    runtime: Arc<HostRuntime>,
}

impl CoreExample {
    pub fn new(runtime: Arc<HostRuntime>) -> Self {
        Self { runtime }
    }

    /// Name of the stage, read from the runtime at call time. Falls back to
    /// the calling target when the runtime has no stage of its own.
    fn example_opcode(&self, context: &BlockContext) -> String {
        if let Some(stage) = self.runtime.stage() {
            return stage.name;
        }
        match &context.target {
            Some(target) if target.is_stage => target.name.clone(),
            _ => NO_STAGE.to_string(),
        }
    }
}

impl Extension for CoreExample {
    fn get_info(&mut self) -> ExtensionDescriptor {
        ExtensionDescriptor::new(CORE_EXAMPLE_ID, "CoreEx")
            .with_block(BlockDescriptor::button("MAKE_A_VARIABLE", "make a variable (CoreEx)"))
            .with_block(BlockDescriptor::new("exampleOpcode", BlockType::Reporter).with_text("title of the stage"))
    }

    fn invoke(&mut self, opcode: &str, _args: &BlockArgs, context: &BlockContext) -> anyhow::Result<BlockValue> {
        match opcode {
            "exampleOpcode" => Ok(BlockValue::String(self.example_opcode(context))),
            other => anyhow::bail!("coreExample has no opcode '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::runtime::Target;

    #[test]
    fn test_example_opcode_reads_live_stage() {
        let runtime = Arc::new(HostRuntime::new());
        let mut ext = CoreExample::new(runtime.clone());
        let args = BlockArgs::new();

        let value = ext.invoke("exampleOpcode", &args, &BlockContext::default()).unwrap();
        assert_eq!(value, "no stage yet");

        runtime.add_target(Target::stage("Stage"));
        let value = ext.invoke("exampleOpcode", &args, &BlockContext::default()).unwrap();
        assert_eq!(value, "Stage");
    }

    #[test]
    fn test_example_opcode_uses_stage_context() {
        let mut ext = CoreExample::new(Arc::new(HostRuntime::new()));
        let context = BlockContext::for_target(Target::stage("Backdrop"));
        let value = ext.invoke("exampleOpcode", &BlockArgs::new(), &context).unwrap();
        assert_eq!(value, "Backdrop");

        let sprite = BlockContext::for_target(Target::sprite("s1", "Cat"));
        let value = ext.invoke("exampleOpcode", &BlockArgs::new(), &sprite).unwrap();
        assert_eq!(value, "no stage yet");
    }

    #[test]
    fn test_descriptor() {
        let info = CoreExample::new(Arc::new(HostRuntime::new())).get_info();
        assert_eq!(info.id, "coreExample");
        assert_eq!(info.blocks.len(), 2);
        assert!(info.blocks[0].is_button());
        assert_eq!(info.blocks[0].func.as_deref(), Some("MAKE_A_VARIABLE"));
        assert_eq!(info.blocks[1].opcode, "exampleOpcode");
        assert_eq!(info.blocks[1].block_type, BlockType::Reporter);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut ext = CoreExample::new(Arc::new(HostRuntime::new()));
        assert!(ext.invoke("nothing", &BlockArgs::new(), &BlockContext::default()).is_err());
    }
}
