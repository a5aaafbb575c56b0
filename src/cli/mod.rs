//! CLI commands for blockext.
//!
//! Provides inspection tooling: list catalog extensions, print normalized
//! block info, invoke an opcode.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config::HostConfig;
use crate::extensions::{
    BlockArgs, BlockContext, ExtensionCatalog, ExtensionManager, ExtensionManagerConfig, HostRuntime,
    OPCODE_SEPARATOR,
};

#[derive(Parser)]
#[command(name = "blockext")]
#[command(about = "Block extension host", long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/blockext/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the extensions in the catalog
    List,

    /// Load an extension and print its normalized block info as JSON
    Info {
        /// Extension id
        id: String,

        /// Load the extension on a worker
        #[arg(long)]
        worker: bool,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Load the owning extension and invoke a qualified opcode
    Invoke {
        /// Qualified opcode, e.g. coreExample_exampleOpcode
        opcode: String,

        /// Block arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Load the extension on a worker
        #[arg(long)]
        worker: bool,
    },
}

impl Cli {
    /// Resolve the host config for this invocation.
    pub fn host_config(&self) -> anyhow::Result<HostConfig> {
        match &self.config {
            Some(path) => HostConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => Ok(HostConfig::load()),
        }
    }
}

/// Run a parsed command.
pub async fn run(cli: Cli, config: &HostConfig) -> anyhow::Result<()> {
    let catalog = ExtensionCatalog::builtin();

    match cli.command {
        Commands::List => {
            for id in catalog.ids() {
                println!("{}", id);
            }
            Ok(())
        }

        Commands::Info { id, worker, pretty } => {
            let mut manager = manager(catalog, config);
            load(&mut manager, &id, worker).await?;

            let entry = manager
                .block_info_for(&id)
                .with_context(|| format!("No block info for '{}'", id))?;
            let json = entry.editor_json().await?;
            let output = if pretty {
                serde_json::to_string_pretty(&json)?
            } else {
                serde_json::to_string(&json)?
            };
            println!("{}", output);

            manager.shutdown().await?;
            Ok(())
        }

        Commands::Invoke {
            opcode,
            args,
            worker,
        } => {
            let (id, _) = opcode
                .split_once(OPCODE_SEPARATOR)
                .with_context(|| format!("'{}' is not a qualified opcode", opcode))?;
            let args: BlockArgs = match serde_json::from_str::<Value>(&args).context("Invalid --args")? {
                Value::Object(map) => map,
                other => anyhow::bail!("--args must be a JSON object, got {}", other),
            };

            let mut manager = manager(catalog, config);
            load(&mut manager, id, worker).await?;

            let result = manager
                .invoke(&opcode, &args, &BlockContext::default())
                .resolve()
                .await?;
            println!("{}", result);

            manager.shutdown().await?;
            Ok(())
        }
    }
}

fn manager(catalog: ExtensionCatalog, config: &HostConfig) -> ExtensionManager {
    ExtensionManager::with_catalog(
        Arc::new(HostRuntime::new()),
        catalog,
        ExtensionManagerConfig::from(config),
    )
}

async fn load(manager: &mut ExtensionManager, id: &str, worker: bool) -> anyhow::Result<()> {
    if worker {
        manager.load_extension_id_async(id).await?;
    } else {
        manager.load_extension_id_sync(id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_info() {
        let cli = Cli::try_parse_from(["blockext", "info", "coreExample", "--worker", "--pretty"]).unwrap();
        match cli.command {
            Commands::Info { id, worker, pretty } => {
                assert_eq!(id, "coreExample");
                assert!(worker);
                assert!(pretty);
            }
            _ => panic!("expected info"),
        }
    }

    #[test]
    fn test_parse_invoke_defaults() {
        let cli = Cli::try_parse_from(["blockext", "--config", "/tmp/c.toml", "invoke", "coreExample_exampleOpcode"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        match cli.command {
            Commands::Invoke { opcode, args, worker } => {
                assert_eq!(opcode, "coreExample_exampleOpcode");
                assert_eq!(args, "{}");
                assert!(!worker);
            }
            _ => panic!("expected invoke"),
        }
    }

    #[tokio::test]
    async fn test_run_invoke() {
        let cli = Cli::try_parse_from(["blockext", "invoke", "coreExample_exampleOpcode"]).unwrap();
        run(cli, &HostConfig::default()).await.unwrap();
    }
}
