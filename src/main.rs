//! blockext command-line entry point.

use clap::Parser;

use blockext::cli::{self, Cli};
use blockext::logging;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.host_config()?;

    logging::init(&config.log_filter);

    cli::run(cli, &config).await
}
