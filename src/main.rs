#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use clap::Parser;
use dataplicity_agent::cli::{Cli, Commands};
use dataplicity_agent::config::Config;
use dataplicity_agent::control_plane::NullControlPlane;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("dataplicity agent v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(args) => {
            let config = Config::load(&args)?;
            dataplicity_agent::logging::init(&config)?;
            dataplicity_agent::run(config, Arc::new(NullControlPlane)).await
        }
    }
}
