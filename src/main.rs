mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use reelbox::config::Config;
use reelbox::observability::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Server(args) => commands::server(config, args).await?,
        Commands::Info(args) => commands::info(config, args).await?,
        Commands::Get(args) => commands::get(config, args).await?,
        Commands::Collection(args) => commands::collection(config, args).await?,
        Commands::Config => commands::print_config(&config)?,
    }

    Ok(())
}
