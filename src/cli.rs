use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "reelbox", version)]
#[command(about = "Video download orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP/WebSocket service
    Server(ServerArgs),
    /// Print metadata and quality options of a video
    Info(InfoArgs),
    /// Download one video
    Get(GetArgs),
    /// Download a channel or playlist as one batch
    Collection(CollectionArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind to; defaults to `server.bind_addr`
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct InfoArgs {
    pub url: String,
}

#[derive(clap::Args, Debug)]
pub struct GetArgs {
    pub url: String,

    /// best, 1080p, 720p, 480p, audio or a raw format selector
    #[arg(long, short)]
    pub quality: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct CollectionArgs {
    pub url: String,

    /// Maximum number of videos; defaults to `defaults.max_collection_items`
    #[arg(long)]
    pub max: Option<usize>,

    #[arg(long, short)]
    pub quality: Option<String>,
}
