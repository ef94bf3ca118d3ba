use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "stake-chain")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "startnode", about = "Start a node")]
    StartNode {
        #[arg(long = "config", help = "TOML configuration file")]
        config: Option<PathBuf>,
        #[arg(long = "host", help = "Interface to listen on")]
        host: Option<String>,
        #[arg(long = "port", help = "Port to listen on")]
        port: Option<u16>,
        #[arg(long = "peer", help = "Peer to connect to at startup (host:port), repeatable")]
        peers: Vec<String>,
        #[arg(long = "auto-mint", help = "Keep minting blocks while the node runs")]
        auto_mint: bool,
    },
    #[command(name = "genkey", about = "Generate a wallet key and print its address")]
    Genkey,
}
