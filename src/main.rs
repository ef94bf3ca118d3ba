// This is my main entry point for the node binary
use clap::Parser;
use log::{error, info, LevelFilter};
use stake_chain::{Blockchain, Command, Config, Opt, Server, Wallet};
use std::process;
use std::thread;
use std::time::Duration;

fn main() {
    // Info by default, RUST_LOG can still narrow or widen it
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    // If something goes wrong, I log the error and exit with code 1
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::StartNode {
            config,
            host,
            port,
            peers,
            auto_mint,
        } => {
            // Flags win over the file and the environment
            let mut config = Config::load(config.as_deref())?;
            if let Some(host) = host {
                config.node.host = host;
            }
            if let Some(port) = port {
                config.node.port = port;
            }
            config.node.peers.extend(peers);
            config.consensus.auto_mint |= auto_mint;
            config.validate()?;

            let wallet = match &config.wallet.private_key {
                Some(key) => Wallet::from_hex(key)?,
                None => {
                    let wallet = Wallet::new()?;
                    info!("Generated a new wallet, its key is not saved");
                    wallet
                }
            };
            info!("Node wallet address: {}", wallet.get_address());

            // Every node starts from its own genesis; peers converge on the heaviest chain
            let owner = config
                .consensus
                .owner_address
                .clone()
                .unwrap_or_else(|| wallet.get_address().to_string());
            let blockchain = Blockchain::new(&owner, config.mint_settings())?;

            let server = Server::start(&config, blockchain, wallet)?;
            while server.is_running() {
                thread::sleep(Duration::from_secs(1));
            }
        }
        Command::Genkey => {
            let wallet = Wallet::new()?;
            println!("Private key: {}", wallet.pkcs8_hex());
            println!("Address: {}", wallet.get_address());
        }
    }
    Ok(())
}
