use crate::config::Config;
use crate::core::{Block, Blockchain, MintOutcome, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::events::{NodeEvent, PeerInfo};
use crate::network::message::Message;
use crate::network::node::P2PNode;
use crate::storage::{TransactionPool, UTXOSet};
use crate::wallet::Wallet;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const AUTO_MINT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What a client sees of the node's own wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletInfo {
    pub address: String,
    pub balance: u64,
    pub stake: u64,
    pub validator: bool,
}

/// Ties the ledger to the transport: peer messages become ledger operations, and local
/// ledger changes are announced to peers.
pub struct Server {
    blockchain: Blockchain,
    wallet: Wallet,
    node: Arc<P2PNode>,
    running: AtomicBool,
    auto_mint: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind the node, start handling events, dial the configured peers and, if enabled,
    /// start minting in the background
    pub fn start(config: &Config, blockchain: Blockchain, wallet: Wallet) -> Result<Arc<Server>> {
        let node = P2PNode::bind(
            &config.node.host,
            config.node.port,
            config.node.advertised_host.as_deref(),
        )?;

        let server = Arc::new(Server {
            blockchain,
            wallet,
            node,
            running: AtomicBool::new(true),
            auto_mint: Mutex::new(None),
        });

        let handler = Arc::clone(&server);
        server.node.run(move |event| handler.handle_event(event))?;

        for peer in config.peer_addrs() {
            if !server.node.connect(&peer.host, peer.port) {
                warn!("Could not reach bootstrap peer {peer}");
            }
        }

        if config.consensus.auto_mint {
            server.start_auto_mint()?;
        }

        Ok(server)
    }

    fn handle_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::Started => info!("Node started on {}", self.node.local_addr()),
            NodeEvent::Connected(peer) => {
                info!("Peer {} connected", peer.declared);
                if peer.inbound {
                    self.send_initial_state(&peer);
                }
            }
            NodeEvent::MessageReceived { peer, payload } => match Message::from_payload(&payload) {
                Ok(message) => self.handle_message(&peer, message),
                Err(e) => warn!("Ignoring message from {}: {e}", peer.declared),
            },
            NodeEvent::Disconnected(peer) => info!("Peer {} disconnected", peer.declared),
            NodeEvent::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
                info!("Node stopped");
            }
        }
    }

    fn send_initial_state(&self, peer: &PeerInfo) {
        let messages = [
            Ok(Message::InitChain {
                chain: self.blockchain.get_chain(),
            }),
            Message::init_pool(&self.blockchain.get_pool()),
        ];
        for message in messages {
            match message.and_then(|m| m.to_payload()) {
                Ok(payload) => {
                    if !self.node.send_to(&peer.addr, &payload) {
                        warn!("Could not send initial state to {}", peer.declared);
                    }
                }
                Err(e) => error!("Could not encode initial state: {e}"),
            }
        }
    }

    fn handle_message(&self, peer: &PeerInfo, message: Message) {
        match message {
            Message::RegisterNode { host, port } => {
                debug!("{} announced {host}:{port}", peer.declared);
                self.node.connect(&host, port);
            }
            Message::NewTransaction { transaction } => {
                self.blockchain.add_to_pool(transaction);
            }
            Message::InitChain { chain } | Message::BlockCreated { chain } => {
                if self.blockchain.replace_chain(chain) {
                    info!("Adopted chain from {}", peer.declared);
                }
            }
            Message::InitPool { pool } => {
                self.blockchain.replace_pool(pool);
            }
        }
    }

    fn broadcast(&self, message: &Message) {
        match message.to_payload() {
            Ok(payload) => {
                let sent = self.node.broadcast(&payload);
                debug!("Broadcast to {sent} peers");
            }
            Err(e) => error!("Could not encode message: {e}"),
        }
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn chain(&self) -> Vec<Block> {
        self.blockchain.get_chain()
    }

    pub fn chain_len(&self) -> usize {
        self.blockchain.get_chain_len()
    }

    pub fn pool(&self) -> Vec<Transaction> {
        self.blockchain.get_pool()
    }

    pub fn wallet_info(&self) -> WalletInfo {
        let address = self.wallet.get_address();
        WalletInfo {
            address: address.to_string(),
            balance: self.blockchain.account_balance(address),
            stake: self.blockchain.stake_of(address),
            validator: self.blockchain.is_validator(address),
        }
    }

    /// Pool a transfer from the node wallet and announce it. `None` if it cannot be funded.
    pub fn submit_transaction(&self, recipient: &str, amount: u64) -> Option<Transaction> {
        self.submit(|wallet, utxos, pool| wallet.create_transfer(recipient, amount, utxos, pool))
    }

    pub fn submit_stake(&self, amount: u64) -> Option<Transaction> {
        self.submit(|wallet, utxos, pool| wallet.create_stake(amount, utxos, pool))
    }

    pub fn submit_validator(&self) -> Option<Transaction> {
        self.submit(|wallet, utxos, pool| wallet.create_validator(utxos, pool))
    }

    fn submit<F>(&self, build: F) -> Option<Transaction>
    where
        F: FnOnce(&Wallet, &UTXOSet, &TransactionPool) -> Option<Transaction>,
    {
        let tx = self
            .blockchain
            .create_pool_transaction(|utxos, pool| build(&self.wallet, utxos, pool))?;
        self.broadcast(&Message::NewTransaction {
            transaction: tx.clone(),
        });
        Some(tx)
    }

    /// Mint one block with the node wallet and announce the new chain on success
    pub fn mint(&self) -> Result<MintOutcome> {
        let outcome = self.blockchain.mint(&self.wallet)?;
        if let MintOutcome::Minted(_) = &outcome {
            self.broadcast(&Message::BlockCreated {
                chain: self.blockchain.get_chain(),
            });
        }
        Ok(outcome)
    }

    /// Connect to `host:port` and tell the other peers about it
    pub fn register_peer(&self, host: &str, port: u16) -> bool {
        if !self.node.connect(host, port) {
            return false;
        }
        self.broadcast(&Message::RegisterNode {
            host: host.to_string(),
            port,
        });
        true
    }

    pub fn peers(&self) -> Vec<String> {
        self.node.peers()
    }

    pub fn node(&self) -> &Arc<P2PNode> {
        &self.node
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn start_auto_mint(self: &Arc<Self>) -> Result<()> {
        let server = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("auto-mint".to_string())
            .spawn(move || server.auto_mint_loop())
            .map_err(|e| BlockchainError::Network(format!("Failed to spawn auto-mint: {e}")))?;
        *self.auto_mint.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("Auto-mint enabled for {}", self.wallet.get_address());
        Ok(())
    }

    fn auto_mint_loop(&self) {
        while self.is_running() {
            match self.mint() {
                Ok(MintOutcome::Minted(_)) | Ok(MintOutcome::Cancelled) => {}
                Ok(MintOutcome::Refused(reason)) => {
                    debug!("Not minting: {reason}");
                    thread::sleep(AUTO_MINT_RETRY_DELAY);
                }
                Err(e) => {
                    error!("Mint failed: {e}");
                    thread::sleep(AUTO_MINT_RETRY_DELAY);
                }
            }
        }
    }

    /// Stop minting and the node, then wait for their threads
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.blockchain.halt_mining();

        let handle = self
            .auto_mint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Auto-mint thread panicked");
            }
        }

        self.node.shutdown();
    }
}
