//! Network integration tests
//!
//! Real nodes on loopback with OS-assigned ports, checking that peers connect, sync chains
//! and pools, and shut down cleanly.

use stake_chain::{Blockchain, Config, MintOutcome, MintSettings, Server, Wallet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    false
}

fn loopback_config(peers: Vec<String>) -> Config {
    let mut config = Config::default();
    config.node.host = "127.0.0.1".to_string();
    config.node.port = 0;
    config.node.peers = peers;
    config.consensus.mint_poll_interval_ms = 10;
    config
}

fn start_node(peers: Vec<String>) -> (Arc<Server>, String) {
    let config = loopback_config(peers);
    let wallet = Wallet::new().unwrap();
    let blockchain = Blockchain::new(
        wallet.get_address(),
        MintSettings {
            stake_tick_secs: 1,
            poll_interval: Duration::from_millis(10),
        },
    )
    .unwrap();
    let server = Server::start(&config, blockchain, wallet).unwrap();
    let addr = server.node().local_addr().to_string();
    (server, addr)
}

#[test]
fn test_joining_node_adopts_chain_and_follows_mints() {
    let (alice, alice_addr) = start_node(vec![]);
    let (bob, bob_addr) = start_node(vec![alice_addr.clone()]);

    assert_eq!(bob.peers(), vec![alice_addr.clone()]);
    assert!(wait_until(|| alice.peers() == vec![bob_addr.clone()]));

    // alice greets the inbound peer with her chain, which bob adopts
    let alice_genesis = alice.chain()[0].clone();
    assert!(wait_until(|| bob.chain()[0] == alice_genesis));

    let validator = alice.submit_validator().unwrap();
    let stake = alice.submit_stake(100).unwrap();
    assert!(wait_until(|| bob.pool() == vec![validator.clone(), stake.clone()]));

    let info = alice.wallet_info();
    assert!(info.validator);
    assert_eq!(info.stake, 100);

    match alice.mint().unwrap() {
        MintOutcome::Minted(block) => assert_eq!(block.get_index(), 1),
        other => panic!("expected a block, got {other:?}"),
    }

    assert!(wait_until(|| bob.chain_len() == 2));
    assert_eq!(bob.chain(), alice.chain());
    assert!(bob.pool().is_empty());
    assert_eq!(
        bob.blockchain().account_balance(&info.address),
        alice.wallet_info().balance
    );

    bob.shutdown();
    assert!(wait_until(|| alice.peers().is_empty()));
    alice.shutdown();
    assert!(!alice.is_running());
    assert!(!bob.is_running());
}

#[test]
fn test_registered_peer_is_announced() {
    let (alice, alice_addr) = start_node(vec![]);
    let (bob, bob_addr) = start_node(vec![alice_addr.clone()]);
    let (carol, carol_addr) = start_node(vec![]);
    assert!(wait_until(|| alice.peers().len() == 1));

    let (host, port) = carol_addr.rsplit_once(':').unwrap();
    assert!(alice.register_peer(host, port.parse().unwrap()));

    // bob hears about carol from alice and dials her himself
    assert!(wait_until(|| bob.peers().contains(&carol_addr)));
    assert!(wait_until(|| {
        let peers = carol.peers();
        peers.contains(&alice_addr) && peers.contains(&bob_addr)
    }));

    // registering again is a no-op on the registry
    assert!(alice.register_peer(host, port.parse().unwrap()));
    assert_eq!(alice.peers().len(), 2);

    for server in [&alice, &bob, &carol] {
        server.shutdown();
    }
}

#[test]
fn test_auto_mint_keeps_extending_chain() {
    let wallet = Wallet::new().unwrap();
    let mut config = loopback_config(vec![]);
    config.consensus.auto_mint = true;
    let blockchain = Blockchain::new(wallet.get_address(), config.mint_settings()).unwrap();
    let server = Server::start(&config, blockchain, wallet).unwrap();

    // nothing happens until the wallet can validate
    thread::sleep(Duration::from_millis(200));
    assert_eq!(server.chain_len(), 1);

    assert!(server.submit_validator().is_some());
    assert!(server.submit_stake(10).is_some());
    assert!(wait_until(|| server.chain_len() >= 3));

    server.shutdown();
    assert!(!server.blockchain().is_mining());
}
