//! Peer-to-peer networking
//!
//! A plain TCP transport: each connection starts with a `host:port` handshake line, after
//! which messages are JSON objects terminated by `0x04`. [`P2PNode`] owns the listener and the
//! connection registry and feeds every event to one handler; [`Server`] is that handler,
//! turning peer messages into ledger operations.

pub mod connection;
pub mod events;
pub mod message;
pub mod node;
pub mod server;

pub use connection::Connection;
pub use events::{NodeEvent, Payload, PeerAddr, PeerInfo, END_OF_MESSAGE};
pub use message::Message;
pub use node::P2PNode;
pub use server::{Server, WalletInfo};
