use crate::error::{BlockchainError, Result};
use serde_json::Value;
use std::fmt;

/// Byte that ends every application message on the wire
pub const END_OF_MESSAGE: u8 = 0x04;

/// A `host:port` pair as peers announce themselves
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: &str, port: u16) -> PeerAddr {
        PeerAddr {
            host: host.to_string(),
            port,
        }
    }

    /// Parse `"host:port"`; the port is whatever follows the last colon
    pub fn parse(url: &str) -> Result<PeerAddr> {
        let url = url.trim();
        let (host, port) = url
            .rsplit_once(':')
            .ok_or_else(|| BlockchainError::Handshake(format!("Malformed address: {url:?}")))?;
        if host.is_empty() {
            return Err(BlockchainError::Handshake(format!("Missing host: {url:?}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| BlockchainError::Handshake(format!("Invalid port in {url:?}: {e}")))?;
        Ok(PeerAddr::new(host, port))
    }

    /// The wildcard address is not reachable as a peer; it means this machine
    pub fn normalized(&self) -> PeerAddr {
        if self.host == "0.0.0.0" {
            PeerAddr::new("localhost", self.port)
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Who is on the other end of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Address the socket is actually connected to
    pub addr: PeerAddr,
    /// Address the peer declared in its handshake, where it accepts connections
    pub declared: PeerAddr,
    /// True when the peer dialled us
    pub inbound: bool,
}

impl PeerInfo {
    /// True when `addr` names this peer by either its socket or its declared address
    pub fn is(&self, addr: &PeerAddr) -> bool {
        let addr = addr.normalized();
        self.addr.normalized() == addr || self.declared.normalized() == addr
    }
}

/// One decoded packet
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    /// JSON if it parses, else UTF-8 text, else the raw bytes
    pub fn parse(packet: &[u8]) -> Payload {
        match std::str::from_utf8(packet) {
            Ok(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => Payload::Json(value),
                Err(_) => Payload::Text(text.to_string()),
            },
            Err(_) => Payload::Bytes(packet.to_vec()),
        }
    }

    /// Wire bytes of this payload, terminator included
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = match self {
            Payload::Json(value) => serde_json::to_vec(value)?,
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Bytes(bytes) => bytes.clone(),
        };
        bytes.push(END_OF_MESSAGE);
        Ok(bytes)
    }
}

/// Everything the transport reports to its handler
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Started,
    Connected(PeerInfo),
    MessageReceived { peer: PeerInfo, payload: Payload },
    Disconnected(PeerInfo),
    Shutdown,
}
