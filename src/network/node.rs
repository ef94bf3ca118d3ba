use crate::error::{BlockchainError, Result};
use crate::network::connection::Connection;
use crate::network::events::{NodeEvent, Payload, PeerAddr, PeerInfo};
use log::{debug, info, warn};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HANDSHAKE_LEN: usize = 256;

// An inbound socket still exchanging handshakes on its own thread
struct PendingHandshake {
    socket: TcpStream,
    worker: JoinHandle<()>,
}

/// The transport: a listening socket plus the registry of live peer connections.
///
/// Every event is pushed onto one channel and handed, in order, to the single handler given to
/// [`P2PNode::run`].
pub struct P2PNode {
    local: PeerAddr,
    listener: Mutex<Option<TcpListener>>,
    connections: Mutex<Vec<Arc<Connection>>>,
    handshakes: Mutex<Vec<PendingHandshake>>,
    events: Sender<NodeEvent>,
    receiver: Mutex<Option<Receiver<NodeEvent>>>,
    stopping: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl P2PNode {
    /// Bind the listener. Port 0 picks a free port; `advertised_host` is what peers are told
    /// to dial back, defaulting to the bind host.
    pub fn bind(host: &str, port: u16, advertised_host: Option<&str>) -> Result<Arc<P2PNode>> {
        let listener = TcpListener::bind((host, port)).map_err(|e| {
            BlockchainError::Network(format!("Failed to bind to {host}:{port}: {e}"))
        })?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let local = PeerAddr::new(advertised_host.unwrap_or(host), port);

        info!("Node listening on {host}:{port}, advertised as {local}");

        let (events, receiver) = mpsc::channel();
        Ok(Arc::new(P2PNode {
            local,
            listener: Mutex::new(Some(listener)),
            connections: Mutex::new(Vec::new()),
            handshakes: Mutex::new(Vec::new()),
            events,
            receiver: Mutex::new(Some(receiver)),
            stopping: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }))
    }

    /// The address this node announces in handshakes
    pub fn local_addr(&self) -> &PeerAddr {
        &self.local
    }

    /// Start the dispatcher and acceptor threads. Can only be called once.
    pub fn run<F>(self: &Arc<Self>, mut handler: F) -> Result<()>
    where
        F: FnMut(NodeEvent) + Send + 'static,
    {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| BlockchainError::Network("Node is already running".to_string()))?;

        let dispatcher = thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || {
                for event in receiver {
                    let last = event == NodeEvent::Shutdown;
                    handler(event);
                    if last {
                        break;
                    }
                }
            })
            .map_err(|e| BlockchainError::Network(format!("Failed to spawn dispatcher: {e}")))?;

        let _ = self.events.send(NodeEvent::Started);

        let node = Arc::clone(self);
        let acceptor = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || node.accept_loop())
            .map_err(|e| BlockchainError::Network(format!("Failed to spawn acceptor: {e}")))?;

        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        threads.push(dispatcher);
        threads.push(acceptor);
        Ok(())
    }

    fn accept_loop(self: &Arc<Self>) {
        while !self.stopping.load(Ordering::SeqCst) {
            let accepted = {
                let listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
                match listener.as_ref() {
                    Some(listener) => listener.accept(),
                    None => break,
                }
            };
            match accepted {
                Ok((stream, socket_addr)) => {
                    let addr = PeerAddr::new(&socket_addr.ip().to_string(), socket_addr.port());
                    if let Err(e) = self.spawn_handshake(stream, addr.clone()) {
                        warn!("Rejected inbound connection from {addr}: {e}");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) => {
                    warn!("Error accepting connection: {e}");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        // Unblock handshakes still waiting on their peer
        let handshakes: Vec<PendingHandshake> = self
            .handshakes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for pending in handshakes {
            let _ = pending.socket.shutdown(Shutdown::Both);
            if pending.worker.join().is_err() {
                warn!("Handshake thread panicked");
            }
        }

        let connections: Vec<Arc<Connection>> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for connection in &connections {
            connection.stop();
        }
        for connection in &connections {
            connection.join();
        }

        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("Node {} shut down", self.local);
        let _ = self.events.send(NodeEvent::Shutdown);
    }

    // A slow or silent peer only holds up its own handshake thread
    fn spawn_handshake(self: &Arc<Self>, stream: TcpStream, addr: PeerAddr) -> Result<()> {
        stream.set_nonblocking(false)?;
        let socket = stream.try_clone()?;
        let node = Arc::clone(self);
        let worker = thread::Builder::new()
            .name(format!("handshake-{addr}"))
            .spawn(move || {
                if let Err(e) = node.accept_inbound(stream, addr.clone()) {
                    warn!("Rejected inbound connection from {addr}: {e}");
                }
            })
            .map_err(|e| BlockchainError::Network(format!("Failed to spawn handshake: {e}")))?;

        let mut handshakes = self.handshakes.lock().unwrap_or_else(PoisonError::into_inner);
        handshakes.retain(|pending| !pending.worker.is_finished());
        handshakes.push(PendingHandshake { socket, worker });
        Ok(())
    }

    fn accept_inbound(&self, mut stream: TcpStream, addr: PeerAddr) -> Result<()> {
        let declared = read_handshake(&mut stream)?;
        write_handshake(&mut stream, &self.local)?;
        if self.stopping.load(Ordering::SeqCst) {
            return Err(BlockchainError::Network("Node is shutting down".to_string()));
        }

        let info = PeerInfo {
            addr,
            declared,
            inbound: true,
        };
        let connection = Connection::spawn(stream, info.clone(), self.events.clone())?;
        self.register(connection);

        info!("Accepted peer {} from {}", info.declared, info.addr);
        let _ = self.events.send(NodeEvent::Connected(info));
        Ok(())
    }

    /// Dial `host:port` unless it is this node or already connected.
    ///
    /// `true` when a connection to that peer exists afterwards.
    pub fn connect(&self, host: &str, port: u16) -> bool {
        if self.stopping.load(Ordering::SeqCst) {
            return false;
        }
        let addr = PeerAddr::new(host, port).normalized();
        if self.is_self(&addr) {
            debug!("Refusing to connect to myself at {addr}");
            return false;
        }
        if self.find(&addr).is_some() {
            return true;
        }

        match self.dial(&addr) {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Could not connect to {addr}: {e}");
                false
            }
        }
    }

    fn dial(&self, addr: &PeerAddr) -> Result<bool> {
        let mut stream = open_stream(addr)?;
        write_handshake(&mut stream, &self.local)?;
        let declared = read_handshake(&mut stream)?;

        if self.is_self(&declared.normalized()) {
            debug!("{addr} is this node");
            return Ok(false);
        }
        if self.find(&declared).is_some() {
            return Ok(true);
        }

        let info = PeerInfo {
            addr: addr.clone(),
            declared,
            inbound: false,
        };
        let connection = Connection::spawn(stream, info.clone(), self.events.clone())?;
        self.register(connection);

        info!("Connected to peer {}", info.declared);
        let _ = self.events.send(NodeEvent::Connected(info));
        Ok(true)
    }

    fn is_self(&self, addr: &PeerAddr) -> bool {
        *addr == self.local.normalized()
    }

    fn register(&self, connection: Arc<Connection>) {
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        connections.retain(|c| c.is_alive());
        connections.push(connection);
    }

    fn find(&self, addr: &PeerAddr) -> Option<Arc<Connection>> {
        self.live_connections()
            .into_iter()
            .find(|c| c.info().is(addr))
    }

    fn live_connections(&self) -> Vec<Arc<Connection>> {
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        connections.retain(|c| c.is_alive());
        connections.clone()
    }

    /// Send `payload` to every live peer. Failures only affect the failing connection.
    pub fn broadcast(&self, payload: &Payload) -> usize {
        self.live_connections()
            .iter()
            .filter(|c| c.send(payload))
            .count()
    }

    pub fn send_to(&self, peer: &PeerAddr, payload: &Payload) -> bool {
        match self.find(peer) {
            Some(connection) => connection.send(payload),
            None => false,
        }
    }

    /// Stop every connection to `host:port`. The worker reports the disconnect.
    pub fn disconnect(&self, host: &str, port: u16) -> bool {
        let addr = PeerAddr::new(host, port);
        let removed: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
            let (removed, kept): (Vec<_>, Vec<_>) =
                connections.drain(..).partition(|c| c.info().is(&addr));
            *connections = kept;
            removed
        };
        for connection in &removed {
            connection.stop();
            connection.join();
        }
        !removed.is_empty()
    }

    /// Declared `host:port` of every live peer
    pub fn peers(&self) -> Vec<String> {
        self.live_connections()
            .iter()
            .map(|c| c.info().declared.to_string())
            .collect()
    }

    /// Raise the termination flag; the acceptor winds everything down
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Stop and wait for the acceptor and dispatcher
    pub fn shutdown(&self) {
        self.stop();
        let threads: Vec<JoinHandle<()>> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Node thread panicked during shutdown");
            }
        }
    }
}

fn open_stream(addr: &PeerAddr) -> Result<TcpStream> {
    let mut last_error = None;
    for socket_addr in (addr.host.as_str(), addr.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => e.into(),
        None => BlockchainError::Network(format!("{addr} did not resolve")),
    })
}

fn write_handshake(stream: &mut TcpStream, local: &PeerAddr) -> Result<()> {
    stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.write_all(format!("{local}\n").as_bytes())?;
    Ok(())
}

// A single "host:port\n" line, read a byte at a time so nothing past it is consumed
fn read_handshake(stream: &mut TcpStream) -> Result<PeerAddr> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => {
                return Err(BlockchainError::Handshake(
                    "Peer closed before completing the handshake".to_string(),
                ))
            }
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => {
                line.push(byte[0]);
                if line.len() > MAX_HANDSHAKE_LEN {
                    return Err(BlockchainError::Handshake("Handshake line too long".to_string()));
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let line = String::from_utf8(line)
        .map_err(|e| BlockchainError::Handshake(format!("Handshake is not UTF-8: {e}")))?;
    PeerAddr::parse(&line)
}
