use crate::error::{BlockchainError, Result};
use crate::network::events::{NodeEvent, Payload, PeerInfo, END_OF_MESSAGE};
use log::{debug, warn};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READ_CHUNK_SIZE: usize = 4096;
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A peer that keeps sending without ever terminating a message is dropped past this size
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// One live peer socket and the worker thread reading from it
pub struct Connection {
    info: PeerInfo,
    writer: Mutex<TcpStream>,
    stopped: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Start a worker reading `stream`.
    /// Every decoded packet and the final disconnect go to `events`.
    pub fn spawn(
        stream: TcpStream,
        info: PeerInfo,
        events: Sender<NodeEvent>,
    ) -> Result<Arc<Connection>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let reader = stream.try_clone()?;

        let stopped = Arc::new(AtomicBool::new(false));
        let worker = {
            let stopped = Arc::clone(&stopped);
            let info = info.clone();
            thread::Builder::new()
                .name(format!("peer-{}", info.declared))
                .spawn(move || read_loop(reader, info, stopped, events))
                .map_err(|e| BlockchainError::Network(format!("Failed to spawn worker: {e}")))?
        };

        Ok(Arc::new(Connection {
            info,
            writer: Mutex::new(stream),
            stopped,
            worker: Mutex::new(Some(worker)),
        }))
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn is_alive(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Write one framed payload. A failed write tears the connection down.
    pub fn send(&self, payload: &Payload) -> bool {
        if !self.is_alive() {
            return false;
        }
        let bytes = match payload.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not encode payload for {}: {e}", self.info.declared);
                return false;
            }
        };

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.write_all(&bytes).and_then(|_| writer.flush()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Send to {} failed: {e}", self.info.declared);
                drop(writer);
                self.stop();
                false
            }
        }
    }

    /// Ask the worker to exit; it closes the socket and reports the disconnect
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writer.shutdown(Shutdown::Both);
    }

    /// Wait for the worker thread. Never call this from the worker itself.
    pub fn join(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Worker for {} panicked", self.info.declared);
            }
        }
    }
}

fn read_loop(
    mut reader: TcpStream,
    info: PeerInfo,
    stopped: Arc<AtomicBool>,
    events: Sender<NodeEvent>,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while !stopped.load(Ordering::SeqCst) {
        match reader.read(&mut chunk) {
            Ok(0) => {
                debug!("{} closed the connection", info.declared);
                break;
            }
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                for packet in split_frames(&mut buffer) {
                    let event = NodeEvent::MessageReceived {
                        peer: info.clone(),
                        payload: Payload::parse(&packet),
                    };
                    if events.send(event).is_err() {
                        stopped.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                if buffer.len() > MAX_BUFFER_SIZE {
                    warn!(
                        "Dropping {}: unterminated message over {MAX_BUFFER_SIZE} bytes",
                        info.declared
                    );
                    break;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("Read from {} failed: {e}", info.declared);
                break;
            }
        }
    }

    stopped.store(true, Ordering::SeqCst);
    let _ = reader.shutdown(Shutdown::Both);
    let _ = events.send(NodeEvent::Disconnected(info));
}

/// Drain every complete packet from `buffer`, leaving any unterminated tail in place.
/// Empty packets are skipped.
pub fn split_frames(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    while let Some(end) = buffer.iter().position(|&b| b == END_OF_MESSAGE) {
        let mut packet: Vec<u8> = buffer.drain(..=end).collect();
        packet.pop();
        if !packet.is_empty() {
            packets.push(packet);
        }
    }
    packets
}
