//! TCP transport for the debugger.
//!
//! The IDE side is the *server*: it binds a port, the interpreter connects
//! to it. Exactly one peer is accepted; once the peer is live, lines are
//! read on the accept thread and handed to the [`LineHandler`] synchronously,
//! so all line handling is inherently serialized. Writing is safe from any
//! thread through a [`LineWriter`].

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::SessionError;

/// Maximum bytes in a single received line before the connection is
/// considered hostile and dropped.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Poll interval for the non-blocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Receives transport notifications on the reader thread. Implementations
/// must not block: everything behind the socket stalls while they run.
pub trait LineHandler: Send + Sync + 'static {
    fn on_line(&self, line: &str);
    fn on_connected(&self, peer: SocketAddr);
    fn on_disconnected(&self);
}

/// Cloneable write handle. Usable from any thread; errors with
/// [`SessionError::NotConnected`] until a peer is accepted.
#[derive(Clone, Default)]
pub struct LineWriter {
    stream: Arc<Mutex<Option<TcpStream>>>,
}

impl LineWriter {
    /// Write one line, appending the newline terminator.
    pub fn send_line(&self, line: &str) -> Result<(), SessionError> {
        let mut guard = self.stream.lock().unwrap();
        let stream = guard.as_mut().ok_or(SessionError::NotConnected)?;
        stream
            .write_all(line.as_bytes())
            .and_then(|_| stream.write_all(b"\n"))
            .and_then(|_| stream.flush())
            .map_err(|e| SessionError::Io(e.to_string()))
    }
}

/// Single-peer line transport.
pub struct Transport {
    writer: LineWriter,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    bound_addr: Option<SocketAddr>,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            writer: LineWriter::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_handle: None,
            bound_addr: None,
        }
    }

    /// Write handle, valid for the transport's lifetime.
    pub fn writer(&self) -> LineWriter {
        self.writer.clone()
    }

    /// Bound address once listening (port 0 binds an ephemeral port).
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    /// Bind the port and start the accept/read thread.
    pub fn listen(&mut self, port: u16, handler: Arc<dyn LineHandler>) -> Result<(), SessionError> {
        if self.accept_handle.is_some() {
            return Err(SessionError::AlreadyListening);
        }

        let listener =
            TcpListener::bind(("0.0.0.0", port)).map_err(|e| SessionError::Io(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| SessionError::Io(e.to_string()))?;
        self.bound_addr = Some(addr);

        // Non-blocking accept so the shutdown flag is honored.
        listener
            .set_nonblocking(true)
            .map_err(|e| SessionError::Io(e.to_string()))?;

        self.shutdown.store(false, Ordering::SeqCst);
        let shutdown = Arc::clone(&self.shutdown);
        let writer_slot = Arc::clone(&self.writer.stream);

        self.accept_handle = Some(
            thread::Builder::new()
                .name("luascope-transport".to_string())
                .spawn(move || {
                    run_transport(listener, shutdown, writer_slot, handler);
                })
                .expect("failed to spawn transport thread"),
        );

        log::info!("debugger listening on {}", addr);
        Ok(())
    }

    /// Tear down the socket and reader thread. In-flight callbacks for
    /// commands already sent are simply never invoked.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        // Unblock a reader stuck in read_line.
        if let Some(stream) = self.writer.stream.lock().unwrap().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        *self.writer.stream.lock().unwrap() = None;
        self.bound_addr = None;
    }

    pub fn is_running(&self) -> bool {
        self.accept_handle.is_some() && !self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accept exactly one peer, then read its lines until EOF or shutdown.
fn run_transport(
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    writer_slot: Arc<Mutex<Option<TcpStream>>>,
    handler: Arc<dyn LineHandler>,
) {
    let (stream, peer) = loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        match listener.accept() {
            Ok(pair) => break pair,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                log::error!("accept failed: {}", e);
                return;
            }
        }
    };

    // One peer only: stop accepting, go blocking for reads.
    drop(listener);
    if let Err(e) = stream.set_nonblocking(false) {
        log::error!("failed to configure peer socket: {}", e);
        return;
    }

    match stream.try_clone() {
        Ok(write_half) => {
            *writer_slot.lock().unwrap() = Some(write_half);
        }
        Err(e) => {
            log::error!("failed to clone peer socket: {}", e);
            return;
        }
    }

    log::info!("debuggee connected from {}", peer);
    handler.on_connected(peer);

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if line.len() > MAX_LINE_BYTES {
                    log::warn!("oversized line ({} bytes); closing connection", line.len());
                    break;
                }
                let trimmed = line.trim_end_matches(['\n', '\r']);
                handler.on_line(trimmed);
            }
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    log::error!("read failed: {}", e);
                }
                break;
            }
        }
    }

    *writer_slot.lock().unwrap() = None;
    log::info!("debuggee disconnected");
    handler.on_disconnected();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct ChannelHandler {
        tx: Mutex<mpsc::Sender<String>>,
    }

    impl LineHandler for ChannelHandler {
        fn on_line(&self, line: &str) {
            let _ = self.tx.lock().unwrap().send(format!("line:{}", line));
        }
        fn on_connected(&self, _peer: SocketAddr) {
            let _ = self.tx.lock().unwrap().send("connected".to_string());
        }
        fn on_disconnected(&self) {
            let _ = self.tx.lock().unwrap().send("disconnected".to_string());
        }
    }

    #[test]
    fn test_accepts_one_peer_and_reads_lines() {
        let (tx, rx) = mpsc::channel();
        let mut transport = Transport::new();
        transport
            .listen(0, Arc::new(ChannelHandler { tx: Mutex::new(tx) }))
            .unwrap();
        let addr = transport.bound_addr().unwrap();

        let mut peer = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "connected"
        );

        peer.write_all(b"200 OK\n202 Paused /main.lua 3\n").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "line:200 OK"
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "line:202 Paused /main.lua 3"
        );

        drop(peer);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "disconnected"
        );
        transport.stop();
    }

    #[test]
    fn test_writer_round_trip() {
        let (tx, rx) = mpsc::channel();
        let mut transport = Transport::new();
        transport
            .listen(0, Arc::new(ChannelHandler { tx: Mutex::new(tx) }))
            .unwrap();
        let addr = transport.bound_addr().unwrap();
        let writer = transport.writer();

        // Not connected yet.
        assert!(matches!(
            writer.send_line("RUN"),
            Err(SessionError::NotConnected)
        ));

        let peer = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "connected"
        );

        writer.send_line("SETB /main.lua 3").unwrap();

        let mut reader = BufReader::new(peer);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "SETB /main.lua 3\n");
        transport.stop();
    }

    #[test]
    fn test_stop_before_any_peer() {
        let (tx, _rx) = mpsc::channel();
        let mut transport = Transport::new();
        transport
            .listen(0, Arc::new(ChannelHandler { tx: Mutex::new(tx) }))
            .unwrap();
        assert!(transport.is_running());
        transport.stop();
        assert!(!transport.is_running());
    }
}
