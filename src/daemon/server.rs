//! TCP listener for daemon mode.
//!
//! Binds a single-peer request/reply endpoint. One peer is served at a time;
//! each frame from that peer is decrypted, dispatched to `DaemonService` and
//! answered before the next frame is read. Frames that fail authentication
//! are dropped without a reply and the loop keeps reading.
//!
//! A peer that sends nothing for `DEFAULT_IDLE_TIMEOUT` is disconnected so the
//! channel is free for the next one. The timeout only covers socket reads; a
//! command still running in the dispatcher is not cut short.
//!
//! CHANGELOG:
//! - 10/19/2026 - Idle peer timeout, oversized replies become failures
//! - 10/19/2026 - Shutdown handle for TTL expiry
//! - 10/19/2026 - Initial implementation

use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, debug_span, error, info, info_span, warn};

use crate::config::DEFAULT_IDLE_TIMEOUT_SECS;
use crate::daemon::frame::{FrameReader, FrameWriter, MAX_FRAME_BYTES};
use crate::daemon::protocol::Response;
use crate::daemon::service::DaemonService;
use crate::error::{DaemonError, FrameError, Result};
use crate::security::{SessionKey, NONCE_LEN, TAG_LEN};

/// How long a connected peer may stay silent before it is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS);

/// Daemon server listening on a TCP port.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    key: SessionKey,
    service: DaemonService,
    shutdown: ShutdownHandle,
    idle_timeout: Duration,
    max_frame_bytes: usize,
}

impl Server {
    /// Bind the listening socket. Fails if the port cannot be bound.
    pub fn bind(addr: SocketAddr, key: SessionKey) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| DaemonError::Infrastructure(format!("cannot bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            key,
            service: DaemonService::new(),
            shutdown: ShutdownHandle::new(local_addr),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_frame_bytes: MAX_FRAME_BYTES,
        })
    }

    /// Override how long a silent peer keeps the channel.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Lower the frame size limit for both directions (capped at
    /// `MAX_FRAME_BYTES`).
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes.min(MAX_FRAME_BYTES);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle used to stop `serve` from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept peers sequentially until shutdown is requested (blocking).
    pub fn serve(&self) -> Result<()> {
        info!(addr = %self.local_addr, started_at = self.service.started_at(), "daemon listening");

        for stream in self.listener.incoming() {
            if self.shutdown.is_requested() {
                break;
            }
            match stream {
                Ok(stream) => {
                    if let Err(e) = self.handle_peer(stream) {
                        warn!(error = %e, "peer session ended with error");
                    }
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
            if self.shutdown.is_requested() {
                break;
            }
        }

        info!("listener closed");
        Ok(())
    }

    /// Serve every frame one peer sends until it disconnects.
    fn handle_peer(&self, stream: TcpStream) -> Result<()> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let span = info_span!("peer", %peer);
        let _enter = span.enter();

        stream.set_read_timeout(Some(self.idle_timeout))?;
        self.shutdown.attach(stream.try_clone()?);
        if self.shutdown.is_requested() {
            self.shutdown.detach();
            return Ok(());
        }
        debug!("peer connected");

        let result = self.exchange(&stream);
        self.shutdown.detach();
        debug!("peer disconnected");
        result
    }

    fn exchange(&self, stream: &TcpStream) -> Result<()> {
        let mut reader = FrameReader::new(BufReader::new(stream), self.max_frame_bytes);
        let mut writer = FrameWriter::new(stream);

        loop {
            let frame = match reader.read_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(FrameError::Io(e)) if is_idle(&e) => {
                    info!(idle_secs = self.idle_timeout.as_secs_f64(), "dropping idle peer");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(reply) = self.process_frame(&frame)? {
                writer.write_frame(&reply)?;
            }
            if self.shutdown.is_requested() {
                break;
            }
        }
        Ok(())
    }

    /// Decrypt one frame, dispatch it, and seal the reply.
    ///
    /// Returns `Ok(None)` when the frame fails authentication; such frames
    /// get no reply. A reply that would not fit in one frame is replaced by
    /// a failure Response.
    pub fn process_frame(&self, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        let _guard = debug_span!("request", id = %uuid::Uuid::new_v4()).entered();

        let plaintext = match self.key.decrypt(frame) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, bytes = frame.len(), "dropping frame");
                return Ok(None);
            }
        };

        let response = self.service.handle_payload(&plaintext);
        let mut body = response.to_bytes()?;
        let sealed_len = body.len() + NONCE_LEN + TAG_LEN;
        if sealed_len > self.max_frame_bytes {
            warn!(bytes = sealed_len, max = self.max_frame_bytes, "reply exceeds frame limit");
            body = Response::failure(format!(
                "response too large: {} bytes exceeds the {} byte frame limit",
                sealed_len, self.max_frame_bytes
            ))
            .to_bytes()?;
        }
        Ok(Some(self.key.encrypt(&body)?))
    }
}

/// A read that hit the peer's read timeout.
fn is_idle(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Stops a running `Server` from another thread.
///
/// Triggering sets the stop flag, shuts down the attached peer stream (which
/// unblocks a pending read), and connects once to the listener to unblock a
/// pending accept.
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownState>,
}

struct ShutdownState {
    requested: AtomicBool,
    peer: Mutex<Option<TcpStream>>,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    fn new(local_addr: SocketAddr) -> Self {
        // Wildcard binds are reached through loopback
        let ip = match local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Self {
            inner: Arc::new(ShutdownState {
                requested: AtomicBool::new(false),
                peer: Mutex::new(None),
                wake_addr: SocketAddr::new(ip, local_addr.port()),
            }),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);

        if let Some(peer) = self.peer_slot().take() {
            let _ = peer.shutdown(Shutdown::Both);
        }
        let _ = TcpStream::connect_timeout(&self.inner.wake_addr, Duration::from_secs(1));
    }

    fn attach(&self, stream: TcpStream) {
        *self.peer_slot() = Some(stream);
    }

    fn detach(&self) {
        self.peer_slot().take();
    }

    fn peer_slot(&self) -> std::sync::MutexGuard<'_, Option<TcpStream>> {
        self.inner
            .peer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::protocol::Response;
    use serde_json::json;

    fn server() -> Server {
        let key = SessionKey::from_bytes(&[3u8; 32]).unwrap();
        Server::bind("127.0.0.1:0".parse().unwrap(), key).unwrap()
    }

    #[test]
    fn test_process_frame_round_trip() {
        let server = server();
        let key = SessionKey::from_bytes(&[3u8; 32]).unwrap();
        let frame = key
            .encrypt(json!({"mode": "keepalive"}).to_string().as_bytes())
            .unwrap();

        let reply = server.process_frame(&frame).unwrap().unwrap();
        let resp = Response::from_slice(&key.decrypt(&reply).unwrap()).unwrap();
        assert_eq!(resp, Response::empty());
    }

    #[test]
    fn test_tampered_frame_dropped() {
        let server = server();
        let key = SessionKey::from_bytes(&[3u8; 32]).unwrap();
        let mut frame = key.encrypt(b"{\"mode\":\"keepalive\"}").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x80;

        assert!(server.process_frame(&frame).unwrap().is_none());
    }

    #[test]
    fn test_malformed_payload_gets_failure_reply() {
        let server = server();
        let key = SessionKey::from_bytes(&[3u8; 32]).unwrap();
        let frame = key.encrypt(b"not json").unwrap();

        let reply = server.process_frame(&frame).unwrap().unwrap();
        let resp = Response::from_slice(&key.decrypt(&reply).unwrap()).unwrap();
        assert!(resp.failed);
        assert!(resp.msg.unwrap().starts_with("malformed request"));
    }

    #[test]
    fn test_oversized_reply_becomes_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![7u8; 2048]).unwrap();

        let server = server().with_max_frame_bytes(1024);
        let key = SessionKey::from_bytes(&[3u8; 32]).unwrap();
        let request = json!({"mode": "fetch", "in_path": path, "data": ""});
        let frame = key.encrypt(request.to_string().as_bytes()).unwrap();

        let reply = server.process_frame(&frame).unwrap().unwrap();
        assert!(reply.len() <= 1024);
        let resp = Response::from_slice(&key.decrypt(&reply).unwrap()).unwrap();
        assert!(resp.failed);
        assert!(resp.msg.unwrap().starts_with("response too large"));
    }

    #[test]
    fn test_idle_peer_read_is_recognised() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::WouldBlock, "timed out");
        assert!(is_idle(&timed_out));
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(!is_idle(&eof));
    }

    #[test]
    fn test_bind_conflict_is_infrastructure_error() {
        let first = server();
        let key = SessionKey::from_bytes(&[3u8; 32]).unwrap();
        let err = Server::bind(first.local_addr(), key).err().unwrap();
        assert!(matches!(err, DaemonError::Infrastructure(_)));
    }

    #[test]
    fn test_shutdown_unblocks_serve() {
        let server = server();
        let handle = server.shutdown_handle();
        let worker = std::thread::spawn(move || server.serve());

        std::thread::sleep(Duration::from_millis(50));
        handle.trigger();
        worker.join().unwrap().unwrap();
        assert!(handle.is_requested());
    }
}
