//! Controller-side client for a running daemon.
//!
//! Keeps one TCP session open and exchanges sealed frames over it, one
//! request at a time.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::daemon::frame::{FrameReader, FrameWriter, MAX_FRAME_BYTES};
use crate::daemon::protocol::{Request, Response};
use crate::error::{CryptoError, FrameError};
use crate::security::SessionKey;

/// Errors that can occur when talking to the daemon.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[from] std::io::Error),

    #[error("Address did not resolve: {0}")]
    Unresolved(String),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Daemon closed the connection")]
    Closed,

    #[error("Daemon reported failure: {0}")]
    Failed(String),
}

/// A client session with the daemon.
pub struct DaemonClient {
    stream: TcpStream,
    key: SessionKey,
}

impl DaemonClient {
    /// Connect to `addr` with the given read/write timeout.
    pub fn connect(
        addr: impl ToSocketAddrs,
        key: SessionKey,
        timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let target: SocketAddr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ClientError::Unresolved("no addresses".into()))?;

        let stream = match timeout {
            Some(t) => TcpStream::connect_timeout(&target, t)?,
            None => TcpStream::connect(target)?,
        };
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        stream.set_nodelay(true)?;

        Ok(Self { stream, key })
    }

    /// Send a request and wait for its reply.
    pub fn call(&mut self, request: &Request) -> Result<Response, ClientError> {
        let payload = request.to_bytes()?;
        let frame = self.key.encrypt(&payload)?;
        self.send_raw(&frame)?;
        let reply = self.recv_raw()?;
        Ok(Response::from_slice(&self.key.decrypt(&reply)?)?)
    }

    /// Send a frame body as-is.
    pub fn send_raw(&mut self, frame: &[u8]) -> Result<(), ClientError> {
        FrameWriter::new(&self.stream).write_frame(frame)?;
        Ok(())
    }

    /// Read one frame body.
    pub fn recv_raw(&mut self) -> Result<Vec<u8>, ClientError> {
        FrameReader::new(&self.stream, MAX_FRAME_BYTES)
            .read_next()?
            .ok_or(ClientError::Closed)
    }

    /// Run a shell command; returns (stdout, stderr).
    pub fn command(
        &mut self,
        cmd: &str,
        tmp_path: &Path,
        executable: Option<&str>,
    ) -> Result<(String, String), ClientError> {
        let resp = self.call(&Request::Command {
            cmd: cmd.to_string(),
            tmp_path: tmp_path.to_path_buf(),
            executable: executable.map(str::to_string),
        })?;
        let resp = into_success(resp)?;
        Ok((
            resp.stdout.unwrap_or_default(),
            resp.stderr.unwrap_or_default(),
        ))
    }

    /// Read a remote file.
    pub fn fetch(&mut self, in_path: &Path) -> Result<Vec<u8>, ClientError> {
        let resp = into_success(self.call(&Request::Fetch {
            in_path: in_path.to_path_buf(),
        })?)?;
        match resp.decoded_data() {
            Some(Ok(data)) => Ok(data),
            Some(Err(e)) => Err(ClientError::Failed(format!("bad data in reply: {}", e))),
            None => Err(ClientError::Failed("reply carried no data".into())),
        }
    }

    /// Write a remote file.
    pub fn put(&mut self, data: &[u8], out_path: &Path) -> Result<(), ClientError> {
        into_success(self.call(&Request::Put {
            data: data.to_vec(),
            out_path: out_path.to_path_buf(),
        })?)?;
        Ok(())
    }

    pub fn keepalive(&mut self) -> Result<(), ClientError> {
        into_success(self.call(&Request::Keepalive)?)?;
        Ok(())
    }
}

fn into_success(resp: Response) -> Result<Response, ClientError> {
    if resp.failed {
        Err(ClientError::Failed(resp.msg.unwrap_or_else(|| "unknown".into())))
    } else {
        Ok(resp)
    }
}
