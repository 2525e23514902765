//! End-to-end tests: a real server on loopback driven through the client.

use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fireline::client::{ClientError, DaemonClient};
use fireline::daemon::protocol::Response;
use fireline::daemon::server::{Server, ShutdownHandle};
use fireline::daemon::ttl::Watchdog;
use fireline::security::SessionKey;
use serde_json::json;

const KEY: [u8; 32] = [42u8; 32];

fn key() -> SessionKey {
    SessionKey::from_bytes(&KEY).unwrap()
}

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    worker: Option<JoinHandle<()>>,
}

impl Running {
    fn start() -> Self {
        Self::start_with(Server::bind("127.0.0.1:0".parse().unwrap(), key()).unwrap())
    }

    fn start_with(server: Server) -> Self {
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let worker = thread::spawn(move || server.serve().unwrap());
        Self {
            addr,
            shutdown,
            worker: Some(worker),
        }
    }

    fn client(&self) -> DaemonClient {
        DaemonClient::connect(self.addr, key(), Some(Duration::from_secs(10))).unwrap()
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn raw_call(client: &mut DaemonClient, value: serde_json::Value) -> Response {
    let frame = key().encrypt(value.to_string().as_bytes()).unwrap();
    client.send_raw(&frame).unwrap();
    let reply = client.recv_raw().unwrap();
    Response::from_slice(&key().decrypt(&reply).unwrap()).unwrap()
}

#[test]
fn test_echo_over_the_wire() {
    let daemon = Running::start();
    let mut client = daemon.client();

    let (stdout, stderr) = client.command("echo hi", Path::new("/tmp"), None).unwrap();
    assert_eq!(stdout, "hi\n");
    assert_eq!(stderr, "");
}

#[test]
fn test_put_then_fetch_round_trip() {
    let daemon = Running::start();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.bin");
    let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    let mut client = daemon.client();
    client.put(&data, &path).unwrap();
    assert_eq!(client.fetch(&path).unwrap(), data);
}

#[test]
fn test_missing_fields_reported_per_mode() {
    let daemon = Running::start();
    let mut client = daemon.client();

    let cases = [
        (json!({"mode": "command", "tmp_path": "/tmp"}), "cmd"),
        (json!({"mode": "command", "cmd": "true"}), "tmp_path"),
        (json!({"mode": "fetch", "data": ""}), "in_path"),
        (json!({"mode": "put", "out_path": "/tmp/x"}), "data"),
        (json!({"mode": "put", "data": ""}), "out_path"),
    ];
    for (request, field) in cases {
        let resp = raw_call(&mut client, request);
        assert!(resp.failed);
        assert_eq!(resp.msg.unwrap(), format!("missing required field: {}", field));
    }
}

#[test]
fn test_unknown_mode_is_explicit_failure() {
    let daemon = Running::start();
    let mut client = daemon.client();

    let resp = raw_call(&mut client, json!({"mode": "validate_user", "username": "root"}));
    assert_eq!(resp, Response::failure("unsupported mode: validate_user"));
}

#[test]
fn test_tampered_frame_dropped_and_loop_continues() {
    let daemon = Running::start();
    let mut client = daemon.client();

    let mut tampered = key().encrypt(b"{\"mode\":\"keepalive\"}").unwrap();
    tampered[20] ^= 0x01;
    client.send_raw(&tampered).unwrap();

    // The next reply on this connection answers the valid request, so the
    // tampered frame got none.
    let resp = raw_call(&mut client, json!({"mode": "fetch", "in_path": "/nonexistent/x"}));
    assert!(resp.failed);
    assert!(resp.msg.unwrap().contains("/nonexistent/x"));
}

#[test]
fn test_wrong_key_gets_no_reply() {
    let daemon = Running::start();
    let other = SessionKey::from_bytes(&[1u8; 32]).unwrap();
    let mut client =
        DaemonClient::connect(daemon.addr, other, Some(Duration::from_millis(300))).unwrap();

    match client.keepalive() {
        Err(ClientError::Frame(_)) => {}
        other => panic!("expected read timeout, got {:?}", other.map(|_| ())),
    }

    // Daemon still serves a correctly keyed peer afterwards
    drop(client);
    daemon.client().keepalive().unwrap();
}

#[test]
fn test_silent_peer_does_not_hold_the_channel() {
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), key())
        .unwrap()
        .with_idle_timeout(Duration::from_millis(300));
    let daemon = Running::start_with(server);

    // Connects first and never sends a frame
    let silent = TcpStream::connect(daemon.addr).unwrap();

    let mut client = daemon.client();
    client.keepalive().unwrap();
    drop(silent);
}

#[test]
fn test_sequential_peers() {
    let daemon = Running::start();
    for _ in 0..3 {
        let mut client = daemon.client();
        client.keepalive().unwrap();
    }
}

#[test]
fn test_ttl_closes_listener() {
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), key()).unwrap();
    let addr = server.local_addr();
    let watchdog = Watchdog::spawn(
        Duration::from_millis(500),
        Duration::from_secs(60),
        server.shutdown_handle(),
        None,
    );

    let worker = thread::spawn(move || {
        server.serve().unwrap();
    });

    // A connected peer is cut off by expiry too
    let mut client = DaemonClient::connect(addr, key(), Some(Duration::from_secs(5))).unwrap();
    client.keepalive().unwrap();

    worker.join().unwrap();
    assert!(watchdog.fired());
    watchdog.disarm();

    assert!(client.keepalive().is_err());
    assert!(TcpStream::connect(addr).is_err());
}
