//! Common test helpers for gnat tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A broker fixture bound to an ephemeral port, stopped on drop
//! - A raw protocol client speaking the wire format line by line
//! - A recording transport sender for driving sessions without sockets

use async_trait::async_trait;
use bytes::Bytes;
use gnat_broker::{Broker, BrokerConfig};
use gnat_core::ServerInfo;
use gnat_transport::{Result as TransportResult, TcpServer, TransportError, TransportSender, TransportServer};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait until a synchronous predicate holds
pub async fn wait_until<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    wait_for(|| std::future::ready(check()), DEFAULT_CHECK_INTERVAL, max_wait).await
}

// ============================================================================
// Test Broker - RAII wrapper with proper cleanup
// ============================================================================

/// A broker serving on an ephemeral localhost port, stopped on drop
pub struct TestBroker {
    broker: Broker,
    addr: SocketAddr,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestBroker {
    /// Start a test broker with default configuration
    pub async fn start() -> Self {
        Self::start_with_config(BrokerConfig {
            name: "test-broker".to_string(),
            listen: "127.0.0.1:0".to_string(),
            ..Default::default()
        })
        .await
    }

    /// Start a test broker with custom configuration. `listen` is ignored.
    pub async fn start_with_config(config: BrokerConfig) -> Self {
        let server = TcpServer::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = server.local_addr().expect("test listener address");

        let broker = Broker::new(config);
        let serving = broker.clone();
        let handle = tokio::spawn(async move {
            let _ = serving.serve_on(server).await;
        });

        let ready = wait_until(|| broker.local_addr().is_some(), DEFAULT_TIMEOUT).await;
        assert!(ready, "test broker did not start");

        Self {
            broker,
            addr,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Connect a raw protocol client
    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    /// Connect a client and complete the CONNECT / PING / PONG handshake
    pub async fn connect_ready(&self) -> TestClient {
        let mut client = self.connect().await;
        client.handshake().await;
        client
    }

    /// Stop the broker explicitly (also happens on drop)
    pub fn stop(&mut self) {
        self.broker.stop();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Test Client - raw wire protocol
// ============================================================================

/// A client speaking the text protocol directly over TCP
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    info: Option<ServerInfo>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to broker");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            info: None,
        }
    }

    /// Write raw bytes
    pub async fn send(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.expect("write to broker");
        self.writer.flush().await.expect("flush to broker");
    }

    /// Read one line without its terminator. `None` on timeout or EOF.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match timeout(DEFAULT_TIMEOUT, self.reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            _ => None,
        }
    }

    /// Read exactly `n` bytes
    pub async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        timeout(DEFAULT_TIMEOUT, self.reader.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .expect("read from broker");
        buf
    }

    /// Read a line and assert its contents
    pub async fn expect_line(&mut self, expected: &str) {
        let line = self.read_line().await;
        assert_eq!(line.as_deref(), Some(expected));
    }

    /// Read a `MSG` frame, returning `(subject, subscriber_id, payload)`
    pub async fn expect_msg(&mut self) -> (String, u32, Vec<u8>) {
        let header = self.read_line().await.expect("MSG header");
        let parts: Vec<&str> = header.split(' ').collect();
        assert_eq!(parts.len(), 4, "malformed MSG header: {header}");
        assert_eq!(parts[0], "MSG");
        let sid: u32 = parts[2].parse().expect("subscriber id");
        let len: usize = parts[3].parse().expect("payload length");
        let payload = self.read_exact(len).await;
        assert_eq!(self.read_exact(2).await, b"\r\n");
        (parts[1].to_string(), sid, payload)
    }

    /// Read and decode the `INFO` line
    pub async fn read_info(&mut self) -> ServerInfo {
        let line = self.read_line().await.expect("INFO line");
        let json = line.strip_prefix("INFO ").expect("INFO prefix");
        let info: ServerInfo = serde_json::from_str(json).expect("INFO json");
        self.info = Some(info.clone());
        info
    }

    /// `INFO` as received during the handshake
    pub fn info(&self) -> Option<&ServerInfo> {
        self.info.as_ref()
    }

    /// Consume INFO, send CONNECT, answer the broker's PING
    pub async fn handshake(&mut self) {
        self.read_info().await;
        self.send(b"CONNECT {\"verbose\":true}\r\n").await;
        self.expect_line("+OK").await;
        self.expect_line("PING").await;
        self.send(b"PONG\r\n").await;
    }

    /// Wait for the broker to close the connection
    pub async fn expect_closed(&mut self) -> bool {
        let mut buf = Vec::new();
        matches!(
            timeout(DEFAULT_TIMEOUT, self.reader.read_to_end(&mut buf)).await,
            Ok(Ok(_))
        )
    }
}

// ============================================================================
// Recording Sender - transport double
// ============================================================================

/// A [`TransportSender`] that records every frame instead of writing it
#[derive(Clone, Default)]
pub struct RecordingSender {
    frames: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<AtomicBool>,
    close_calls: Arc<AtomicUsize>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent so far
    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    /// Everything sent so far, concatenated, as text
    pub fn output(&self) -> String {
        let frames = self.frames.lock();
        frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    /// Drain and return the text sent so far
    pub fn take_output(&self) -> String {
        let output = self.output();
        self.frames.lock().clear();
        output
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSender for RecordingSender {
    async fn send(&self, data: Bytes) -> TransportResult<()> {
        self.try_send(data)
    }

    fn try_send(&self, data: Bytes) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }
        self.frames.lock().push(data);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    async fn close(&self) -> TransportResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
