//! TCP transport
//!
//! A plain byte stream. Whatever comes off the socket is forwarded as a
//! [`TransportEvent::Data`] chunk; queued frames are written verbatim and in
//! queue order. One task per connection owns both socket halves.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Bytes requested from the socket per read
const READ_CHUNK: usize = 1024;

/// Frames a peer may have queued before `try_send` reports `BufferFull`
const QUEUE_DEPTH: usize = 1000;

#[derive(Debug)]
enum Command {
    Write(Bytes),
    Shutdown,
}

/// Open a client connection to `addr`
pub async fn connect(addr: &str) -> Result<(TcpSender, TcpReceiver)> {
    debug!(%addr, "Opening TCP connection");

    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    Ok(attach(stream))
}

fn attach(stream: TcpStream) -> (TcpSender, TcpReceiver) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("TCP_NODELAY not set: {}", e);
    }

    let open = Arc::new(AtomicBool::new(true));
    let (command_tx, command_rx) = mpsc::channel(QUEUE_DEPTH);
    let (event_tx, event_rx) = mpsc::channel(QUEUE_DEPTH);
    let (reader, writer) = stream.into_split();

    let pump = Pump {
        reader,
        writer,
        commands: command_rx,
        events: event_tx,
        open: open.clone(),
    };
    tokio::spawn(pump.run());

    (
        TcpSender {
            commands: command_tx,
            open,
        },
        TcpReceiver { events: event_rx },
    )
}

/// Whichever side of the connection became ready first
enum Wake {
    Command(Option<Command>),
    Read(io::Result<usize>),
}

struct Pump {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl Pump {
    async fn run(mut self) {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);

        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                read = self.reader.read_buf(&mut buf) => Wake::Read(read),
            };

            let last = match wake {
                Wake::Command(Some(Command::Write(frame))) => {
                    match self.writer.write_all(&frame).await {
                        Ok(()) => continue,
                        Err(e) => {
                            error!("TCP write failed: {}", e);
                            TransportEvent::Error(e.to_string())
                        }
                    }
                }
                // Sender side dropped or closed; everything queued before
                // the shutdown has already been written
                Wake::Command(Some(Command::Shutdown) | None) => {
                    let _ = self.writer.shutdown().await;
                    debug!("TCP connection closed locally");
                    TransportEvent::Disconnected {
                        reason: Some("closed locally".into()),
                    }
                }
                Wake::Read(Ok(0)) => {
                    debug!("TCP connection closed by peer");
                    TransportEvent::Disconnected { reason: None }
                }
                Wake::Read(Ok(_)) => {
                    let chunk = buf.split().freeze();
                    buf.reserve(READ_CHUNK);
                    if self.events.send(TransportEvent::Data(chunk)).await.is_err() {
                        self.open.store(false, Ordering::SeqCst);
                        return;
                    }
                    continue;
                }
                Wake::Read(Err(e)) => {
                    error!("TCP read failed: {}", e);
                    TransportEvent::Error(e.to_string())
                }
            };

            self.open.store(false, Ordering::SeqCst);
            let _ = self.events.send(last).await;
            return;
        }
    }
}

/// Write half of a TCP connection
#[derive(Clone)]
pub struct TcpSender {
    commands: mpsc::Sender<Command>,
    open: Arc<AtomicBool>,
}

impl TcpSender {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.commands
            .send(Command::Write(data))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn try_send(&self, data: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.commands
            .try_send(Command::Write(data))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
            })
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // Queued behind pending writes, so earlier frames go out first
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// Read half of a TCP connection
pub struct TcpReceiver {
    events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

/// Listening socket handing out raw byte-stream connections
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("TCP server listening on {}", addr);
        Ok(Self { listener })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        debug!(%peer, "TCP connection accepted");

        let (sender, receiver) = attach(stream);
        Ok((sender, receiver, peer))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_raw_bytes() {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let echo = tokio::spawn(async move {
            let (sender, mut receiver, _peer) = server.accept().await.unwrap();
            if let Some(TransportEvent::Data(data)) = receiver.recv().await {
                sender.send(data).await.unwrap();
            }
            (sender, receiver)
        });

        let (client_sender, mut client_receiver) = connect(&addr.to_string()).await.unwrap();
        client_sender
            .send(Bytes::from_static(b"PING\r\n"))
            .await
            .unwrap();

        match client_receiver.recv().await {
            Some(TransportEvent::Data(received)) => assert_eq!(&received[..], b"PING\r\n"),
            other => panic!("Expected Data event, got {:?}", other),
        }

        client_sender.close().await.unwrap();
        let _ = echo.await;
    }

    #[tokio::test]
    async fn test_close_flushes_queued_frames() {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let accepted = tokio::spawn(async move {
            let (sender, _receiver, _peer) = server.accept().await.unwrap();
            sender.try_send(Bytes::from_static(b"first\r\n")).unwrap();
            sender.try_send(Bytes::from_static(b"second\r\n")).unwrap();
            sender.close().await.unwrap();
            assert!(!sender.is_connected());
            assert!(matches!(
                sender.try_send(Bytes::from_static(b"late")),
                Err(TransportError::NotConnected)
            ));
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"first\r\nsecond\r\n");

        accepted.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_close_is_noop() {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (sender, _receiver, _) = server.accept().await.unwrap();

        sender.close().await.unwrap();
        sender.close().await.unwrap();
        assert!(!sender.is_connected());
    }
}
