//! TCP transport tests
//!
//! The transport must not frame or reorder anything: whatever the peer
//! writes arrives as a byte stream, chunk boundaries notwithstanding.

use bytes::Bytes;
use gnat_transport::{
    connect, TcpServer, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

async fn collect_bytes(receiver: &mut impl TransportReceiver, expected_len: usize) -> Vec<u8> {
    let mut collected = Vec::new();
    while collected.len() < expected_len {
        match timeout(Duration::from_secs(2), receiver.recv()).await {
            Ok(Some(TransportEvent::Data(data))) => collected.extend_from_slice(&data),
            other => panic!("Unexpected event: {:?}", other),
        }
    }
    collected
}

#[tokio::test]
async fn test_inbound_stream_preserved_across_writes() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    let (_sender, mut receiver, peer) = server.accept().await.unwrap();
    assert_eq!(peer, client.local_addr().unwrap());

    let parts: [&[u8]; 4] = [b"PUB foo.", b"bar 5\r", b"\nhel", b"lo\r\n"];
    for part in parts {
        client.write_all(part).await.unwrap();
        client.flush().await.unwrap();
    }

    let expected = b"PUB foo.bar 5\r\nhello\r\n";
    let collected = collect_bytes(&mut receiver, expected.len()).await;
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn test_large_write_arrives_in_order() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    let (_sender, mut receiver, _) = server.accept().await.unwrap();

    // Larger than a single socket read
    let payload: Vec<u8> = (0..16 * 1024).map(|i| (i % 251) as u8).collect();
    client.write_all(&payload).await.unwrap();

    let collected = collect_bytes(&mut receiver, payload.len()).await;
    assert_eq!(collected, payload);
}

#[tokio::test]
async fn test_peer_disconnect_reported() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let (client_sender, _client_receiver) = connect(&addr.to_string()).await.unwrap();
    let (_sender, mut receiver, _) = server.accept().await.unwrap();

    client_sender.close().await.unwrap();

    match timeout(Duration::from_secs(2), receiver.recv()).await {
        Ok(Some(TransportEvent::Disconnected { .. })) => {}
        other => panic!("Expected Disconnected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_after_close_fails() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let _client = TcpStream::connect(addr).await.unwrap();
    let (sender, _receiver, _) = server.accept().await.unwrap();

    assert!(sender.is_connected());
    sender.close().await.unwrap();
    assert!(!sender.is_connected());
    assert!(sender.send(Bytes::from_static(b"+OK\r\n")).await.is_err());
}
