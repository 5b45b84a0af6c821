//! Transport integration tests

use bytes::{Bytes, BytesMut};
use supla_core::proto::TimeVal;
use supla_core::{Frame, Message};
use supla_transport::{
    TcpServer, TcpTransport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

fn ping_wire(rr_id: u32) -> Bytes {
    let msg = Message::PingServer(TimeVal {
        tv_sec: 1,
        tv_usec: 2,
    });
    Frame::new(rr_id, msg.call(), msg.encode().unwrap())
        .encode()
        .unwrap()
}

async fn expect_frame(receiver: &mut impl TransportReceiver) -> Frame {
    match receiver.recv().await {
        Some(TransportEvent::Frame(data)) => {
            let mut buf = BytesMut::from(data.as_ref());
            Frame::decode(&mut buf).expect("frame decode failed")
        }
        other => panic!("expected Frame event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tcp_frame_echo() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let accept_handle = tokio::spawn(async move {
        let (sender, mut receiver, _peer) = server.accept().await.unwrap();
        let frame = expect_frame(&mut receiver).await;
        assert_eq!(frame.rr_id, 1);
        sender.send(ping_wire(2)).await.unwrap();
        receiver
    });

    let transport = TcpTransport::new();
    let (sender, mut receiver) = transport.connect(&addr.to_string()).await.unwrap();
    sender.send(ping_wire(1)).await.unwrap();

    let reply = expect_frame(&mut receiver).await;
    assert_eq!(reply.rr_id, 2);

    sender.close().await.unwrap();
    let _ = accept_handle.await;
}

#[tokio::test]
async fn test_tcp_split_write_reassembled() {
    // A frame arriving a few bytes at a time must come out whole.
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let accept_handle = tokio::spawn(async move {
        let (_sender, mut receiver, _peer) = server.accept().await.unwrap();
        let frame = expect_frame(&mut receiver).await;
        assert_eq!(frame.rr_id, 7);
    });

    use tokio::io::AsyncWriteExt;
    let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
    let wire = ping_wire(7);
    for chunk in wire.chunks(3) {
        raw.write_all(chunk).await.unwrap();
        raw.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    accept_handle.await.unwrap();
}

#[tokio::test]
async fn test_tcp_garbage_disconnects() {
    let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let accept_handle = tokio::spawn(async move {
        let (_sender, mut receiver, _peer) = server.accept().await.unwrap();
        match receiver.recv().await {
            Some(TransportEvent::Disconnected { reason }) => {
                assert!(reason.is_some());
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
    });

    use tokio::io::AsyncWriteExt;
    let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    accept_handle.await.unwrap();
}

#[cfg(feature = "tls")]
mod tls {
    use super::*;
    use std::io::Write;
    use supla_transport::{load_server_config, TlsServer, TlsTransport};

    fn self_signed_pems() -> (tempfile::NamedTempFile, tempfile::NamedTempFile) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("certificate generation failed");

        let mut cert_file = tempfile::NamedTempFile::new().unwrap();
        cert_file.write_all(certified.cert.pem().as_bytes()).unwrap();
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        key_file
            .write_all(certified.key_pair.serialize_pem().as_bytes())
            .unwrap();
        (cert_file, key_file)
    }

    #[tokio::test]
    async fn test_tls_frame_echo() {
        let (cert_file, key_file) = self_signed_pems();
        let tls = load_server_config(cert_file.path(), key_file.path()).unwrap();

        let mut server = TlsServer::bind("127.0.0.1:0", tls).await.unwrap();
        let addr = server.local_addr().unwrap();

        let accept_handle = tokio::spawn(async move {
            let (sender, mut receiver, _peer) = server.accept().await.unwrap();
            let frame = expect_frame(&mut receiver).await;
            sender.send(ping_wire(frame.rr_id + 1)).await.unwrap();
        });

        let transport = TlsTransport::new_insecure();
        let (sender, mut receiver) = transport
            .connect(&format!("localhost:{}", addr.port()))
            .await
            .unwrap();
        sender.send(ping_wire(10)).await.unwrap();

        let reply = expect_frame(&mut receiver).await;
        assert_eq!(reply.rr_id, 11);

        accept_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_tls_stalled_peer_does_not_block_accept() {
        let (cert_file, key_file) = self_signed_pems();
        let tls = load_server_config(cert_file.path(), key_file.path()).unwrap();

        let mut server = TlsServer::bind("127.0.0.1:0", tls).await.unwrap();
        let addr = server.local_addr().unwrap();

        // Opens TCP but never sends a ClientHello
        let _stalled = tokio::net::TcpStream::connect(addr).await.unwrap();

        let transport = TlsTransport::new_insecure();
        let (sender, _receiver) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            transport.connect(&format!("localhost:{}", addr.port())),
        )
        .await
        .expect("handshake queued behind a stalled peer")
        .unwrap();

        let (_server_sender, mut server_receiver, _peer) =
            tokio::time::timeout(std::time::Duration::from_secs(2), server.accept())
                .await
                .expect("accept starved by a stalled handshake")
                .unwrap();

        sender.send(ping_wire(3)).await.unwrap();
        let frame = expect_frame(&mut server_receiver).await;
        assert_eq!(frame.rr_id, 3);
    }
}
