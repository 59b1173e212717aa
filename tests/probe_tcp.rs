//! Probe behaviour against real sockets.

mod common;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tcp_routing_verify::error::ProbeError;
use tcp_routing_verify::probe::{ProbeRequest, BUFFER_SIZE};
use tcp_routing_verify::{Endpoint, ProbeConfig, Prober, TcpProber};

use common::{backend, closed_endpoint};

fn quick() -> ProbeConfig {
    ProbeConfig {
        connect_timeout: Duration::from_millis(500),
        rw_timeout: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn probe_returns_tagged_echo() {
    let receiver = backend("server1").await;
    let prober = TcpProber::new(quick());

    let response = prober.probe(&receiver.endpoint()).await.unwrap();
    let text = std::str::from_utf8(&response).unwrap();
    assert!(text.starts_with("server1:Time is "), "{text}");
    assert_eq!(receiver.accepted(), 1);
}

#[tokio::test]
async fn every_probe_uses_a_fresh_connection() {
    let receiver = backend("server1").await;
    let prober = TcpProber::new(quick());
    for _ in 0..3 {
        prober.probe(&receiver.endpoint()).await.unwrap();
    }
    assert_eq!(receiver.accepted(), 3);
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let endpoint = closed_endpoint().await;
    let err = TcpProber::new(quick()).probe(&endpoint).await.unwrap_err();
    assert!(err.is_connect(), "{err}");
    assert_eq!(err.endpoint(), &endpoint);
}

#[tokio::test]
async fn silent_peer_is_a_read_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let err = TcpProber::new(quick()).probe(&endpoint).await.unwrap_err();
    match err {
        ProbeError::Read { source, .. } => {
            assert_eq!(source.kind(), std::io::ErrorKind::TimedOut)
        }
        other => panic!("expected read error, got {other}"),
    }
}

#[tokio::test]
async fn closed_without_response_is_a_read_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf).await;
    });

    let err = TcpProber::new(quick()).probe(&endpoint).await.unwrap_err();
    assert!(matches!(err, ProbeError::Read { .. }), "{err}");
    assert!(!err.is_connect());
}

#[tokio::test]
async fn short_response_is_returned_as_is() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf).await;
        stream.write_all(b"a:").await.unwrap();
    });

    let response = TcpProber::new(quick()).probe(&endpoint).await.unwrap();
    assert_eq!(&response[..], b"a:");
}

#[tokio::test]
async fn response_is_capped_at_buffer_size() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf).await;
        let _ = stream.write_all(&vec![b'x'; BUFFER_SIZE * 4]).await;
    });

    let response = TcpProber::new(quick()).probe(&endpoint).await.unwrap();
    assert!(!response.is_empty());
    assert!(response.len() <= BUFFER_SIZE);
}

#[tokio::test]
async fn request_sends_its_payload() {
    let receiver = tcp_routing_verify::receiver::SampleReceiver::bind("127.0.0.1:0", None)
        .await
        .unwrap();

    let mut request = ProbeRequest::tagged(receiver.endpoint(), quick());
    request.payload = bytes::Bytes::from_static(b"hello");
    assert_eq!(&request.send().await.unwrap()[..], b"hello");
}
