use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use noise_secure_channel::cache::InMemoryStaticKeyCache;
use noise_secure_channel::cipher_state::CipherState;
use noise_secure_channel::driver;
use noise_secure_channel::error::Error;
use noise_secure_channel::facade::{secure_inbound, secure_outbound, NoiseConfig};
use noise_secure_channel::frame::{read_frame, write_frame};
use noise_secure_channel::handshake_state::Pattern;
use noise_secure_channel::cache::StaticKeyCache;
use noise_secure_channel::identity::{Ed25519Codec, Ed25519Identity, IdentityKeyCodec, LocalIdentity, PeerId};
use noise_secure_channel::metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
use noise_secure_channel::primitives::DhKeyPair;
use noise_secure_channel::transport::SecureStream;

/// Wraps a duplex half, mirroring every byte written to it into a shared
/// buffer, so a test can reconstruct exactly how many length-prefixed frames
/// crossed the wire in one direction.
struct RecordingIo {
    inner: DuplexStream,
    written: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for RecordingIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.written.lock().unwrap().extend_from_slice(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl AsyncRead for RecordingIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

fn count_frames(bytes: &[u8]) -> usize {
    let mut count = 0;
    let mut rest = bytes;
    while rest.len() >= 2 {
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        if rest.len() < 2 + len {
            break;
        }
        count += 1;
        rest = &rest[2 + len..];
    }
    count
}

fn counter_value(name: &str) -> i64 {
    for family in PrometheusMetrics::registry().gather() {
        if family.get_name() == name {
            return family.get_metric()[0].get_counter().value() as i64;
        }
    }
    0
}

struct Peer {
    identity: Ed25519Identity,
    static_keypair: DhKeyPair,
    peer_id: PeerId,
}

fn new_peer() -> Peer {
    let identity = Ed25519Identity::generate();
    let peer_id = identity.peer_id();
    Peer {
        identity,
        static_keypair: DhKeyPair::generate(),
        peer_id,
    }
}

#[tokio::test]
async fn scenario_1_xx_loopback_plaintext_roundtrip_and_metrics() {
    let client = new_peer();
    let server = new_peer();
    let (client_io, server_io) = tokio::io::duplex(1 << 16);

    let client_config = NoiseConfig::new(client.static_keypair).with_noise_pipes(false);
    let server_config = NoiseConfig::new(server.static_keypair).with_noise_pipes(false);

    let successes_before = counter_value("libp2p_noise_xxhandshake_successes_total");
    let errors_before = counter_value("libp2p_noise_xxhandshake_error_total");
    let encrypted_before = counter_value("libp2p_noise_encrypted_packets_total");
    let decrypt_errors_before = counter_value("libp2p_noise_decrypt_errors_total");

    let client_fut = secure_outbound(&client_config, &client.identity, client_io, &server.peer_id);
    let server_fut = secure_inbound(&server_config, &server.identity, server_io, None);
    let (client_conn, server_conn) = tokio::join!(client_fut, server_fut);
    let mut client_conn = client_conn.unwrap();
    let mut server_conn = server_conn.unwrap();

    client_conn.conn.send(b"test").await.unwrap();
    let received = server_conn.conn.recv().await.unwrap().unwrap();
    assert_eq!(received, b"test");

    assert_eq!(
        counter_value("libp2p_noise_xxhandshake_successes_total"),
        successes_before + 2 // both sides completed an XX handshake
    );
    assert_eq!(
        counter_value("libp2p_noise_xxhandshake_error_total"),
        errors_before
    );
    assert_eq!(
        counter_value("libp2p_noise_encrypted_packets_total"),
        encrypted_before + 1
    );
    assert_eq!(
        counter_value("libp2p_noise_decrypt_errors_total"),
        decrypt_errors_before
    );
}

#[tokio::test]
async fn scenario_2_identity_mismatch_rejects_before_any_secured_duplex() {
    let client = new_peer();
    let server = new_peer();
    let wrong_peer = PeerId::from_public_key_bytes(b"peer-a-not-the-real-server");
    let (client_io, server_io) = tokio::io::duplex(1 << 16);

    let client_config = NoiseConfig::new(client.static_keypair).with_noise_pipes(false);
    let server_config = NoiseConfig::new(server.static_keypair).with_noise_pipes(false);

    let client_fut = secure_outbound(&client_config, &client.identity, client_io, &wrong_peer);
    let server_fut = secure_inbound(&server_config, &server.identity, server_io, None);
    let (client_result, _server_result) = tokio::join!(client_fut, server_fut);

    assert!(matches!(client_result, Err(Error::PeerMismatch)));
}

#[tokio::test]
async fn scenario_3_tampered_record_fails_decrypt_and_increments_counter() {
    let key_a = [5u8; 32];
    let key_b = [9u8; 32];
    let a_send = CipherState::new(key_a);
    let b_recv = CipherState::new(key_a);
    let b_send_unused = CipherState::new(key_b);
    let a_recv_unused = CipherState::new(key_b);

    let (client_io, mut relay_in) = tokio::io::duplex(1 << 16);
    let (mut relay_out, server_io) = tokio::io::duplex(1 << 16);
    tokio::spawn(async move {
        if let Ok(mut frame) = read_frame(&mut relay_in).await {
            if let Some(last) = frame.last_mut() {
                *last ^= 0x01;
            }
            let _ = write_frame(&mut relay_out, &frame).await;
        }
    });

    let metrics = Arc::new(PrometheusMetrics);
    let mut client = SecureStream::new(client_io, a_send, a_recv_unused, metrics.clone());
    let mut server = SecureStream::new(server_io, b_send_unused, b_recv, metrics.clone());

    let decrypt_errors_before = counter_value("libp2p_noise_decrypt_errors_total");

    client.send(b"legit payload").await.unwrap();
    let first = server.recv().await;
    assert!(matches!(first, Err(Error::Decrypt)));

    // The read half stays closed: a second call does not touch the wire again.
    let second = server.recv().await;
    assert!(matches!(second, Err(Error::Decrypt)));

    assert_eq!(
        counter_value("libp2p_noise_decrypt_errors_total"),
        decrypt_errors_before + 1
    );
}

#[tokio::test]
async fn scenario_4_ik_success_uses_exactly_two_handshake_frames() {
    let client = new_peer();
    let server = new_peer();
    let cache = InMemoryStaticKeyCache::new();
    cache.put(server.peer_id.clone(), server.static_keypair.public_bytes());
    let codec = Ed25519Codec;

    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let client_written = Arc::new(Mutex::new(Vec::new()));
    let server_written = Arc::new(Mutex::new(Vec::new()));
    let mut client_io = RecordingIo {
        inner: client_io,
        written: client_written.clone(),
    };
    let mut server_io = RecordingIo {
        inner: server_io,
        written: server_written.clone(),
    };

    let client_fut = driver::initiate(
        &mut client_io,
        &client.identity,
        &client.static_keypair,
        &codec,
        &cache,
        Arc::new(NoopMetrics) as Arc<dyn MetricsSink>,
        &server.peer_id,
        true,
    );
    let server_cache = InMemoryStaticKeyCache::new();
    let server_fut = driver::respond(
        &mut server_io,
        &server.identity,
        &server.static_keypair,
        &codec,
        &server_cache,
        Arc::new(NoopMetrics) as Arc<dyn MetricsSink>,
    );
    let (client_outcome, server_outcome) = tokio::join!(client_fut, server_fut);
    let client_outcome = client_outcome.unwrap();
    let server_outcome = server_outcome.unwrap();
    assert_eq!(client_outcome.pattern_used, Pattern::Ik);
    assert_eq!(server_outcome.pattern_used, Pattern::Ik);

    let total_frames =
        count_frames(&client_written.lock().unwrap()) + count_frames(&server_written.lock().unwrap());
    assert_eq!(total_frames, 2);
}

#[tokio::test]
async fn scenario_5_stale_cache_falls_back_to_xx_and_still_authenticates() {
    let client = new_peer();
    let server = new_peer();
    let cache = InMemoryStaticKeyCache::new();
    cache.put(server.peer_id.clone(), [0x77u8; 32]);
    let codec = Ed25519Codec;

    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let client_written = Arc::new(Mutex::new(Vec::new()));
    let server_written = Arc::new(Mutex::new(Vec::new()));
    let mut client_io = RecordingIo {
        inner: client_io,
        written: client_written.clone(),
    };
    let mut server_io = RecordingIo {
        inner: server_io,
        written: server_written.clone(),
    };

    let client_fut = driver::initiate(
        &mut client_io,
        &client.identity,
        &client.static_keypair,
        &codec,
        &cache,
        Arc::new(NoopMetrics) as Arc<dyn MetricsSink>,
        &server.peer_id,
        true,
    );
    let server_cache = InMemoryStaticKeyCache::new();
    let server_fut = driver::respond(
        &mut server_io,
        &server.identity,
        &server.static_keypair,
        &codec,
        &server_cache,
        Arc::new(NoopMetrics) as Arc<dyn MetricsSink>,
    );
    let (client_outcome, server_outcome) = tokio::join!(client_fut, server_fut);
    let client_outcome = client_outcome.unwrap();
    let server_outcome = server_outcome.unwrap();

    assert_eq!(client_outcome.pattern_used, Pattern::XxFallback);
    assert_eq!(server_outcome.pattern_used, Pattern::XxFallback);
    assert_eq!(client_outcome.remote_peer, server.peer_id);
    assert_eq!(
        client_outcome.remote_static_public_key,
        server.static_keypair.public_bytes()
    );

    // One failed IK attempt, then the two-message XXfallback schedule.
    let total_frames =
        count_frames(&client_written.lock().unwrap()) + count_frames(&server_written.lock().unwrap());
    assert_eq!(total_frames, 3);
}

#[tokio::test]
async fn scenario_6_oversize_write_is_chunked_and_order_preserving() {
    let client = new_peer();
    let server = new_peer();
    let (client_io, server_io) = tokio::io::duplex(1 << 20);

    let client_config = NoiseConfig::new(client.static_keypair).with_noise_pipes(false);
    let server_config = NoiseConfig::new(server.static_keypair).with_noise_pipes(false);

    let client_fut = secure_outbound(&client_config, &client.identity, client_io, &server.peer_id);
    let server_fut = secure_inbound(&server_config, &server.identity, server_io, None);
    let (client_conn, server_conn) = tokio::join!(client_fut, server_fut);
    let mut client_conn = client_conn.unwrap();
    let mut server_conn = server_conn.unwrap();

    let big: Vec<u8> = (0..100_000usize).map(|i| (i % 251) as u8).collect();
    let send_fut = client_conn.conn.send(&big);
    let recv_fut = async {
        let mut reassembled = Vec::new();
        while reassembled.len() < big.len() {
            let record = server_conn.conn.recv().await.unwrap().unwrap();
            reassembled.extend_from_slice(&record);
        }
        reassembled
    };
    let (send_result, reassembled) = tokio::join!(send_fut, recv_fut);
    send_result.unwrap();
    assert_eq!(reassembled, big);
}
