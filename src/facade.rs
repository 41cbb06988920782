#![forbid(unsafe_code)]

//! Top-level entry points. `secure_outbound`/`secure_inbound` run one
//! handshake to completion over a caller-supplied transport and hand back a
//! `SecureStream` plus the authenticated remote identity.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::cache::{InMemoryStaticKeyCache, StaticKeyCache};
use crate::driver::{self, HandshakeOutcome};
use crate::error::Result;
use crate::identity::{Ed25519Codec, IdentityKeyCodec, LocalIdentity, PeerId};
use crate::metrics::{MetricsSink, PrometheusMetrics};
use crate::payload::NoiseExtensions;
use crate::primitives::DhKeyPair;
use crate::transport::SecureStream;

pub const PROTOCOL_ID: &str = "/noise";

/// An established secure channel: the encrypted duplex and the peer identity
/// the handshake authenticated.
pub struct SecuredConnection<T> {
    pub conn: SecureStream<T>,
    pub remote_peer: PeerId,
}

/// Wires together the collaborators the handshake driver needs. Built once
/// and reused across dials/accepts against the same local identity.
pub struct NoiseConfig {
    pub static_noise_key: DhKeyPair,
    pub extensions: Option<NoiseExtensions>,
    pub use_noise_pipes: bool,
    cache: Arc<dyn StaticKeyCache>,
    codec: Arc<dyn IdentityKeyCodec>,
    metrics: Arc<dyn MetricsSink>,
}

impl NoiseConfig {
    pub fn new(static_noise_key: DhKeyPair) -> Self {
        Self {
            static_noise_key,
            extensions: None,
            use_noise_pipes: true,
            cache: Arc::new(InMemoryStaticKeyCache::new()),
            codec: Arc::new(Ed25519Codec),
            metrics: Arc::new(PrometheusMetrics),
        }
    }

    pub fn with_extensions(mut self, extensions: NoiseExtensions) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn with_noise_pipes(mut self, use_noise_pipes: bool) -> Self {
        self.use_noise_pipes = use_noise_pipes;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn StaticKeyCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_identity_codec(mut self, codec: Arc<dyn IdentityKeyCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

fn into_connection<T>(
    outcome: HandshakeOutcome,
    transport: T,
    metrics: Arc<dyn MetricsSink>,
) -> SecuredConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    SecuredConnection {
        remote_peer: outcome.remote_peer,
        conn: SecureStream::new(transport, outcome.send_cipher, outcome.recv_cipher, metrics),
    }
}

/// Dial `remote_peer` over an already-connected transport.
pub async fn secure_outbound<T>(
    config: &NoiseConfig,
    local_identity: &dyn LocalIdentity,
    mut transport: T,
    remote_peer: &PeerId,
) -> Result<SecuredConnection<T>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = driver::initiate(
        &mut transport,
        local_identity,
        &config.static_noise_key,
        config.codec.as_ref(),
        config.cache.as_ref(),
        config.metrics.clone(),
        remote_peer,
        config.use_noise_pipes,
    )
    .await?;
    Ok(into_connection(outcome, transport, config.metrics.clone()))
}

/// Accept a connection, optionally checking the authenticated identity
/// against an expected peer.
pub async fn secure_inbound<T>(
    config: &NoiseConfig,
    local_identity: &dyn LocalIdentity,
    mut transport: T,
    expected_remote_peer: Option<&PeerId>,
) -> Result<SecuredConnection<T>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = driver::respond(
        &mut transport,
        local_identity,
        &config.static_noise_key,
        config.codec.as_ref(),
        config.cache.as_ref(),
        config.metrics.clone(),
    )
    .await?;
    if let Some(expected) = expected_remote_peer {
        if &outcome.remote_peer != expected {
            return Err(crate::error::Error::PeerMismatch);
        }
    }
    Ok(into_connection(outcome, transport, config.metrics.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Ed25519Identity;

    #[tokio::test]
    async fn outbound_and_inbound_agree_on_a_loopback_duplex() {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let client_identity = Ed25519Identity::generate();
        let server_identity = Ed25519Identity::generate();
        let server_peer = server_identity.peer_id();

        let client_config = NoiseConfig::new(DhKeyPair::generate()).with_noise_pipes(false);
        let server_config = NoiseConfig::new(DhKeyPair::generate());

        let client_fut =
            secure_outbound(&client_config, &client_identity, client_io, &server_peer);
        let server_fut = secure_inbound(&server_config, &server_identity, server_io, None);

        let (client_result, server_result) = tokio::join!(client_fut, server_fut);
        let mut client_conn = client_result.unwrap();
        let mut server_conn = server_result.unwrap();

        client_conn.conn.send(b"test").await.unwrap();
        let received = server_conn.conn.recv().await.unwrap().unwrap();
        assert_eq!(received, b"test");
        assert_eq!(server_conn.remote_peer, client_identity.peer_id());
    }

    #[tokio::test]
    async fn expected_peer_mismatch_on_inbound_is_rejected() {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let client_identity = Ed25519Identity::generate();
        let server_identity = Ed25519Identity::generate();
        let server_peer = server_identity.peer_id();
        let wrong_expected = PeerId::from_public_key_bytes(b"someone-else");

        let client_config = NoiseConfig::new(DhKeyPair::generate()).with_noise_pipes(false);
        let server_config = NoiseConfig::new(DhKeyPair::generate());

        let client_fut =
            secure_outbound(&client_config, &client_identity, client_io, &server_peer);
        let server_fut =
            secure_inbound(&server_config, &server_identity, server_io, Some(&wrong_expected));

        let (client_result, server_result) = tokio::join!(client_fut, server_fut);
        client_result.unwrap();
        assert!(server_result.is_err());
    }
}
