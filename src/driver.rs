#![forbid(unsafe_code)]

//! Orchestrates one handshake end to end: picks a pattern, drives
//! `HandshakeState` through the wire, binds and verifies the identity
//! payload, and falls back from `IK` to `XXfallback` when the initiator's
//! cached responder key turns out to be stale.
//!
//! The initial message length tells a responder which pattern it's looking
//! at: a bare `XX` first message is exactly 32 bytes (just the initiator's
//! ephemeral), while an `IK` first message also carries an encrypted static
//! key and payload and is always longer. A responder that fails to complete
//! `IK` replies with an `XXfallback` message instead of an error frame; the
//! initiator detects this the same way — by failing to parse the response
//! as the (shorter) `IK` reply — and switches its own state to match.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::cache::StaticKeyCache;
use crate::cipher_state::CipherState;
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::handshake_state::{HandshakeState, Pattern, Role};
use crate::identity::{IdentityKeyCodec, LocalIdentity, PeerId};
use crate::metrics::MetricsSink;
use crate::payload::{identity_signing_input, NoiseHandshakePayload};
use crate::primitives::DhKeyPair;

/// An `XX` first message is exactly the initiator's raw ephemeral key.
const XX_FIRST_MESSAGE_LEN: usize = 32;

pub struct HandshakeOutcome {
    pub remote_peer: PeerId,
    pub remote_static_public_key: [u8; 32],
    pub pattern_used: Pattern,
    pub send_cipher: CipherState,
    pub recv_cipher: CipherState,
}

fn build_payload(local_identity: &dyn LocalIdentity, local_static_public: &[u8; 32]) -> Vec<u8> {
    let sig = local_identity.sign(&identity_signing_input(local_static_public));
    NoiseHandshakePayload {
        identity_key: local_identity.public_key_bytes(),
        identity_sig: sig,
        extensions: None,
    }
    .encode()
}

fn verify_payload(
    payload_bytes: &[u8],
    bound_static_public: &[u8; 32],
    codec: &dyn IdentityKeyCodec,
) -> Result<PeerId> {
    let payload = NoiseHandshakePayload::decode(payload_bytes)?;
    let verifier = codec.decode(&payload.identity_key)?;
    let signing_input = identity_signing_input(bound_static_public);
    if !verifier.verify(&signing_input, &payload.identity_sig) {
        return Err(Error::InvalidSignature);
    }
    Ok(verifier.peer_id())
}

struct Context<'a> {
    local_identity: &'a dyn LocalIdentity,
    codec: &'a dyn IdentityKeyCodec,
}

/// Dial a peer whose `PeerId` is already known. When `use_noise_pipes` is
/// set and a static key is cached for `remote_peer`, attempts `IK` first and
/// falls back to `XXfallback` on a stale cache entry; otherwise runs plain
/// `XX`.
#[allow(clippy::too_many_arguments)]
pub async fn initiate<T>(
    transport: &mut T,
    local_identity: &dyn LocalIdentity,
    local_static: &DhKeyPair,
    codec: &dyn IdentityKeyCodec,
    cache: &dyn StaticKeyCache,
    metrics: Arc<dyn MetricsSink>,
    remote_peer: &PeerId,
    use_noise_pipes: bool,
) -> Result<HandshakeOutcome>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let ctx = Context {
        local_identity,
        codec,
    };

    // A cache miss is not surfaced to the caller: it just means the selector
    // picks plain XX instead of attempting IK.
    let cache_lookup = if use_noise_pipes {
        cache.get(remote_peer).ok_or(Error::CacheMiss)
    } else {
        Err(Error::CacheMiss)
    };

    let outcome = match cache_lookup {
        Ok(responder_static) => {
            debug!(?remote_peer, "cached static key found, attempting IK");
            initiate_ik(transport, &ctx, local_static.clone(), responder_static, remote_peer).await
        }
        Err(Error::CacheMiss) => {
            debug!(?remote_peer, "no cached static key, dialing with XX");
            initiate_xx(transport, &ctx, local_static.clone(), Some(remote_peer)).await
        }
        Err(other) => Err(other),
    };

    match &outcome {
        Ok(o) => {
            info!(pattern = ?o.pattern_used, "handshake complete as initiator");
            metrics.handshake_success(o.pattern_used);
            if o.pattern_used == Pattern::Xx {
                cache.put(remote_peer.clone(), o.remote_static_public_key);
            }
        }
        Err(e) => {
            warn!(error = %e, "initiator handshake failed");
            metrics.handshake_error();
        }
    }
    outcome
}

async fn initiate_ik<T>(
    transport: &mut T,
    ctx: &Context<'_>,
    local_static: DhKeyPair,
    responder_static: [u8; 32],
    remote_peer: &PeerId,
) -> Result<HandshakeOutcome>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut hs = HandshakeState::new_ik(Role::Initiator, local_static.clone(), responder_static);
    let payload = build_payload(ctx.local_identity, &local_static.public_bytes());
    let m1 = hs.write_message(&payload)?;
    write_frame(transport, &m1).await?;

    let r1 = read_frame(transport).await?;
    match hs.read_message(&r1) {
        Ok(payload_bytes) => {
            let peer = verify_payload(&payload_bytes, &responder_static, ctx.codec)?;
            if &peer != remote_peer {
                return Err(Error::PeerMismatch);
            }
            let (send_cipher, recv_cipher) = hs.split();
            Ok(HandshakeOutcome {
                remote_peer: peer,
                remote_static_public_key: responder_static,
                pattern_used: Pattern::Ik,
                send_cipher,
                recv_cipher,
            })
        }
        Err(e) if e.is_ik_recoverable() => {
            debug!(error = %e, "IK reply did not parse, retrying as XXfallback");
            let initiator_ephemeral = hs
                .local_ephemeral()
                .ok_or_else(|| Error::protocol("IK message was never written"))?;
            let initiator_ephemeral_public = initiator_ephemeral.public_bytes();
            let mut xxf = HandshakeState::new_xx_fallback(
                Role::Initiator,
                local_static.clone(),
                initiator_ephemeral_public,
                Some(initiator_ephemeral),
            );
            let payload_bytes = xxf.read_message(&r1)?;
            let remote_static = xxf
                .remote_static()
                .ok_or_else(|| Error::protocol("fallback response carried no static key"))?;
            let peer = verify_payload(&payload_bytes, &remote_static, ctx.codec)?;
            if &peer != remote_peer {
                return Err(Error::PeerMismatch);
            }
            let our_payload = build_payload(ctx.local_identity, &local_static.public_bytes());
            let m2 = xxf.write_message(&our_payload)?;
            write_frame(transport, &m2).await?;
            let (send_cipher, recv_cipher) = xxf.split();
            Ok(HandshakeOutcome {
                remote_peer: peer,
                remote_static_public_key: remote_static,
                pattern_used: Pattern::XxFallback,
                send_cipher,
                recv_cipher,
            })
        }
        Err(other) => Err(other),
    }
}

async fn initiate_xx<T>(
    transport: &mut T,
    ctx: &Context<'_>,
    local_static: DhKeyPair,
    expected_remote_peer: Option<&PeerId>,
) -> Result<HandshakeOutcome>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut hs = HandshakeState::new_xx(Role::Initiator, local_static.clone());
    let m1 = hs.write_message(&[])?;
    write_frame(transport, &m1).await?;

    let r1 = read_frame(transport).await?;
    let payload_bytes = hs.read_message(&r1)?;
    let remote_static = hs
        .remote_static()
        .ok_or_else(|| Error::protocol("responder static missing after XX message 2"))?;
    let peer = verify_payload(&payload_bytes, &remote_static, ctx.codec)?;
    if let Some(expected) = expected_remote_peer {
        if &peer != expected {
            return Err(Error::PeerMismatch);
        }
    }

    let our_payload = build_payload(ctx.local_identity, &local_static.public_bytes());
    let m2 = hs.write_message(&our_payload)?;
    write_frame(transport, &m2).await?;

    let (send_cipher, recv_cipher) = hs.split();
    Ok(HandshakeOutcome {
        remote_peer: peer,
        remote_static_public_key: remote_static,
        pattern_used: Pattern::Xx,
        send_cipher,
        recv_cipher,
    })
}

/// Accept an inbound connection from a peer not yet identified. The pattern
/// is determined by the shape of the first frame, not negotiated out of band.
pub async fn respond<T>(
    transport: &mut T,
    local_identity: &dyn LocalIdentity,
    local_static: &DhKeyPair,
    codec: &dyn IdentityKeyCodec,
    cache: &dyn StaticKeyCache,
    metrics: Arc<dyn MetricsSink>,
) -> Result<HandshakeOutcome>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let ctx = Context {
        local_identity,
        codec,
    };

    let r0 = read_frame(transport).await?;
    let outcome = if r0.len() == XX_FIRST_MESSAGE_LEN {
        debug!(len = r0.len(), "first frame shape matches bare XX");
        respond_xx(transport, &ctx, local_static.clone(), r0).await
    } else {
        debug!(len = r0.len(), "first frame shape matches IK, attempting it first");
        respond_ik(transport, &ctx, local_static.clone(), r0).await
    };

    match &outcome {
        Ok(o) => {
            info!(pattern = ?o.pattern_used, remote_peer = ?o.remote_peer, "handshake complete as responder");
            metrics.handshake_success(o.pattern_used);
            if o.pattern_used == Pattern::Xx {
                cache.put(o.remote_peer.clone(), o.remote_static_public_key);
            }
        }
        Err(e) => {
            warn!(error = %e, "responder handshake failed");
            metrics.handshake_error();
        }
    }
    outcome
}

async fn respond_xx<T>(
    transport: &mut T,
    ctx: &Context<'_>,
    local_static: DhKeyPair,
    r0: Vec<u8>,
) -> Result<HandshakeOutcome>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut hs = HandshakeState::new_xx(Role::Responder, local_static.clone());
    hs.read_message(&r0)?;

    let our_payload = build_payload(ctx.local_identity, &local_static.public_bytes());
    let m2 = hs.write_message(&our_payload)?;
    write_frame(transport, &m2).await?;

    let r2 = read_frame(transport).await?;
    let payload_bytes = hs.read_message(&r2)?;
    let remote_static = hs
        .remote_static()
        .ok_or_else(|| Error::protocol("initiator static missing after XX message 3"))?;
    let peer = verify_payload(&payload_bytes, &remote_static, ctx.codec)?;

    let (send_cipher, recv_cipher) = hs.split();
    Ok(HandshakeOutcome {
        remote_peer: peer,
        remote_static_public_key: remote_static,
        pattern_used: Pattern::Xx,
        send_cipher,
        recv_cipher,
    })
}

async fn respond_ik<T>(
    transport: &mut T,
    ctx: &Context<'_>,
    local_static: DhKeyPair,
    r0: Vec<u8>,
) -> Result<HandshakeOutcome>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let local_static_public = local_static.public_bytes();
    let mut hs = HandshakeState::new_ik(Role::Responder, local_static.clone(), local_static_public);
    match hs.read_message(&r0) {
        Ok(payload_bytes) => {
            let remote_static = hs
                .remote_static()
                .ok_or_else(|| Error::protocol("initiator static missing after IK message 1"))?;
            let peer = verify_payload(&payload_bytes, &remote_static, ctx.codec)?;

            let our_payload = build_payload(ctx.local_identity, &local_static_public);
            let m2 = hs.write_message(&our_payload)?;
            write_frame(transport, &m2).await?;

            let (send_cipher, recv_cipher) = hs.split();
            Ok(HandshakeOutcome {
                remote_peer: peer,
                remote_static_public_key: remote_static,
                pattern_used: Pattern::Ik,
                send_cipher,
                recv_cipher,
            })
        }
        Err(e) if e.is_ik_recoverable() => {
            debug!(error = %e, "could not decrypt IK message 1, replying with XXfallback");
            if r0.len() < 32 {
                return Err(Error::malformed("first message too short for any pattern"));
            }
            let mut initiator_ephemeral_public = [0u8; 32];
            initiator_ephemeral_public.copy_from_slice(&r0[..32]);

            let mut xxf = HandshakeState::new_xx_fallback(
                Role::Responder,
                local_static.clone(),
                initiator_ephemeral_public,
                None,
            );
            let our_payload = build_payload(ctx.local_identity, &local_static_public);
            let m1 = xxf.write_message(&our_payload)?;
            write_frame(transport, &m1).await?;

            let r1 = read_frame(transport).await?;
            let payload_bytes = xxf.read_message(&r1)?;
            let remote_static = xxf
                .remote_static()
                .ok_or_else(|| Error::protocol("initiator static missing after fallback message 2"))?;
            let peer = verify_payload(&payload_bytes, &remote_static, ctx.codec)?;

            let (send_cipher, recv_cipher) = xxf.split();
            Ok(HandshakeOutcome {
                remote_peer: peer,
                remote_static_public_key: remote_static,
                pattern_used: Pattern::XxFallback,
                send_cipher,
                recv_cipher,
            })
        }
        Err(other) => Err(other),
    }
}
