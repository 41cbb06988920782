#![forbid(unsafe_code)]

//! `Noise_XX_25519_ChaChaPoly_SHA256` secure-channel establishment, with an
//! `IK`-first "noise pipes" optimization and `XXfallback` recovery, over any
//! `AsyncRead + AsyncWrite` transport. Authenticates peers by a long-term
//! identity key distinct from the per-handshake Noise static key, and hands
//! back a post-handshake AEAD transport stream.

pub mod cache;
pub mod cipher_state;
pub mod driver;
pub mod error;
pub mod facade;
pub mod frame;
pub mod handshake_state;
pub mod identity;
pub mod metrics;
pub mod payload;
pub mod primitives;
pub mod symmetric_state;
pub mod transport;

pub use cache::{InMemoryStaticKeyCache, StaticKeyCache};
pub use error::{Error, Result};
pub use facade::{secure_inbound, secure_outbound, NoiseConfig, SecuredConnection, PROTOCOL_ID};
pub use handshake_state::{Pattern, Role};
pub use identity::{Ed25519Codec, Ed25519Identity, IdentityKeyCodec, IdentityVerifier, LocalIdentity, PeerId};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use primitives::DhKeyPair;
pub use transport::SecureStream;
