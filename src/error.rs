use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Failure kinds surfaced by the handshake state machine and the post-handshake
/// transport pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("AEAD decryption failed")]
    Decrypt,
    #[error("identity signature verification failed")]
    InvalidSignature,
    #[error("authenticated remote peer does not match the expected peer")]
    PeerMismatch,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("AEAD nonce space exhausted")]
    NonceExhaustion,
    #[error("no cached static key for this peer")]
    CacheMiss,
    #[error("underlying transport error: {0}")]
    UnderlyingIo(#[from] std::io::Error),
    #[error("handshake aborted")]
    Aborted,
}

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Whether this error is recovered by the IK->XXfallback transition.
    /// Only a failure to establish/verify the IK exchange itself is recoverable;
    /// an I/O failure or an already-exhausted nonce space is not.
    pub fn is_ik_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Decrypt
                | Error::MalformedMessage(_)
                | Error::InvalidSignature
                | Error::ProtocolViolation(_)
        )
    }
}
