#![forbid(unsafe_code)]

//! Drives one Noise pattern (XX, IK, or XXfallback): owns the local
//! static/ephemeral keypairs and the remote static/ephemeral public keys,
//! and walks the per-role message schedule token by token.

use crate::cipher_state::CipherState;
use crate::error::{Error, Result};
use crate::primitives::DhKeyPair;
use crate::symmetric_state::{SymmetricState, PROTOCOL_IK, PROTOCOL_XX, PROTOCOL_XXFALLBACK};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pattern {
    Xx,
    Ik,
    XxFallback,
}

impl Pattern {
    fn protocol_name(self) -> &'static str {
        match self {
            Pattern::Xx => PROTOCOL_XX,
            Pattern::Ik => PROTOCOL_IK,
            Pattern::XxFallback => PROTOCOL_XXFALLBACK,
        }
    }

    /// Total number of handshake messages exchanged under this pattern.
    pub fn message_count(self) -> u8 {
        match self {
            Pattern::Xx => 3,
            Pattern::Ik => 2,
            Pattern::XxFallback => 2,
        }
    }
}

pub struct HandshakeState {
    symmetric: SymmetricState,
    role: Role,
    pattern: Pattern,
    s: Option<DhKeyPair>,
    e: Option<DhKeyPair>,
    rs: Option<[u8; 32]>,
    re: Option<[u8; 32]>,
    message_index: u8,
}

impl HandshakeState {
    /// `Noise_XX`: no pre-message, both statics exchanged in-band.
    pub fn new_xx(role: Role, local_static: DhKeyPair) -> Self {
        Self {
            symmetric: SymmetricState::initialize(Pattern::Xx.protocol_name()),
            role,
            pattern: Pattern::Xx,
            s: Some(local_static),
            e: None,
            rs: None,
            re: None,
            message_index: 0,
        }
    }

    /// `Noise_IK`: the responder's static key is known to the initiator
    /// ahead of time and mixed into `h` by both sides as a pre-message.
    pub fn new_ik(role: Role, local_static: DhKeyPair, responder_static: [u8; 32]) -> Self {
        let mut symmetric = SymmetricState::initialize(Pattern::Ik.protocol_name());
        symmetric.mix_hash(&responder_static);
        let (s, rs) = match role {
            Role::Initiator => (Some(local_static), Some(responder_static)),
            Role::Responder => (Some(local_static), None),
        };
        Self {
            symmetric,
            role,
            pattern: Pattern::Ik,
            s,
            e: None,
            rs,
            re: None,
            message_index: 0,
        }
    }

    /// `Noise_XXfallback`: recovery path after a responder failed to decrypt
    /// an IK first message. Both sides re-initialize with the fallback
    /// protocol name and treat the initiator's already-transmitted ephemeral
    /// as a pre-message; the remainder proceeds as XX starting from message 2.
    ///
    /// The initiator must pass its own keypair as `initiator_ephemeral` (it is
    /// reused, not regenerated); the responder passes only the public half it
    /// extracted from the raw failed IK message.
    pub fn new_xx_fallback(
        role: Role,
        local_static: DhKeyPair,
        initiator_ephemeral_public: [u8; 32],
        initiator_ephemeral_keypair: Option<DhKeyPair>,
    ) -> Self {
        let mut symmetric = SymmetricState::initialize(Pattern::XxFallback.protocol_name());
        symmetric.mix_hash(&initiator_ephemeral_public);
        let (e, re) = match role {
            Role::Initiator => (initiator_ephemeral_keypair, None),
            Role::Responder => (None, Some(initiator_ephemeral_public)),
        };
        Self {
            symmetric,
            role,
            pattern: Pattern::XxFallback,
            s: Some(local_static),
            e,
            rs: None,
            re,
            message_index: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    pub fn remote_static(&self) -> Option<[u8; 32]> {
        self.rs
    }

    /// The local ephemeral keypair generated for this handshake, if an `E`
    /// token has already been written or read. Used by the driver to carry
    /// the initiator's ephemeral across into an `XXfallback` retry.
    pub fn local_ephemeral(&self) -> Option<DhKeyPair> {
        self.e.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.message_index >= self.pattern.message_count()
    }

    /// Whether the schedule has `local` writing (vs. reading) at the current
    /// message index.
    fn writer_at(&self, index: u8) -> Role {
        match self.pattern {
            Pattern::Xx => {
                if index % 2 == 0 {
                    Role::Initiator
                } else {
                    Role::Responder
                }
            }
            Pattern::Ik => {
                if index == 0 {
                    Role::Initiator
                } else {
                    Role::Responder
                }
            }
            // Fallback continues XX's schedule from message 2: the
            // responder writes first (XX's even message 1), the initiator
            // second (XX's odd message 2).
            Pattern::XxFallback => {
                if index == 0 {
                    Role::Responder
                } else {
                    Role::Initiator
                }
            }
        }
    }

    fn tokens_at(&self, index: u8) -> &'static [Token] {
        use Token::*;
        match self.pattern {
            Pattern::Xx => match index {
                0 => &[E],
                1 => &[E, Dh(DhKind::Ee), S, Dh(DhKind::Es)],
                2 => &[S, Dh(DhKind::Se)],
                _ => &[],
            },
            Pattern::Ik => match index {
                0 => &[E, Dh(DhKind::Es), S, Dh(DhKind::Ss)],
                1 => &[E, Dh(DhKind::Ee), Dh(DhKind::Se)],
                _ => &[],
            },
            // Mirrors XX's message 2 and message 3 token lists.
            Pattern::XxFallback => match index {
                0 => &[E, Dh(DhKind::Ee), S, Dh(DhKind::Es)],
                1 => &[S, Dh(DhKind::Se)],
                _ => &[],
            },
        }
    }

    /// Whether the identity payload is attached at this message index,
    /// for this pattern.
    pub fn carries_payload_at(&self, index: u8) -> bool {
        match self.pattern {
            Pattern::Xx => index == 1 || index == 2,
            Pattern::Ik => index == 0 || index == 1,
            Pattern::XxFallback => index == 0 || index == 1,
        }
    }

    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if self.is_finished() {
            return Err(Error::protocol("handshake already complete"));
        }
        let index = self.message_index;
        if self.writer_at(index) != self.role {
            return Err(Error::protocol("not this role's turn to write"));
        }
        let mut out = Vec::new();
        for token in self.tokens_at(index) {
            self.write_token(*token, &mut out)?;
        }
        let ct = self.symmetric.encrypt_and_hash(payload)?;
        out.extend_from_slice(&ct);
        self.message_index += 1;
        Ok(out)
    }

    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.is_finished() {
            return Err(Error::protocol("handshake already complete"));
        }
        let index = self.message_index;
        if self.writer_at(index) == self.role {
            return Err(Error::protocol("not this role's turn to read"));
        }
        let mut cursor = message;
        for token in self.tokens_at(index) {
            cursor = self.read_token(*token, cursor)?;
        }
        let payload = self.symmetric.decrypt_and_hash(cursor)?;
        self.message_index += 1;
        Ok(payload)
    }

    fn write_token(&mut self, token: Token, out: &mut Vec<u8>) -> Result<()> {
        match token {
            Token::E => {
                let kp = match self.e.take() {
                    Some(kp) => kp,
                    None => DhKeyPair::generate(),
                };
                let pub_bytes = kp.public_bytes();
                out.extend_from_slice(&pub_bytes);
                self.symmetric.mix_hash(&pub_bytes);
                self.e = Some(kp);
            }
            Token::S => {
                let s = self
                    .s
                    .as_ref()
                    .ok_or_else(|| Error::protocol("local static key missing"))?;
                let ct = self.symmetric.encrypt_and_hash(&s.public_bytes())?;
                out.extend_from_slice(&ct);
            }
            Token::Dh(kind) => self.mix_dh(kind)?,
        }
        Ok(())
    }

    fn read_token<'a>(&mut self, token: Token, input: &'a [u8]) -> Result<&'a [u8]> {
        match token {
            Token::E => {
                if input.len() < 32 {
                    return Err(Error::malformed("truncated ephemeral key"));
                }
                let (head, rest) = input.split_at(32);
                let mut re = [0u8; 32];
                re.copy_from_slice(head);
                self.symmetric.mix_hash(head);
                self.re = Some(re);
                Ok(rest)
            }
            Token::S => {
                let len = if self.symmetric.has_key() { 48 } else { 32 };
                if input.len() < len {
                    return Err(Error::malformed("truncated static key"));
                }
                let (head, rest) = input.split_at(len);
                let decrypted = self.symmetric.decrypt_and_hash(head)?;
                if decrypted.len() != 32 {
                    return Err(Error::malformed("decrypted static key has wrong length"));
                }
                let mut rs = [0u8; 32];
                rs.copy_from_slice(&decrypted);
                self.rs = Some(rs);
                Ok(rest)
            }
            Token::Dh(kind) => {
                self.mix_dh(kind)?;
                Ok(input)
            }
        }
    }

    fn mix_dh(&mut self, kind: DhKind) -> Result<()> {
        let (local, remote) = match (kind, self.role) {
            (DhKind::Ee, _) => (self.e.as_ref(), self.re.as_ref()),
            (DhKind::Ss, _) => (self.s.as_ref(), self.rs.as_ref()),
            (DhKind::Es, Role::Initiator) => (self.e.as_ref(), self.rs.as_ref()),
            (DhKind::Es, Role::Responder) => (self.s.as_ref(), self.re.as_ref()),
            (DhKind::Se, Role::Initiator) => (self.s.as_ref(), self.re.as_ref()),
            (DhKind::Se, Role::Responder) => (self.e.as_ref(), self.rs.as_ref()),
        };
        let local = local.ok_or_else(|| Error::protocol("missing local key for DH"))?;
        let remote = remote.ok_or_else(|| Error::protocol("missing remote key for DH"))?;
        let shared = local.dh(remote);
        self.symmetric.mix_key(&shared);
        Ok(())
    }

    pub fn split(self) -> (CipherState, CipherState) {
        self.symmetric.split()
    }
}

#[derive(Clone, Copy)]
enum Token {
    E,
    S,
    Dh(DhKind),
}

#[derive(Clone, Copy)]
enum DhKind {
    Ee,
    Es,
    Se,
    Ss,
}
