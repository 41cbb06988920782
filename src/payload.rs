#![forbid(unsafe_code)]

//! Wire format for the authenticated handshake payload. Field numbers are
//! fixed by the protobuf schema:
//!
//! ```proto
//! message NoiseExtensions { repeated bytes webtransport_certhashes = 1; }
//! message NoiseHandshakePayload {
//!   bytes identity_key = 1;
//!   bytes identity_sig = 2;
//!   NoiseExtensions extensions = 4;
//! }
//! ```
//!
//! Hand-encoded length-delimited protobuf (tag = field_num << 3 | wire_type,
//! wire_type 2 for all fields here). Unknown fields are skipped on decode.

use crate::error::{Error, Result};

pub const IDENTITY_SIG_DOMAIN: &[u8] = b"noise-libp2p-static-key:";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NoiseExtensions {
    pub webtransport_certhashes: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NoiseHandshakePayload {
    pub identity_key: Vec<u8>,
    pub identity_sig: Vec<u8>,
    pub extensions: Option<NoiseExtensions>,
}

/// The byte string an identity key signs: the domain separator concatenated
/// directly with the 32-byte Noise static public key, no terminator.
pub fn identity_signing_input(static_public_key: &[u8; 32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(IDENTITY_SIG_DOMAIN.len() + 32);
    buf.extend_from_slice(IDENTITY_SIG_DOMAIN);
    buf.extend_from_slice(static_public_key);
    buf
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn get_varint(input: &[u8]) -> Result<(u64, &[u8])> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in input.iter().enumerate() {
        if shift >= 64 {
            return Err(Error::malformed("varint too long"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, &input[i + 1..]));
        }
        shift += 7;
    }
    Err(Error::malformed("truncated varint"))
}

fn put_length_delimited(out: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    put_varint(out, (u64::from(field) << 3) | 2);
    put_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn take_length_delimited<'a>(input: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
    let (len, rest) = get_varint(input)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(Error::malformed("truncated length-delimited field"));
    }
    Ok(rest.split_at(len))
}

fn skip_field(input: &[u8], wire_type: u64) -> Result<&[u8]> {
    match wire_type {
        0 => Ok(get_varint(input)?.1),
        2 => Ok(take_length_delimited(input)?.1),
        5 => {
            if input.len() < 4 {
                return Err(Error::malformed("truncated 32-bit field"));
            }
            Ok(&input[4..])
        }
        1 => {
            if input.len() < 8 {
                return Err(Error::malformed("truncated 64-bit field"));
            }
            Ok(&input[8..])
        }
        other => Err(Error::malformed(format!("unsupported wire type {other}"))),
    }
}

impl NoiseExtensions {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for hash in &self.webtransport_certhashes {
            put_length_delimited(&mut out, 1, hash);
        }
        out
    }

    fn decode(mut input: &[u8]) -> Result<Self> {
        let mut ext = NoiseExtensions::default();
        while !input.is_empty() {
            let (tag, rest) = get_varint(input)?;
            let field = tag >> 3;
            let wire_type = tag & 0x7;
            match (field, wire_type) {
                (1, 2) => {
                    let (bytes, rest2) = take_length_delimited(rest)?;
                    ext.webtransport_certhashes.push(bytes.to_vec());
                    input = rest2;
                }
                (_, wt) => input = skip_field(rest, wt)?,
            }
        }
        Ok(ext)
    }
}

impl NoiseHandshakePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_length_delimited(&mut out, 1, &self.identity_key);
        put_length_delimited(&mut out, 2, &self.identity_sig);
        if let Some(ext) = &self.extensions {
            let encoded = ext.encode();
            put_length_delimited(&mut out, 4, &encoded);
        }
        out
    }

    pub fn decode(mut input: &[u8]) -> Result<Self> {
        let mut payload = NoiseHandshakePayload::default();
        while !input.is_empty() {
            let (tag, rest) = get_varint(input)?;
            let field = tag >> 3;
            let wire_type = tag & 0x7;
            match (field, wire_type) {
                (1, 2) => {
                    let (bytes, rest2) = take_length_delimited(rest)?;
                    payload.identity_key = bytes.to_vec();
                    input = rest2;
                }
                (2, 2) => {
                    let (bytes, rest2) = take_length_delimited(rest)?;
                    payload.identity_sig = bytes.to_vec();
                    input = rest2;
                }
                (4, 2) => {
                    let (bytes, rest2) = take_length_delimited(rest)?;
                    payload.extensions = Some(NoiseExtensions::decode(bytes)?);
                    input = rest2;
                }
                (_, wt) => input = skip_field(rest, wt)?,
            }
        }
        Ok(payload)
    }
}
