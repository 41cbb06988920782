#![forbid(unsafe_code)]

//! Post-handshake secure stream: chunks outbound plaintext to the AEAD's
//! maximum per-record size, seals/opens each record with a per-direction
//! `CipherState`, and frames records with the same u16-BE length prefix used
//! during the handshake. A decryption failure is fatal and ends the read
//! half of the stream.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::cipher_state::CipherState;
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::metrics::MetricsSink;

/// Maximum plaintext per record: the 65535-byte frame ceiling minus the
/// 16-byte Poly1305 tag.
pub const MAX_PLAINTEXT_LEN: usize = 65535 - 16;

/// A secured duplex stream over an inner `AsyncRead + AsyncWrite` transport.
/// `send`/`recv` operate on whole plaintext records rather than the raw byte
/// stream, since the AEAD framing has no notion of partial records.
pub struct SecureStream<T> {
    inner: T,
    send_cipher: CipherState,
    recv_cipher: CipherState,
    metrics: Arc<dyn MetricsSink>,
    recv_closed: bool,
}

impl<T> SecureStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        inner: T,
        send_cipher: CipherState,
        recv_cipher: CipherState,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inner,
            send_cipher,
            recv_cipher,
            metrics,
            recv_closed: false,
        }
    }

    /// Seals `plaintext` as one or more records, each at most
    /// `MAX_PLAINTEXT_LEN` bytes, and writes them in order. Order and
    /// chunk boundaries are opaque to the reader; `recv` reassembles nothing
    /// beyond returning each record's plaintext as it arrives.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<()> {
        if plaintext.is_empty() {
            return self.send_record(&[]).await;
        }
        for chunk in plaintext.chunks(MAX_PLAINTEXT_LEN) {
            self.send_record(chunk).await?;
        }
        Ok(())
    }

    async fn send_record(&mut self, chunk: &[u8]) -> Result<()> {
        let ct = self.send_cipher.encrypt_with_ad(&[], chunk)?;
        write_frame(&mut self.inner, &ct).await?;
        self.metrics.packet_encrypted();
        Ok(())
    }

    /// Reads and opens exactly one record. Returns `Ok(None)` at a clean
    /// EOF between records. A decryption failure poisons the read half
    /// permanently: subsequent calls return `Error::Decrypt` without
    /// touching the transport again.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        if self.recv_closed {
            return Err(Error::Decrypt);
        }
        let ct = match read_frame(&mut self.inner).await {
            Ok(ct) => ct,
            Err(Error::UnderlyingIo(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        match self.recv_cipher.decrypt_with_ad(&[], &ct) {
            Ok(pt) => {
                self.metrics.packet_decrypted();
                Ok(Some(pt))
            }
            Err(e) => {
                self.recv_closed = true;
                self.metrics.decrypt_error();
                Err(e)
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;

    fn paired_ciphers() -> (CipherState, CipherState, CipherState, CipherState) {
        let key_a = [11u8; 32];
        let key_b = [22u8; 32];
        (
            CipherState::new(key_a),
            CipherState::new(key_b),
            CipherState::new(key_a),
            CipherState::new(key_b),
        )
    }

    #[tokio::test]
    async fn sends_and_receives_a_plaintext_record() {
        let (a_send, a_recv, b_send, b_recv) = paired_ciphers();
        let (a_io, b_io) = tokio::io::duplex(1 << 20);
        let mut a = SecureStream::new(a_io, a_send, b_recv, Arc::new(NoopMetrics));
        let mut b = SecureStream::new(b_io, b_send, a_recv, Arc::new(NoopMetrics));

        a.send(b"hello there").await.unwrap();
        let got = b.recv().await.unwrap().unwrap();
        assert_eq!(got, b"hello there");
    }

    #[tokio::test]
    async fn chunks_oversize_writes_and_preserves_order() {
        let (a_send, a_recv, b_send, b_recv) = paired_ciphers();
        let (a_io, b_io) = tokio::io::duplex(1 << 20);
        let mut a = SecureStream::new(a_io, a_send, b_recv, Arc::new(NoopMetrics));
        let mut b = SecureStream::new(b_io, b_send, a_recv, Arc::new(NoopMetrics));

        let big = vec![0xABu8; MAX_PLAINTEXT_LEN * 2 + 137];
        a.send(&big).await.unwrap();

        let mut reassembled = Vec::new();
        while reassembled.len() < big.len() {
            let record = b.recv().await.unwrap().unwrap();
            reassembled.extend_from_slice(&record);
        }
        assert_eq!(reassembled, big);
    }

    #[tokio::test]
    async fn mismatched_keys_fail_decrypt_and_close_the_read_half() {
        let (a_send, _a_recv, _b_send, _b_recv) = paired_ciphers();
        let (a_io, b_io) = tokio::io::duplex(1 << 20);
        let mut a = SecureStream::new(a_io, a_send, CipherState::new([99u8; 32]), Arc::new(NoopMetrics));
        let mut b = SecureStream::new(
            b_io,
            CipherState::new([99u8; 32]),
            CipherState::new([33u8; 32]),
            Arc::new(NoopMetrics),
        );

        a.send(b"legit").await.unwrap();
        assert!(b.recv().await.is_err());
        assert!(b.recv().await.is_err());
    }
}
