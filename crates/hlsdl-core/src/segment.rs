//! Segment data model (§3) and AES-128-CBC streaming decryption (§4.H).
//!
//! The decryption here deliberately does **not** perform PKCS7 unpadding.
//! It reproduces the original `decrypt_data`'s behavior: intermediate
//! chunks are NUL-padded to a 16-byte boundary and the full padded
//! plaintext is emitted; only the chunk flagged as the segment's last is
//! truncated back to its pre-pad ciphertext length. CBC chaining state is
//! carried across chunks within one segment.

use std::path::PathBuf;

use aes::Aes128;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use cbc::cipher::generic_array::GenericArray;

use crate::error::SegmentError;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    None,
    Partial,
    Complete,
    Corrupted,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub index: usize,
    pub url: url::Url,
    pub expected_size: Option<u64>,
    pub downloaded_size: u64,
    pub local_path: PathBuf,
    pub checksum: Option<String>,
    pub state: SegmentState,
    pub retry_count: u32,
}

impl Segment {
    pub fn new(index: usize, url: url::Url, local_path: PathBuf) -> Self {
        Self {
            index,
            url,
            expected_size: None,
            downloaded_size: 0,
            local_path,
            checksum: None,
            state: SegmentState::None,
            retry_count: 0,
        }
    }

    /// A segment is COMPLETE iff its on-disk size equals its recorded
    /// downloaded size and a checksum has been recorded for it (§3).
    pub fn is_complete(&self) -> bool {
        self.state == SegmentState::Complete && self.checksum.is_some()
    }
}

/// Derives the IV for a segment: the playlist's explicit IV if present,
/// otherwise a 16-byte big-endian encoding of the segment's sequence
/// number (§4.H step 5).
pub fn derive_iv(explicit: Option<[u8; 16]>, sequence_number: u64) -> [u8; 16] {
    explicit.unwrap_or_else(|| (sequence_number as u128).to_be_bytes())
}

/// Stateful AES-128-CBC decryptor for one segment's byte stream. Carries
/// CBC chaining state across `decrypt_chunk` calls.
pub struct SegmentDecryptor {
    cipher: Aes128CbcDec,
}

impl SegmentDecryptor {
    pub fn new(key: &[u8], iv: &[u8; 16]) -> Result<Self, SegmentError> {
        if key.len() != 16 {
            return Err(SegmentError::Decrypt(format!(
                "expected 16-byte key, got {}",
                key.len()
            )));
        }
        let key_arr = GenericArray::from_slice(key);
        let iv_arr = GenericArray::from_slice(iv);
        Ok(Self {
            cipher: Aes128CbcDec::new(key_arr, iv_arr),
        })
    }

    /// Decrypts one chunk. Non-last chunks are NUL-padded to a 16-byte
    /// boundary and the full padded plaintext is returned; the chunk
    /// flagged `is_last` is decrypted and then truncated back to its
    /// original (pre-pad) length, matching the original's non-standard
    /// padding handling (§9).
    pub fn decrypt_chunk(&mut self, data: &[u8], is_last: bool) -> Vec<u8> {
        let original_len = data.len();
        let mut buf = data.to_vec();
        let remainder = buf.len() % 16;
        if remainder != 0 {
            if !is_last {
                tracing::warn!(
                    remainder,
                    "non-block-aligned intermediate chunk, NUL-padding to 16 bytes"
                );
            }
            buf.resize(buf.len() + (16 - remainder), 0u8);
        }

        for block in buf.chunks_exact_mut(16) {
            let generic = GenericArray::from_mut_slice(block);
            self.cipher.decrypt_block_mut(generic);
        }

        if is_last {
            buf.truncate(original_len);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::Aes128;
    use cbc::cipher::{BlockEncryptMut, KeyIvInit as _};

    fn encrypt_all(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
        let mut buf = plaintext.to_vec();
        let remainder = buf.len() % 16;
        if remainder != 0 {
            buf.resize(buf.len() + (16 - remainder), 0u8);
        }
        let mut enc = cbc::Encryptor::<Aes128>::new(key.into(), iv.into());
        for block in buf.chunks_exact_mut(16) {
            let generic = GenericArray::from_mut_slice(block);
            enc.encrypt_block_mut(generic);
        }
        buf
    }

    #[test]
    fn derive_iv_uses_explicit_when_present() {
        let explicit = [9u8; 16];
        assert_eq!(derive_iv(Some(explicit), 42), explicit);
    }

    #[test]
    fn derive_iv_falls_back_to_sequence_number() {
        let iv = derive_iv(None, 1);
        let mut expected = [0u8; 16];
        expected[15] = 1;
        assert_eq!(iv, expected);
    }

    #[test]
    fn single_chunk_roundtrip_block_aligned() {
        let key = [1u8; 16];
        let iv = [2u8; 16];
        let plaintext = b"0123456789abcdef"; // exactly 16 bytes
        let ciphertext = encrypt_all(&key, &iv, plaintext);

        let mut dec = SegmentDecryptor::new(&key, &iv).unwrap();
        let out = dec.decrypt_chunk(&ciphertext, true);
        assert_eq!(out, plaintext);
    }

    #[test]
    fn non_aligned_last_chunk_is_truncated_not_unpadded() {
        let key = [3u8; 16];
        let iv = [4u8; 16];
        let plaintext = b"hello world"; // 11 bytes, not block-aligned
        let ciphertext = encrypt_all(&key, &iv, plaintext);

        let mut dec = SegmentDecryptor::new(&key, &iv).unwrap();
        let out = dec.decrypt_chunk(&ciphertext, true);
        assert_eq!(out, plaintext);
    }

    #[test]
    fn multi_chunk_stream_chains_across_calls() {
        let key = [5u8; 16];
        let iv = [6u8; 16];
        let plaintext = vec![7u8; 48];
        let ciphertext = encrypt_all(&key, &iv, &plaintext);

        let mut dec = SegmentDecryptor::new(&key, &iv).unwrap();
        let mut out = Vec::new();
        out.extend(dec.decrypt_chunk(&ciphertext[0..16], false));
        out.extend(dec.decrypt_chunk(&ciphertext[16..32], false));
        out.extend(dec.decrypt_chunk(&ciphertext[32..48], true));
        assert_eq!(out, plaintext);
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let short_key = [1u8; 8];
        let iv = [0u8; 16];
        assert!(SegmentDecryptor::new(&short_key, &iv).is_err());
    }

    #[test]
    fn segment_is_complete_requires_checksum() {
        let mut seg = Segment::new(0, url::Url::parse("https://e.com/a.ts").unwrap(), "a.ts".into());
        seg.state = SegmentState::Complete;
        assert!(!seg.is_complete());
        seg.checksum = Some("deadbeef".to_string());
        assert!(seg.is_complete());
    }
}
