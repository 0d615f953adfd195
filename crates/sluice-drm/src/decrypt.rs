//! The decrypter collaborator and its AES-128-CBC implementation.

use aes::Aes128;
use async_trait::async_trait;
use cbc::{
    cipher::{block_padding::NoPadding, block_padding::Pkcs7, BlockDecryptMut, KeyIvInit},
    Decryptor,
};
use tracing::trace;

use crate::error::{DrmError, DrmResult};

/// AES block size in bytes.
pub(crate) const AES_BLOCK_SIZE: usize = 16;

/// Decryption collaborator injected into the streaming engine.
///
/// The engine owns key *resolution* (fetching the key URI, caching the KID
/// per PSSH set) and the CBC chain (it copies the trailing ciphertext block
/// into the IV between chunks); implementations only transform bytes and
/// supply host-specific license plumbing.
#[async_trait]
pub trait Decrypter: Send + Sync {
    /// Raw five-field license configuration (see [`crate::LicenseConfig`]).
    fn license_key(&self) -> String;

    /// Convert a playlist IV attribute (`0x...` or bare hex) into bytes.
    fn convert_iv(&self, raw: &str) -> DrmResult<Vec<u8>>;

    /// Derive the IV from a media sequence number (big-endian in the low
    /// 8 bytes), as RFC 8216 specifies for key tags without an IV.
    fn iv_from_sequence(&self, segment_number: u64) -> [u8; 16];

    /// Ask the host to renew the license; `true` means a key fetch may be
    /// retried once.
    async fn renew_license(&self, token: &str) -> bool;

    /// Decrypt one chunk. `is_last` marks the final chunk of a segment and
    /// triggers padding removal where the method uses padding.
    fn decrypt(&self, key: &[u8], iv: &[u8; 16], input: &[u8], is_last: bool)
        -> DrmResult<Vec<u8>>;
}

/// AES-128-CBC decrypter for the standard HLS `METHOD=AES-128` path.
///
/// Intermediate chunks are decrypted block-by-block without padding; the
/// final chunk removes PKCS7 padding.
#[derive(Debug, Default)]
pub struct Aes128CbcDecrypter {
    license_key: String,
}

impl Aes128CbcDecrypter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a license configuration string (`query|headers|_|_|token`).
    pub fn with_license_key(license_key: impl Into<String>) -> Self {
        Self {
            license_key: license_key.into(),
        }
    }
}

#[async_trait]
impl Decrypter for Aes128CbcDecrypter {
    fn license_key(&self) -> String {
        self.license_key.clone()
    }

    fn convert_iv(&self, raw: &str) -> DrmResult<Vec<u8>> {
        let stripped = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .unwrap_or(raw);
        if stripped.is_empty() {
            return Err(DrmError::InvalidIv(raw.to_string()));
        }
        hex::decode(stripped).map_err(|_| DrmError::InvalidIv(raw.to_string()))
    }

    fn iv_from_sequence(&self, segment_number: u64) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[8..].copy_from_slice(&segment_number.to_be_bytes());
        iv
    }

    async fn renew_license(&self, _token: &str) -> bool {
        // Renewal is host-specific; the standalone AES decrypter has no
        // license server to talk to.
        false
    }

    fn decrypt(
        &self,
        key: &[u8],
        iv: &[u8; 16],
        input: &[u8],
        is_last: bool,
    ) -> DrmResult<Vec<u8>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let key: &[u8; 16] = key
            .try_into()
            .map_err(|_| DrmError::InvalidKeyLength(key.len()))?;

        if input.len() % AES_BLOCK_SIZE != 0 {
            return Err(DrmError::UnalignedInput(input.len()));
        }

        let mut buf = input.to_vec();
        let decryptor = Decryptor::<Aes128>::new(key.into(), iv.into());

        let written = if is_last {
            decryptor
                .decrypt_padded_mut::<Pkcs7>(&mut buf)
                .map_err(|e| DrmError::Unpad(e.to_string()))?
                .len()
        } else {
            decryptor
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(|e| DrmError::Unpad(e.to_string()))?
                .len()
        };

        trace!(
            encrypted = input.len(),
            decrypted = written,
            is_last,
            "aes128-cbc: chunk decrypted"
        );
        buf.truncate(written);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use aes::Aes128;
    use cbc::{
        cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit},
        Encryptor,
    };

    use super::*;

    fn encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let padded_len = plaintext.len() + (AES_BLOCK_SIZE - plaintext.len() % AES_BLOCK_SIZE);
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        Encryptor::<Aes128>::new(key.into(), iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .expect("encrypt")
            .to_vec()
    }

    #[test]
    fn single_chunk_roundtrip() {
        let key = [0x42u8; 16];
        let iv = [0x13u8; 16];
        let plaintext = b"elementary stream bytes, straight from the packager";

        let ciphertext = encrypt(plaintext, &key, &iv);
        let decrypter = Aes128CbcDecrypter::new();
        let out = decrypter.decrypt(&key, &iv, &ciphertext, true).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn chunked_decryption_with_manual_iv_chain() {
        let key = [0xA5u8; 16];
        let iv = [0x01u8; 16];
        let plaintext: Vec<u8> = (0..96u8).collect();

        let ciphertext = encrypt(&plaintext, &key, &iv);
        let decrypter = Aes128CbcDecrypter::new();

        // Split after 32 bytes; chain the IV the way the engine does.
        let (head, tail) = ciphertext.split_at(32);
        let mut out = decrypter.decrypt(&key, &iv, head, false).unwrap();
        let mut chained_iv = [0u8; 16];
        chained_iv.copy_from_slice(&head[head.len() - 16..]);
        out.extend(decrypter.decrypt(&key, &chained_iv, tail, true).unwrap());

        assert_eq!(out, plaintext);
    }

    #[test]
    fn unaligned_chunk_is_rejected() {
        let decrypter = Aes128CbcDecrypter::new();
        let err = decrypter
            .decrypt(&[0u8; 16], &[0u8; 16], &[0u8; 15], false)
            .unwrap_err();
        assert!(matches!(err, DrmError::UnalignedInput(15)));
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let decrypter = Aes128CbcDecrypter::new();
        let err = decrypter
            .decrypt(&[0u8; 8], &[0u8; 16], &[0u8; 16], false)
            .unwrap_err();
        assert!(matches!(err, DrmError::InvalidKeyLength(8)));
    }

    #[test]
    fn iv_conversion() {
        let decrypter = Aes128CbcDecrypter::new();
        assert_eq!(
            decrypter.convert_iv("0x00000000000000000000000000000001").unwrap(),
            {
                let mut iv = vec![0u8; 16];
                iv[15] = 1;
                iv
            }
        );
        assert_eq!(decrypter.convert_iv("ff00").unwrap(), vec![0xff, 0x00]);
        assert!(decrypter.convert_iv("0xZZ").is_err());
        assert!(decrypter.convert_iv("").is_err());
    }

    #[test]
    fn iv_from_sequence_is_big_endian() {
        let decrypter = Aes128CbcDecrypter::new();
        let iv = decrypter.iv_from_sequence(0x0102);
        let mut expected = [0u8; 16];
        expected[14] = 0x01;
        expected[15] = 0x02;
        assert_eq!(iv, expected);
    }
}
