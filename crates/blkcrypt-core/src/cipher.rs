//! AES-256-CBC chunk cipher with padding disabled.
//!
//! Disabling padding keeps the transformation length-preserving, which is
//! what allows rewriting a fixed-size device in place. Each chunk is an
//! independent CBC stream keyed by the shared key/IV pair, so replaying or
//! resuming at any chunk boundary always reproduces the same bytes.

use std::fmt;

use openssl::symm::{Cipher, Crypter, Mode};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{TransformError, TransformResult};

/// Cipher block length in bytes.
pub const BLOCK_LEN: usize = 16;
/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;
/// IV length in bytes (equal to the block length for CBC).
pub const IV_LEN: usize = BLOCK_LEN;

/// Transformation direction; also the tag used in workdir artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Plaintext to ciphertext.
    Encrypt,
    /// Ciphertext to plaintext.
    Decrypt,
}

impl Direction {
    /// The on-disk artifact tag for this direction.
    pub fn tag(self) -> &'static str {
        match self {
            Direction::Encrypt => "enc",
            Direction::Decrypt => "dec",
        }
    }

    /// The opposite direction.
    pub fn inverse(self) -> Self {
        match self {
            Direction::Encrypt => Direction::Decrypt,
            Direction::Decrypt => Direction::Encrypt,
        }
    }

    fn mode(self) -> Mode {
        match self {
            Direction::Encrypt => Mode::Encrypt,
            Direction::Decrypt => Mode::Decrypt,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A keyed AES-256-CBC context for whole-chunk transforms.
///
/// Construction validates the key and IV lengths and verifies the cipher's
/// reported block size, so every later `transform` only has to check the
/// output length.
pub struct ChunkCipher {
    cipher: Cipher,
    mode: Mode,
    key: Zeroizing<Vec<u8>>,
    iv: [u8; IV_LEN],
}

impl fmt::Debug for ChunkCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkCipher")
            .field("iv", &self.iv)
            .finish()
    }
}

impl ChunkCipher {
    /// Creates a cipher context for the given direction, key, and IV.
    pub fn new(direction: Direction, key: &[u8], iv: &[u8]) -> TransformResult<Self> {
        let cipher = Cipher::aes_256_cbc();

        if key.len() != KEY_LEN {
            return Err(TransformError::KeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            });
        }
        if iv.len() != IV_LEN {
            return Err(TransformError::IvLength {
                expected: IV_LEN,
                actual: iv.len(),
            });
        }
        if cipher.block_size() != BLOCK_LEN {
            return Err(TransformError::BlockSizeMismatch {
                expected: BLOCK_LEN,
                actual: cipher.block_size(),
            });
        }

        let mut iv_buf = [0u8; IV_LEN];
        iv_buf.copy_from_slice(iv);

        Ok(Self {
            cipher,
            mode: direction.mode(),
            key: Zeroizing::new(key.to_vec()),
            iv: iv_buf,
        })
    }

    fn crypter(&self) -> Result<Crypter, openssl::error::ErrorStack> {
        let mut crypter = Crypter::new(self.cipher, self.mode, &self.key, Some(&self.iv))?;
        crypter.pad(false);
        Ok(crypter)
    }

    /// Transforms one chunk, writing the result into `output`.
    ///
    /// `output` must hold at least `input.len() + BLOCK_LEN` bytes, the
    /// scratch room the underlying update call demands. Returns the number
    /// of bytes produced, which must equal `input.len()` with padding
    /// disabled; any other count is an error.
    pub fn transform(&self, input: &[u8], output: &mut [u8]) -> TransformResult<usize> {
        let mut crypter = self.crypter()?;

        let mut count = crypter.update(input, output)?;
        count += crypter.finalize(&mut output[count..])?;

        if count != input.len() {
            return Err(TransformError::OutputLength {
                expected: input.len(),
                actual: count,
            });
        }

        Ok(count)
    }

    /// Runs the stream finalization and returns any residual bytes.
    ///
    /// With padding disabled and block-aligned inputs this is always empty;
    /// callers persist a non-empty residual as a diagnostic artifact.
    pub fn finish(&self) -> TransformResult<Vec<u8>> {
        let mut crypter = self.crypter()?;
        let mut buf = vec![0u8; BLOCK_LEN];
        let count = crypter.finalize(&mut buf)?;
        buf.truncate(count);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Vec<u8> {
        (0u8..KEY_LEN as u8).collect()
    }

    fn test_iv() -> Vec<u8> {
        (100u8..100 + IV_LEN as u8).collect()
    }

    #[test]
    fn test_rejects_bad_key_length() {
        let err = ChunkCipher::new(Direction::Encrypt, &[0u8; 16], &test_iv()).unwrap_err();
        assert!(matches!(
            err,
            TransformError::KeyLength {
                expected: KEY_LEN,
                actual: 16
            }
        ));
    }

    #[test]
    fn test_rejects_bad_iv_length() {
        let err = ChunkCipher::new(Direction::Encrypt, &test_key(), &[0u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            TransformError::IvLength {
                expected: IV_LEN,
                actual: 8
            }
        ));
    }

    #[test]
    fn test_chunk_round_trip() {
        let enc = ChunkCipher::new(Direction::Encrypt, &test_key(), &test_iv()).unwrap();
        let dec = ChunkCipher::new(Direction::Decrypt, &test_key(), &test_iv()).unwrap();

        let plaintext: Vec<u8> = (0..64).map(|i| (i * 7 + 3) as u8).collect();
        let mut ciphertext = vec![0u8; plaintext.len() + BLOCK_LEN];
        let n = enc.transform(&plaintext, &mut ciphertext).unwrap();
        assert_eq!(n, plaintext.len());
        assert_ne!(&ciphertext[..n], &plaintext[..]);

        let mut recovered = vec![0u8; n + BLOCK_LEN];
        let m = dec.transform(&ciphertext[..n], &mut recovered).unwrap();
        assert_eq!(m, plaintext.len());
        assert_eq!(&recovered[..m], &plaintext[..]);
    }

    #[test]
    fn test_transform_is_deterministic_per_chunk() {
        let enc = ChunkCipher::new(Direction::Encrypt, &test_key(), &test_iv()).unwrap();

        let chunk = [0xABu8; 32];
        let mut first = vec![0u8; chunk.len() + BLOCK_LEN];
        let mut second = vec![0u8; chunk.len() + BLOCK_LEN];
        let n1 = enc.transform(&chunk, &mut first).unwrap();
        let n2 = enc.transform(&chunk, &mut second).unwrap();

        assert_eq!(&first[..n1], &second[..n2]);
    }

    #[test]
    fn test_matches_reference_cbc() {
        let key = test_key();
        let iv = test_iv();
        let enc = ChunkCipher::new(Direction::Encrypt, &key, &iv).unwrap();

        let plaintext = [0x42u8; 16];
        let mut out = vec![0u8; plaintext.len() + BLOCK_LEN];
        let n = enc.transform(&plaintext, &mut out).unwrap();

        let mut reference =
            Crypter::new(Cipher::aes_256_cbc(), Mode::Encrypt, &key, Some(&iv)).unwrap();
        reference.pad(false);
        let mut expected = vec![0u8; plaintext.len() + BLOCK_LEN];
        let mut count = reference.update(&plaintext, &mut expected).unwrap();
        count += reference.finalize(&mut expected[count..]).unwrap();

        assert_eq!(&out[..n], &expected[..count]);
    }

    #[test]
    fn test_finish_is_empty_with_padding_disabled() {
        let enc = ChunkCipher::new(Direction::Encrypt, &test_key(), &test_iv()).unwrap();
        assert!(enc.finish().unwrap().is_empty());
    }

    #[test]
    fn test_direction_tags() {
        assert_eq!(Direction::Encrypt.tag(), "enc");
        assert_eq!(Direction::Decrypt.tag(), "dec");
        assert_eq!(Direction::Encrypt.inverse(), Direction::Decrypt);
        assert_eq!(Direction::Decrypt.inverse(), Direction::Encrypt);
    }
}
