//! Master key and per-secret data keys, plus the key-length policy

use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CipherError;

/// AES key size used for both the master key and data keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySize {
    /// AES-128-GCM (16-byte keys)
    #[default]
    Aes128,
    /// AES-256-GCM (32-byte keys)
    Aes256,
}

impl KeySize {
    pub fn key_len(self) -> usize {
        match self {
            KeySize::Aes128 => 16,
            KeySize::Aes256 => 32,
        }
    }
}

/// Apply the key-length policy: keys longer than `size` are truncated to
/// their first `size` bytes, shorter keys are refused. No hashing is applied,
/// so the same configured string always yields the same AES key.
pub fn fit_key(raw: &[u8], size: KeySize) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let want = size.key_len();
    if raw.len() < want {
        return Err(CipherError::KeyTooShort {
            expected: want,
            actual: raw.len(),
        });
    }
    Ok(Zeroizing::new(raw[..want].to_vec()))
}

/// The server-wide key that wraps data keys. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl MasterKey {
    /// Build a master key from configured bytes, truncating to `size`.
    pub fn new(raw: &[u8], size: KeySize) -> Result<Self, CipherError> {
        Ok(Self {
            bytes: fit_key(raw, size)?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A random per-secret key. Zeroized on drop.
pub struct DataKey {
    bytes: Vec<u8>,
}

impl DataKey {
    /// Generate a fresh random data key of the given size.
    pub fn generate(size: KeySize) -> Self {
        let mut bytes = vec![0u8; size.key_len()];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Rebuild a data key from unwrapped bytes, applying the key-length policy.
    pub fn from_unwrapped(raw: &[u8], size: KeySize) -> Result<Self, CipherError> {
        let fitted = fit_key(raw, size)?;
        Ok(Self {
            bytes: fitted.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_key_generation() {
        let k1 = DataKey::generate(KeySize::Aes128);
        let k2 = DataKey::generate(KeySize::Aes128);
        assert_eq!(k1.as_bytes().len(), 16);
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_long_key_truncated() {
        let key = MasterKey::new(b"0123456789abcdefTRAILING", KeySize::Aes128).unwrap();
        assert_eq!(key.as_bytes(), b"0123456789abcdef");

        let key = MasterKey::new(&[7u8; 40], KeySize::Aes256).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32][..]);
    }

    #[test]
    fn test_exact_key_kept() {
        let key = MasterKey::new(b"0123456789abcdef", KeySize::Aes128).unwrap();
        assert_eq!(key.as_bytes(), b"0123456789abcdef");
    }

    #[test]
    fn test_short_key_refused() {
        let err = MasterKey::new(b"short", KeySize::Aes128).unwrap_err();
        assert_eq!(
            err,
            CipherError::KeyTooShort {
                expected: 16,
                actual: 5
            }
        );
    }

    #[test]
    fn test_debug_redacts() {
        let key = MasterKey::new(b"0123456789abcdef", KeySize::Aes128).unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
