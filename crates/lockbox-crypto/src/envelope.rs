//! Envelope encryption: seal a payload under a fresh data key, wrap the data
//! key under the master key.
//!
//! Stored representation (both fields):
//! ```text
//! base64(12-byte nonce) "*" base64(ciphertext || 16-byte tag)
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::encoding;
use crate::error::CipherError;
use crate::keys::{DataKey, KeySize, MasterKey};
use crate::{DEFAULT_DELIMITER, NONCE_SIZE};

/// Fixed parameters of the at-rest format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeParams {
    /// AES key size for master and data keys
    pub key_size: KeySize,
    /// Separator between encoded nonce and ciphertext
    pub delimiter: char,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            key_size: KeySize::Aes128,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

/// A sealed secret: encrypted payload plus its wrapped data key.
///
/// The two halves only exist together; there is no way to build a `Sealed`
/// with one of them missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    ciphertext: String,
    wrapped_key: String,
}

impl Sealed {
    /// Reassemble a sealed value loaded from storage.
    pub fn from_parts(ciphertext: String, wrapped_key: String) -> Self {
        Self {
            ciphertext,
            wrapped_key,
        }
    }

    pub fn ciphertext(&self) -> &str {
        &self.ciphertext
    }

    pub fn wrapped_key(&self) -> &str {
        &self.wrapped_key
    }

    pub fn into_parts(self) -> (String, String) {
        (self.ciphertext, self.wrapped_key)
    }
}

/// Stateless envelope cipher bound to one master key. Safe to share across
/// tasks behind an `Arc`.
#[derive(Debug, Clone)]
pub struct EnvelopeCipher {
    master: MasterKey,
    params: EnvelopeParams,
}

impl EnvelopeCipher {
    /// Build a cipher from configured master key bytes.
    pub fn new(master_key: &[u8], params: EnvelopeParams) -> Result<Self, CipherError> {
        if encoding::in_base64_alphabet(params.delimiter) {
            return Err(CipherError::InvalidDelimiter(params.delimiter));
        }
        Ok(Self {
            master: MasterKey::new(master_key, params.key_size)?,
            params,
        })
    }

    pub fn params(&self) -> EnvelopeParams {
        self.params
    }

    /// Encrypt `plaintext` under a fresh data key and wrap that key.
    ///
    /// Never deterministic: every call draws a new data key and new nonces.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed, CipherError> {
        let data_key = DataKey::generate(self.params.key_size);

        let ciphertext = self.seal_with(data_key.as_bytes(), plaintext)?;
        let wrapped_key = self.seal_with(self.master.as_bytes(), data_key.as_bytes())?;

        Ok(Sealed {
            ciphertext,
            wrapped_key,
        })
    }

    /// Unwrap the data key and decrypt the payload.
    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>, CipherError> {
        let raw_key = Zeroizing::new(self.open_with(self.master.as_bytes(), &sealed.wrapped_key)?);
        let data_key = DataKey::from_unwrapped(&raw_key, self.params.key_size)
            .map_err(|_| CipherError::Decrypt)?;

        self.open_with(data_key.as_bytes(), &sealed.ciphertext)
    }

    fn seal_with(&self, key: &[u8], plaintext: &[u8]) -> Result<String, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = match self.params.key_size {
            KeySize::Aes128 => Aes128Gcm::new_from_slice(key)
                .map_err(|_| CipherError::Encrypt)?
                .encrypt(nonce, plaintext),
            KeySize::Aes256 => Aes256Gcm::new_from_slice(key)
                .map_err(|_| CipherError::Encrypt)?
                .encrypt(nonce, plaintext),
        }
        .map_err(|_| CipherError::Encrypt)?;

        Ok(encoding::encode(
            &nonce_bytes,
            &ciphertext,
            self.params.delimiter,
        ))
    }

    fn open_with(&self, key: &[u8], encoded: &str) -> Result<Vec<u8>, CipherError> {
        let (nonce_bytes, ciphertext) = encoding::decode(encoded, self.params.delimiter)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        match self.params.key_size {
            KeySize::Aes128 => Aes128Gcm::new_from_slice(key)
                .map_err(|_| CipherError::Decrypt)?
                .decrypt(nonce, ciphertext.as_slice()),
            KeySize::Aes256 => Aes256Gcm::new_from_slice(key)
                .map_err(|_| CipherError::Decrypt)?
                .decrypt(nonce, ciphertext.as_slice()),
        }
        .map_err(|_| CipherError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as B64, Engine};
    use proptest::prelude::*;

    const MASTER: &[u8] = b"0123456789abcdef-server-master";

    fn cipher() -> EnvelopeCipher {
        EnvelopeCipher::new(MASTER, EnvelopeParams::default()).unwrap()
    }

    /// Flip one byte of the decoded ciphertext half and re-encode.
    fn tamper(encoded: &str, index: usize) -> String {
        let (nonce, data) = encoded.split_once('*').unwrap();
        let mut bytes = B64.decode(data).unwrap();
        let i = index % bytes.len();
        bytes[i] ^= 0x01;
        format!("{nonce}*{}", B64.encode(bytes))
    }

    /// Flip one byte of the decoded nonce half and re-encode.
    fn tamper_nonce(encoded: &str, index: usize) -> String {
        let (nonce, data) = encoded.split_once('*').unwrap();
        let mut bytes = B64.decode(nonce).unwrap();
        bytes[index % NONCE_SIZE] ^= 0x80;
        format!("{}*{data}", B64.encode(bytes))
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let c = cipher();
        let sealed = c.seal(b"hello, sealed world").unwrap();
        assert_eq!(c.open(&sealed).unwrap(), b"hello, sealed world");
    }

    #[test]
    fn test_seal_open_empty() {
        let c = cipher();
        let sealed = c.seal(b"").unwrap();
        assert_eq!(c.open(&sealed).unwrap(), b"");
    }

    #[test]
    fn test_seal_is_fresh() {
        let c = cipher();
        let a = c.seal(b"same input").unwrap();
        let b = c.seal(b"same input").unwrap();
        assert_ne!(a.ciphertext(), b.ciphertext());
        assert_ne!(a.wrapped_key(), b.wrapped_key());
    }

    #[test]
    fn test_stored_format() {
        let c = cipher();
        let sealed = c.seal(b"abc").unwrap();

        for part in [sealed.ciphertext(), sealed.wrapped_key()] {
            let (nonce, data) = part.split_once('*').unwrap();
            assert_eq!(B64.decode(nonce).unwrap().len(), NONCE_SIZE);
            assert!(!data.contains('*'));
        }

        // wrapped key: 16-byte data key + 16-byte tag
        let (_, key_part) = sealed.wrapped_key().split_once('*').unwrap();
        assert_eq!(B64.decode(key_part).unwrap().len(), 16 + 16);
        // payload: 3 bytes + 16-byte tag
        let (_, data_part) = sealed.ciphertext().split_once('*').unwrap();
        assert_eq!(B64.decode(data_part).unwrap().len(), 3 + 16);
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let sealed = cipher().seal(b"secret").unwrap();
        let other = EnvelopeCipher::new(b"fedcba9876543210", EnvelopeParams::default()).unwrap();
        assert_eq!(other.open(&sealed), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_master_key_truncation_interoperates() {
        // Only the first 16 bytes of the configured key are significant.
        let long = EnvelopeCipher::new(b"0123456789abcdefAAAA", EnvelopeParams::default()).unwrap();
        let exact = EnvelopeCipher::new(b"0123456789abcdef", EnvelopeParams::default()).unwrap();
        let other_tail =
            EnvelopeCipher::new(b"0123456789abcdefBBBBBBBB", EnvelopeParams::default()).unwrap();

        let sealed = long.seal(b"portable").unwrap();
        assert_eq!(exact.open(&sealed).unwrap(), b"portable");
        assert_eq!(other_tail.open(&sealed).unwrap(), b"portable");
    }

    #[test]
    fn test_opens_externally_built_envelope() {
        // Build an envelope by hand with the raw AES-128-GCM primitive to pin
        // the at-rest format.
        let master = &MASTER[..16];
        let data_key = [9u8; 16];
        let nonce_a = [1u8; NONCE_SIZE];
        let nonce_b = [2u8; NONCE_SIZE];

        let wrapped = Aes128Gcm::new_from_slice(master)
            .unwrap()
            .encrypt(Nonce::from_slice(&nonce_a), data_key.as_slice())
            .unwrap();
        let payload = Aes128Gcm::new_from_slice(&data_key)
            .unwrap()
            .encrypt(Nonce::from_slice(&nonce_b), b"interop".as_slice())
            .unwrap();

        let sealed = Sealed::from_parts(
            format!("{}*{}", B64.encode(nonce_b), B64.encode(payload)),
            format!("{}*{}", B64.encode(nonce_a), B64.encode(wrapped)),
        );
        assert_eq!(cipher().open(&sealed).unwrap(), b"interop");
    }

    #[test]
    fn test_swapped_halves_fail() {
        let c = cipher();
        let sealed = c.seal(b"secret").unwrap();
        let (ct, wk) = sealed.into_parts();
        assert_eq!(c.open(&Sealed::from_parts(wk, ct)), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_garbage_fails_opaquely() {
        let c = cipher();
        let sealed = c.seal(b"secret").unwrap();

        let no_delim = Sealed::from_parts("garbage".into(), sealed.wrapped_key().into());
        assert_eq!(c.open(&no_delim), Err(CipherError::Decrypt));

        let empty = Sealed::from_parts(String::new(), String::new());
        assert_eq!(c.open(&empty), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_aes256_params() {
        let params = EnvelopeParams {
            key_size: KeySize::Aes256,
            ..EnvelopeParams::default()
        };
        let c = EnvelopeCipher::new(&[5u8; 32], params).unwrap();
        let sealed = c.seal(b"wide keys").unwrap();
        assert_eq!(c.open(&sealed).unwrap(), b"wide keys");

        assert!(matches!(
            EnvelopeCipher::new(&[5u8; 16], params),
            Err(CipherError::KeyTooShort { expected: 32, .. })
        ));
    }

    #[test]
    fn test_base64_delimiter_refused() {
        let params = EnvelopeParams {
            delimiter: '+',
            ..EnvelopeParams::default()
        };
        assert_eq!(
            EnvelopeCipher::new(MASTER, params).unwrap_err(),
            CipherError::InvalidDelimiter('+')
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let c = cipher();
            let sealed = c.seal(&data).unwrap();
            prop_assert_eq!(c.open(&sealed).unwrap(), data);
        }

        #[test]
        fn prop_tampered_payload_rejected(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            index in any::<usize>(),
        ) {
            let c = cipher();
            let sealed = c.seal(&data).unwrap();
            let forged = Sealed::from_parts(tamper(sealed.ciphertext(), index), sealed.wrapped_key().into());
            prop_assert_eq!(c.open(&forged), Err(CipherError::Decrypt));

            let forged = Sealed::from_parts(tamper_nonce(sealed.ciphertext(), index), sealed.wrapped_key().into());
            prop_assert_eq!(c.open(&forged), Err(CipherError::Decrypt));
        }

        #[test]
        fn prop_tampered_wrapped_key_rejected(index in any::<usize>()) {
            let c = cipher();
            let sealed = c.seal(b"payload").unwrap();
            let forged = Sealed::from_parts(sealed.ciphertext().into(), tamper(sealed.wrapped_key(), index));
            prop_assert_eq!(c.open(&forged), Err(CipherError::Decrypt));

            let forged = Sealed::from_parts(sealed.ciphertext().into(), tamper_nonce(sealed.wrapped_key(), index));
            prop_assert_eq!(c.open(&forged), Err(CipherError::Decrypt));
        }
    }
}
