//! lockbox-crypto: envelope encryption for stored secrets
//!
//! Key hierarchy:
//! ```text
//! Master Key (server-wide, from config, truncated to the AES key size)
//!   └── Data Key (per-secret, random, wrapped by the master key)
//!       └── Payload AEAD: AES-GCM (key=data_key, nonce=random_96bit)
//! ```
//!
//! Both the wrapped data key and the sealed payload are stored as text:
//! `base64(nonce) + "*" + base64(ciphertext || tag)`.

pub mod encoding;
pub mod envelope;
pub mod error;
pub mod keys;

pub use envelope::{EnvelopeCipher, EnvelopeParams, Sealed};
pub use error::CipherError;
pub use keys::{DataKey, KeySize, MasterKey};

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Separator between the encoded nonce and ciphertext. Not part of the
/// base64 alphabet.
pub const DEFAULT_DELIMITER: char = '*';
