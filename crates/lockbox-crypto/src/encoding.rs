//! Text encoding of one AEAD output: `base64(nonce) <delim> base64(ciphertext)`

use base64::{engine::general_purpose::STANDARD as B64, Engine};

use crate::error::CipherError;
use crate::NONCE_SIZE;

/// Characters the standard base64 alphabet (with padding) can produce.
pub fn in_base64_alphabet(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='
}

pub fn encode(nonce: &[u8], ciphertext: &[u8], delimiter: char) -> String {
    let mut out = B64.encode(nonce);
    out.push(delimiter);
    out.push_str(&B64.encode(ciphertext));
    out
}

/// Split and decode an encoded value into `(nonce, ciphertext)`.
pub fn decode(encoded: &str, delimiter: char) -> Result<(Vec<u8>, Vec<u8>), CipherError> {
    let (nonce_b64, data_b64) = encoded
        .split_once(delimiter)
        .ok_or(CipherError::Decrypt)?;

    let nonce = B64.decode(nonce_b64).map_err(|_| CipherError::Decrypt)?;
    if nonce.len() != NONCE_SIZE {
        return Err(CipherError::Decrypt);
    }
    let data = B64.decode(data_b64).map_err(|_| CipherError::Decrypt)?;

    Ok((nonce, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let encoded = encode(&[0u8; NONCE_SIZE], b"abc", '*');
        assert_eq!(encoded, "AAAAAAAAAAAAAAAA*YWJj");

        let (nonce, data) = decode(&encoded, '*').unwrap();
        assert_eq!(nonce, vec![0u8; NONCE_SIZE]);
        assert_eq!(data, b"abc");
    }

    #[test]
    fn test_missing_delimiter() {
        assert_eq!(decode("AAAAAAAAAAAAAAAA", '*'), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_extra_delimiter() {
        assert_eq!(
            decode("AAAAAAAAAAAAAAAA*YWJj*YWJj", '*'),
            Err(CipherError::Decrypt)
        );
    }

    #[test]
    fn test_wrong_nonce_length() {
        assert_eq!(decode("AAAA*YWJj", '*'), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_bad_base64() {
        assert_eq!(
            decode("AAAAAAAAAAAAAAAA*not base64!", '*'),
            Err(CipherError::Decrypt)
        );
    }

    #[test]
    fn test_alphabet() {
        assert!(in_base64_alphabet('A'));
        assert!(in_base64_alphabet('='));
        assert!(!in_base64_alphabet('*'));
        assert!(!in_base64_alphabet('|'));
    }
}
