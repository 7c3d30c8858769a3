//! Bearer tokens: HS256 JWTs carrying the caller's user id and login.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use lockbox_core::UserId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;

/// Lifetime of every issued token.
pub const SESSION_DURATION: Duration = Duration::from_secs(30 * 60);

/// Identity claim embedded in a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id, used as the owner key on secrets.
    pub id: i64,
    /// Login name at issuance time.
    pub login: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

impl Claims {
    pub fn owner(&self) -> UserId {
        UserId(self.id)
    }
}

/// Signing and verification keys derived from the shared server secret.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl TokenKeys {
    pub fn new(secret: &[u8]) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptyKey);
        }

        // Expiry is checked by hand against an injectable clock, with no leeway.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Issue a token for `user` valid for [`SESSION_DURATION`] from now.
    pub fn issue(&self, user: UserId, login: &str) -> Result<String, AuthError> {
        self.issue_at(user, login, now_secs())
    }

    /// Issue a token as if the current time were `now` (seconds since epoch).
    pub fn issue_at(&self, user: UserId, login: &str, now: u64) -> Result<String, AuthError> {
        let claims = Claims {
            id: user.get(),
            login: login.to_string(),
            exp: now + SESSION_DURATION.as_secs(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))?;

        debug!(user = %user, exp = claims.exp, "issued bearer token");
        Ok(token)
    }

    /// Verify a token against the wall clock.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, now_secs())
    }

    /// Verify signature, structure and expiry as of `now`.
    ///
    /// A bad signature is reported as [`AuthError::InvalidSignature`]; every
    /// other defect (malformed token, wrong algorithm, missing claims,
    /// expiry at or before `now`) as [`AuthError::InvalidToken`].
    pub fn verify_at(&self, token: &str, now: u64) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            }
        })?;

        if data.claims.exp <= now {
            return Err(AuthError::InvalidToken);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_750_000_000;

    fn keys() -> TokenKeys {
        TokenKeys::new(b"test-signing-key").unwrap()
    }

    #[test]
    fn test_issue_verify_roundtrip() {
        let k = keys();
        let token = k.issue_at(UserId(42), "alice", NOW).unwrap();
        let claims = k.verify_at(&token, NOW + 1).unwrap();

        assert_eq!(claims.id, 42);
        assert_eq!(claims.login, "alice");
        assert_eq!(claims.owner(), UserId(42));
    }

    #[test]
    fn test_expiry_is_thirty_minutes() {
        let k = keys();
        let token = k.issue_at(UserId(1), "bob", NOW).unwrap();
        let claims = k.verify_at(&token, NOW).unwrap();
        assert_eq!(claims.exp, NOW + 1800);
    }

    #[test]
    fn test_expired_token_rejected() {
        let k = keys();
        let token = k.issue_at(UserId(1), "bob", NOW).unwrap();

        assert!(k.verify_at(&token, NOW + 1799).is_ok());
        assert_eq!(k.verify_at(&token, NOW + 1800), Err(AuthError::InvalidToken));
        assert_eq!(k.verify_at(&token, NOW + 7200), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_wrong_key_is_signature_error() {
        let token = keys().issue_at(UserId(1), "bob", NOW).unwrap();
        let other = TokenKeys::new(b"another-key").unwrap();
        assert_eq!(other.verify_at(&token, NOW), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_garbled_token_rejected() {
        let k = keys();
        assert_eq!(k.verify_at("", NOW), Err(AuthError::InvalidToken));
        assert_eq!(k.verify_at("not.a.jwt", NOW), Err(AuthError::InvalidToken));
        assert_eq!(k.verify_at("garbage", NOW), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_missing_claims_rejected() {
        #[derive(Serialize)]
        struct Partial {
            id: i64,
            exp: u64,
        }

        let token = encode(
            &Header::new(Algorithm::HS256),
            &Partial { id: 1, exp: NOW + 60 },
            &EncodingKey::from_secret(b"test-signing-key"),
        )
        .unwrap();
        assert_eq!(keys().verify_at(&token, NOW), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_missing_exp_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({ "id": 1, "login": "bob" }),
            &EncodingKey::from_secret(b"test-signing-key"),
        )
        .unwrap();
        assert_eq!(keys().verify_at(&token, NOW), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let claims = Claims {
            id: 1,
            login: "bob".into(),
            exp: NOW + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"test-signing-key"),
        )
        .unwrap();
        assert_eq!(keys().verify_at(&token, NOW), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_empty_key_refused() {
        assert!(matches!(TokenKeys::new(b""), Err(AuthError::EmptyKey)));
    }

    #[test]
    fn test_verify_uses_wall_clock() {
        let k = keys();
        let token = k.issue(UserId(9), "carol").unwrap();
        assert_eq!(k.verify(&token).unwrap().id, 9);
    }
}
