//! lockbox-auth: who is calling, and are they allowed in
//!
//! - [`token`]: HS256 bearer tokens carrying an identity claim
//! - [`password`]: Argon2id password hashing for the identity service
//! - [`gate`]: tonic interceptor that verifies bearer tokens and hands the
//!   caller identity to handlers as an [`AuthenticatedCall`]

pub mod error;
pub mod gate;
pub mod password;
pub mod token;

pub use error::AuthError;
pub use gate::{AuthGate, AuthenticatedCall, Interrupted, IDENTITY_SERVICE};
pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenKeys, SESSION_DURATION};
