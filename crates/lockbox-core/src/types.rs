use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of a user row. Doubles as the owner id on secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Primary key of a stored secret, assigned by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretId(pub i64);

impl UserId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl SecretId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known content-type tags used by the CLI. The server treats the tag
/// as a free-form string.
pub mod content_type {
    pub const TEXT: &str = "text";
    pub const FILE: &str = "file";
}
