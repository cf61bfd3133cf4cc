//! Identity key generation.

use std::fmt;

/// What kind of caller identity a key was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// A recognized API token
    Token,
    /// The caller's network address
    Ip,
}

impl IdentityKind {
    /// Namespace prefix used in the store key.
    pub fn prefix(&self) -> &'static str {
        match self {
            IdentityKind::Token => "token",
            IdentityKind::Ip => "ip",
        }
    }
}

/// A key that uniquely identifies a rate-limited caller.
///
/// The raw identity is namespaced by its kind (`token:<value>` or
/// `ip:<value>`), so a token and an address with the same text never share
/// a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    kind: IdentityKind,
    key: String,
}

impl IdentityKey {
    /// Create a key for an API token.
    pub fn token(value: &str) -> Self {
        Self::new(IdentityKind::Token, value)
    }

    /// Create a key for a caller address.
    pub fn ip(address: &str) -> Self {
        Self::new(IdentityKind::Ip, address)
    }

    fn new(kind: IdentityKind, value: &str) -> Self {
        Self {
            kind,
            key: format!("{}:{}", kind.prefix(), value),
        }
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// The namespaced key as stored in the counter store.
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
