//! The user identifier.
//!
//! `UserId` is an opaque string assigned by the identity provider (an
//! app-user id). It is never parsed for structure; equality is the only
//! operation the sync layer relies on. Hosts that have no identity yet can
//! mint an anonymous one with [`UserId::anonymous`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix for locally minted anonymous ids.
const ANONYMOUS_PREFIX: &str = "$anon:";

/// A user identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an identifier issued by the identity provider.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh anonymous id (UUIDv7, time-ordered).
    pub fn anonymous() -> Self {
        Self(format!("{ANONYMOUS_PREFIX}{}", uuid::Uuid::now_v7().as_simple()))
    }

    /// Whether this id was minted locally by [`UserId::anonymous`].
    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with(ANONYMOUS_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters — for human display only, not lookup.
    pub fn short(&self) -> &str {
        let raw = self.0.strip_prefix(ANONYMOUS_PREFIX).unwrap_or(&self.0);
        match raw.char_indices().nth(8) {
            Some((idx, _)) => &raw[..idx],
            None => raw,
        }
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_ids_are_unique_and_marked() {
        let a = UserId::anonymous();
        let b = UserId::anonymous();
        assert_ne!(a, b);
        assert!(a.is_anonymous());
        assert!(!UserId::new("u1").is_anonymous());
    }

    #[test]
    fn short_skips_anonymous_prefix() {
        let id = UserId::new("$anon:0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(UserId::new("u1").short(), "u1");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = UserId::new("u1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"u1\"");
        let back: UserId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(back, id);
    }
}
