//! Connection identity.
//!
//! A [`ClientId`] is minted server-side when a connection is accepted and is
//! never derived from anything the peer sends. IDs are UUID v7 (time-ordered)
//! generated via [`uuid::Uuid::now_v7`], so two handles never share one.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Opaque identity of one connected peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Mint a fresh, unique ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
