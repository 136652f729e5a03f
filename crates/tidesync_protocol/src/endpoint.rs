//! Endpoint identity.

use crate::canonical::sha256_hex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a remote endpoint.
///
/// The identity is the lowercase hex SHA-256 of the remote's connection
/// identity (normally its URL). It namespaces checkpoints and pulled
/// revision tags so one local store can replicate against several remotes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Derives the identity of the endpoint reachable at `url`.
    pub fn from_url(url: &str) -> Self {
        Self(sha256_hex(&[url.as_bytes()]))
    }

    /// Returns the full hex hash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix suitable for log output.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
