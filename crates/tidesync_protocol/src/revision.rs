//! Revisions and echo tagging.
//!
//! Every stored document carries a revision of the form `<height>-<hash>`.
//! Application writes get a content hash; documents written by a pull get
//! an *echo tag* instead, whose suffix is derived from the endpoint that
//! produced them. The push side can then recognise its own pulled
//! documents by pure inspection and refuse to send them back.

use crate::canonical::{canonical_bytes, sha256_hex};
use crate::endpoint::EndpointId;
use crate::error::{ProtocolError, ProtocolResult};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Literal appended to every echo tag.
pub const PULL_MARKER: &str = "tsync";

/// Number of hex characters of the content hash kept in an echo tag.
const TAG_DATA_LEN: usize = 16;

/// Number of hex characters of the endpoint hash kept in an echo tag.
const TAG_ENDPOINT_LEN: usize = 24;

/// Number of hex characters of the content hash in a local revision.
const LOCAL_HASH_LEN: usize = 32;

/// A parsed document revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    /// Number of writes this document has seen locally.
    pub height: u64,
    /// Content hash or echo tag.
    pub hash: String,
}

impl Revision {
    /// Creates a revision from its parts.
    pub fn new(height: u64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// Derives the revision for an application write on top of `previous`.
    pub fn next_local(previous: Option<&Revision>, content: &Value) -> Self {
        let digest = sha256_hex(&[&canonical_bytes(content)]);
        Self::new(
            next_height(previous),
            digest[..LOCAL_HASH_LEN].to_string(),
        )
    }

    /// Derives the revision for a pulled document on top of `previous`.
    pub fn next_pulled(previous: Option<&Revision>, tagger: &EchoTagger, content: &Value) -> Self {
        Self::new(next_height(previous), tagger.tag_revision(content))
    }
}

fn next_height(previous: Option<&Revision>) -> u64 {
    previous.map(|rev| rev.height).unwrap_or(0) + 1
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.height, self.hash)
    }
}

impl FromStr for Revision {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        let (height, hash) = s
            .split_once('-')
            .ok_or_else(|| ProtocolError::InvalidRevision(s.to_string()))?;
        let height = height
            .parse::<u64>()
            .map_err(|_| ProtocolError::InvalidRevision(s.to_string()))?;
        if hash.is_empty() {
            return Err(ProtocolError::InvalidRevision(s.to_string()));
        }
        Ok(Self::new(height, hash))
    }
}

/// Tags and recognises revisions of documents pulled from one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoTagger {
    endpoint: EndpointId,
    suffix: String,
}

impl EchoTagger {
    /// Creates a tagger for `endpoint`.
    pub fn new(endpoint: EndpointId) -> Self {
        let suffix = format!("{}{}", &endpoint.as_str()[..TAG_ENDPOINT_LEN], PULL_MARKER);
        Self { endpoint, suffix }
    }

    /// Returns the endpoint this tagger belongs to.
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// Returns the revision marker for `content` pulled from this endpoint.
    ///
    /// The marker is deterministic in (endpoint, content) and differs
    /// between endpoints for identical content.
    pub fn tag_revision(&self, content: &Value) -> String {
        let digest = sha256_hex(&[self.endpoint.as_str().as_bytes(), &canonical_bytes(content)]);
        format!("{}{}", &digest[..TAG_DATA_LEN], self.suffix)
    }

    /// Returns true if `revision` was produced by [`tag_revision`](Self::tag_revision)
    /// for this endpoint. Accepts both bare markers and full `height-marker`
    /// revision strings.
    pub fn was_tagged_by(&self, revision: &str) -> bool {
        let marker = match revision.parse::<Revision>() {
            Ok(rev) => rev.hash,
            Err(_) => revision.to_string(),
        };
        marker.len() == TAG_DATA_LEN + self.suffix.len() && marker.ends_with(&self.suffix)
    }
}

/// Returns the revision marker for `content` pulled from `endpoint`.
pub fn tag_revision(endpoint: &EndpointId, content: &Value) -> String {
    EchoTagger::new(endpoint.clone()).tag_revision(content)
}

/// Returns true if `revision` was tagged by `endpoint`.
pub fn was_tagged_by(endpoint: &EndpointId, revision: &str) -> bool {
    EchoTagger::new(endpoint.clone()).was_tagged_by(revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn endpoint(url: &str) -> EndpointId {
        EndpointId::from_url(url)
    }

    #[test]
    fn revision_roundtrip() {
        let rev: Revision = "3-abcdef".parse().unwrap();
        assert_eq!(rev.height, 3);
        assert_eq!(rev.hash, "abcdef");
        assert_eq!(rev.to_string(), "3-abcdef");
    }

    #[test]
    fn invalid_revisions() {
        assert!("abcdef".parse::<Revision>().is_err());
        assert!("x-abcdef".parse::<Revision>().is_err());
        assert!("4-".parse::<Revision>().is_err());
    }

    #[test]
    fn local_revision_height_increments() {
        let content = json!({"id": "a", "age": 20});
        let first = Revision::next_local(None, &content);
        let second = Revision::next_local(Some(&first), &content);

        assert_eq!(first.height, 1);
        assert_eq!(second.height, 2);
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.hash.len(), 32);
    }

    #[test]
    fn tag_is_deterministic() {
        let tagger = EchoTagger::new(endpoint("https://a.example.com"));
        let content = json!({"id": "a", "name": "Alice"});
        assert_eq!(tagger.tag_revision(&content), tagger.tag_revision(&content));
    }

    #[test]
    fn tag_differs_per_endpoint() {
        let content = json!({"id": "a"});
        let a = tag_revision(&endpoint("https://a.example.com"), &content);
        let b = tag_revision(&endpoint("https://b.example.com"), &content);
        assert_ne!(a, b);
    }

    #[test]
    fn tagged_revision_is_recognised() {
        let e = endpoint("https://a.example.com");
        let tagger = EchoTagger::new(e.clone());
        let content = json!({"id": "a"});

        let rev = Revision::next_pulled(None, &tagger, &content);
        assert!(tagger.was_tagged_by(&rev.to_string()));
        assert!(was_tagged_by(&e, &rev.hash));
    }

    #[test]
    fn local_revision_is_not_tagged() {
        let tagger = EchoTagger::new(endpoint("https://a.example.com"));
        let rev = Revision::next_local(None, &json!({"id": "a"}));
        assert!(!tagger.was_tagged_by(&rev.to_string()));
    }

    #[test]
    fn other_endpoint_tag_is_not_recognised() {
        let a = EchoTagger::new(endpoint("https://a.example.com"));
        let b = EchoTagger::new(endpoint("https://b.example.com"));
        let rev = Revision::next_pulled(None, &a, &json!({"id": "x"}));
        assert!(!b.was_tagged_by(&rev.to_string()));
    }

    proptest! {
        #[test]
        fn recognition_holds_for_any_content(
            url in "https://[a-z]{1,12}\\.example\\.com",
            name in ".{0,32}",
            age in any::<i32>(),
            height in 0u64..1000,
        ) {
            let tagger = EchoTagger::new(endpoint(&url));
            let previous = Revision::new(height, "deadbeef");
            let rev = Revision::next_pulled(Some(&previous), &tagger, &json!({"name": name, "age": age}));

            prop_assert_eq!(rev.height, height + 1);
            prop_assert!(tagger.was_tagged_by(&rev.to_string()));
        }
    }
}
