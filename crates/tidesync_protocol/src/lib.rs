//! # Tidesync Protocol
//!
//! Replication protocol types for Tidesync.
//!
//! This crate provides:
//! - `Document` and `ChangeRecord`, the units the engine moves around
//! - `Revision` parsing and local revision derivation
//! - `EchoTagger` for tagging pulled documents per endpoint
//! - `EndpointId`, the stable identity of a remote
//! - `Checkpoint`, the persisted replication progress document
//! - Canonical JSON serialization for stable hashing
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod checkpoint;
mod document;
mod endpoint;
mod error;
mod revision;

pub use canonical::{canonical_bytes, sha256_hex};
pub use checkpoint::{checkpoint_key, is_reserved_key, Checkpoint, CHECKPOINT_PREFIX, RESERVED_PREFIX};
pub use document::{coalesce, primary_key_of, AttachmentMeta, Body, ChangeRecord, Document};
pub use endpoint::EndpointId;
pub use error::{ProtocolError, ProtocolResult};
pub use revision::{tag_revision, was_tagged_by, EchoTagger, Revision, PULL_MARKER};
