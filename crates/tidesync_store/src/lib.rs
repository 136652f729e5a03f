//! # Tidesync Store
//!
//! The local side of replication.
//!
//! This crate provides:
//! - `LocalStore`, the contract the replication engine needs from a local
//!   document store (change scan, point reads, upserts, change stream)
//! - `SchemaValidator`, the contract for accepting or rejecting documents
//! - `ChangeFeed`, a multi-subscriber change stream
//! - `MemoryStore` and `FieldSchema`, in-memory reference implementations
//!
//! ## Key Invariants
//!
//! - Sequence numbers are assigned by the store and strictly increase
//! - The change scan is coalesced: each primary key appears once, at the
//!   sequence of its latest write
//! - Change events are emitted only after a write is visible to reads

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod error;
mod memory;
mod traits;
mod validator;

pub use change_feed::ChangeFeed;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use traits::LocalStore;
pub use validator::{FieldSchema, FieldType, NoValidation, SchemaValidator, ValidationError};
