//! # Tidesync Engine
//!
//! Checkpointed pull/push replication between a local document store and a
//! remote endpoint.
//!
//! This crate provides:
//! - `ReplicationSession`, the run coordinator (coalescing, retry, live mode)
//! - Pull and push cycles driven by caller-supplied request builders
//! - `CheckpointStore`, durable per-endpoint progress kept in the local store
//! - Event channels for received documents, sent rows, activity and errors
//! - Transport abstraction with mock and HTTP implementations
//!
//! ## Architecture
//!
//! Every run pulls first and pushes second:
//! 1. Pull remote pages until a short page, writing rows with echo-tagged
//!    revisions (pulled state always wins locally)
//! 2. Push local changes since the push checkpoint, skipping documents
//!    tagged for this endpoint
//!
//! ## Key Invariants
//!
//! - At most one run per session executes at a time
//! - Checkpoints are written only after the network operation they cover
//! - Pulled documents are never pushed back to the endpoint they came from
//! - Runtime failures are reported on the error channel and retried, never
//!   returned from `run()`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod context;
mod error;
mod events;
mod http;
mod pull;
mod push;
mod session;
mod state;
mod transport;

pub use checkpoint::CheckpointStore;
pub use config::{
    CursorBuilder, PullOptions, PullRequestBuilder, PushOptions, PushRequestBuilder,
    ReplicationOptions, ResponseExtractor, RowModifier, DEFAULT_BATCH_SIZE, DEFAULT_PAGE_SIZE,
};
pub use error::{ReplicationError, ReplicationResult};
pub use events::ReplicationEvents;
pub use http::{HttpClient, HttpResponse, HttpTransport};
#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
pub use session::ReplicationSession;
pub use state::{ReplicationStats, RunState};
pub use transport::{MockTransport, RemoteRequest, RequestKind, Transport};
