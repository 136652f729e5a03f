//! # Tidesync Server
//!
//! In-memory reference endpoint for Tidesync replication.
//!
//! This crate provides:
//! - Keyset-paginated pull (`(updatedAt, id)` order) and batched push
//! - A logical clock stamping every write, with tombstones for deletions
//! - Bearer-token authentication (HMAC-SHA256 tokens)
//! - Outage injection and request counters for tests
//!
//! # Authentication
//!
//! Authentication is optional:
//!
//! ```rust,ignore
//! use tidesync_server::{bearer, ServerConfig, SyncServer};
//!
//! let server = SyncServer::new(ServerConfig::default().with_auth(secret));
//! let token = server.issue_token("device-1")?;
//! options = options.with_header("authorization", bearer(&token));
//! ```
//!
//! # Protocol
//!
//! Every request is a JSON object whose `operation` field selects pull or
//! push. Failures are answered with a 4xx/5xx status and a body carrying a
//! top-level `errors` array.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod documents;
mod error;
mod handler;
mod server;

pub use auth::{bearer, AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use documents::{DocumentTable, PullCursor, DELETED_FIELD, ID_FIELD, UPDATED_AT_FIELD};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, Operation, RequestHandler};
pub use server::{ServerResponse, ServerStats, SyncServer};
