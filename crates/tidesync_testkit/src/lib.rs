//! # Tidesync Testkit
//!
//! Test utilities for Tidesync.
//!
//! This crate provides:
//! - Fixtures: human documents and schema, options matching the reference
//!   server's wire format, a store wired to a server
//! - Transports: loopback to the reference server and an unreachable one
//! - Property-based test generators using proptest
//! - Tracing initialization and async polling helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidesync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn replicates() {
//!     let setup = TestReplication::new();
//!     setup.put_local(human("h1", "Ada", 36));
//!     let session = setup.start(replication_options());
//!     session.stopped().await;
//!     assert_eq!(setup.server.live_count(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod transports;
pub mod wait;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::transports::*;
    pub use crate::wait::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use transports::*;
pub use wait::*;
