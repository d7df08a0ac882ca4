//! Sharded File Storage Library
//!
//! This library crate defines the modules behind the `shardfs` binary: a coordinator that
//! serves clients over TCP and two shard nodes, each storing one file category.
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled subsystems:
//!
//! - **`routing`**: Classifies virtual paths by extension and rewrites them for the node
//!   that owns the category.
//! - **`storage`**: The wire protocol plus the storage-node operations (store, fetch,
//!   delete, list, archive) every node runs against its root directory.
//! - **`transport`**: Chunked byte relaying with half-close as end-of-stream, and the
//!   short-lived connector the coordinator uses to reach a shard.
//! - **`session`**: Per-connection command loop, dispatch and listing aggregation.
//! - **`server`**: The accept loop running one isolated task per session.
//! - **`client`**: A programmatic client for the coordinator.
//! - **`config`**: Node settings and the JSON shard mapping.

pub mod client;
pub mod config;
pub mod error;
pub mod routing;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;
