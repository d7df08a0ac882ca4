//! Storage Node Module
//!
//! Implements the storage-node side of the protocol: every node (the coordinator for its
//! own category and each shard for theirs) runs the same operations against its root.
//!
//! ## Core Concepts
//! - **Scoping**: Wire paths are resolved below the node's root directory by locating the
//!   node's root segment. Paths that escape the root are rejected.
//! - **Streaming**: Uploads and downloads move through chunk streams, never whole files.
//! - **Archives**: `tar` runs as a scoped child process whose stdout is relayed and which is
//!   always reaped before the operation returns.

pub mod archive;
pub mod node;
pub mod protocol;
