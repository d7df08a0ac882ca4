//! Virtual Path Routing Module
//!
//! Decides which storage node owns a client request and where the file lives on that node.
//!
//! ## Core Concepts
//! - **Category**: Files are partitioned by extension (`.c`, `.pdf`, `.txt`), never by hash.
//! - **Mapping**: `ShardMapping` assigns every category to exactly one node (local or remote).
//! - **Rewriting**: Client paths live under the `smain` namespace; before a path leaves the
//!   coordinator, that segment is swapped for the owning node's root segment.
//! - **Home expansion**: A leading `~` is expanded once, before classification.

pub mod router;
pub mod types;
