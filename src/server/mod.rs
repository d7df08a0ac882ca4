//! Server Module
//!
//! Accepts client connections and runs every session as its own task.
//!
//! ## Core Concepts
//! - **Isolation**: Sessions share nothing but the read-only node context and the disk.
//! - **Reaping**: Finished session tasks are collected after every accept without blocking;
//!   a panicking session is logged and never takes the listener down.
//! - **Shutdown**: The accept loop stops when the shutdown future resolves; running sessions
//!   are aborted, which also kills any archive child they own.

pub mod listener;

#[cfg(test)]
mod tests;
