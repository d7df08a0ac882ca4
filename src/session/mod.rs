//! Session Module
//!
//! Serves one accepted connection from its first command to its end.
//!
//! ## Core Concepts
//! - **Sequential commands**: A session reads one header, runs it to completion and only then
//!   reads the next. Forwarded operations finish (shard connection closed) before that.
//! - **Roles**: The coordinator classifies and forwards; a shard serves already-rewritten
//!   paths from its own store and also accepts the bare store header.
//! - **Failure scope**: Malformed input is ignored, failed commands answer with one
//!   `Error: ...` line. Only a broken client connection ends a session early.
//! - **End-of-stream**: Once either direction has been half-closed (a body was received or a
//!   streamed response was sent), the session ends after the current command.

pub mod aggregate;
pub mod handler;
pub mod types;
