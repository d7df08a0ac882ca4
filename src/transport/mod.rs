//! Transport Module
//!
//! Moves raw bytes between connections, files and subprocesses.
//!
//! ## Core Concepts
//! - **Chunk streams**: Every data source is turned into a lazy, finite stream of `Bytes`
//!   chunks no larger than `CHUNK_SIZE`. Nothing is buffered beyond one chunk.
//! - **End-of-stream**: A sink is finished with an explicit end-of-stream step, which on a
//!   socket is a half-close of the outbound direction.
//! - **Shard connector**: The coordinator talks to a shard over one short-lived connection
//!   per forwarded operation. There are no retries.

pub mod connector;
pub mod relay;

#[cfg(test)]
mod tests;
