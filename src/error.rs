//! Error Taxonomy
//!
//! Every failure a single command can hit falls into one of three families:
//! classification (`RouteError`), local filesystem work (`StorageError`) and
//! node-to-node or client-to-node traffic (`TransportError`). All of them are
//! command-local: the session turns them into an `Error: ...` line and keeps
//! reading commands.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The request could not be mapped onto a storage node.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Path '{path}' is not under the '{segment}' namespace")]
    MissingRoot { path: String, segment: String },

    #[error("Path '{path}' has a '{segment}' segment ahead of the namespace root")]
    ShadowedRoot { path: String, segment: String },

    #[error("Invalid file name: '{0}'")]
    InvalidFilename(String),

    #[error("Empty path")]
    EmptyPath,

    #[error("Invalid shard mapping: {0}")]
    Mapping(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid path: '{0}'")]
    InvalidPath(String),

    #[error("'{path}' does not belong to the {expected} store")]
    Category { path: String, expected: &'static str },

    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to delete {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The sender went away before signalling end-of-stream.
    #[error("Upload of {} interrupted: {source}", path.display())]
    Receive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive failed: {0}")]
    Archive(String),

    #[error("Listing failed: {0}")]
    Listing(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{peer} unavailable at {addr}: {source}")]
    Unavailable {
        peer: String,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Transfer with {peer} failed: {source}")]
    Io {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// The remote side answered with an `Error: ...` line.
    #[error("{message}")]
    Remote { peer: String, message: String },

    /// The body we were forwarding failed on its own side.
    #[error("Upload body interrupted: {0}")]
    Body(#[source] io::Error),
}

impl TransportError {
    pub fn io(peer: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            peer: peer.into(),
            source,
        }
    }
}
