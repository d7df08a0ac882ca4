use crate::error::RouteError;
use crate::routing::router::Router;
use crate::storage::node::StorageNode;

use std::fmt;
use std::path::PathBuf;

/// Identifies one accepted connection in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first block is enough to tell sessions apart in a log
        f.write_str(self.0.split('-').next().unwrap_or(&self.0))
    }
}

/// How a node treats incoming paths.
#[derive(Debug, Clone)]
pub enum Role {
    /// Client-facing: expands, classifies and forwards.
    Coordinator { router: Router, home: PathBuf },
    /// Serves already-rewritten paths for its own category only.
    Shard,
}

/// Everything a session needs to serve commands. Shared read-only between sessions.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub storage: StorageNode,
    pub role: Role,
}

impl NodeContext {
    /// A coordinator whose mapping must send exactly its storage category to `Local`.
    pub fn coordinator(
        storage: StorageNode,
        router: Router,
        home: PathBuf,
    ) -> Result<Self, RouteError> {
        let local = router.mapping().local_categories();
        if local != [storage.category()] {
            return Err(RouteError::Mapping(format!(
                "the coordinator stores {} locally, but the mapping serves {:?} locally",
                storage.category(),
                local
            )));
        }

        let segment = &router.entry(storage.category())?.root_segment;
        if segment != storage.root_segment() {
            return Err(RouteError::Mapping(format!(
                "local root segment '{}' does not match the mapping's '{}'",
                storage.root_segment(),
                segment
            )));
        }

        Ok(Self {
            storage,
            role: Role::Coordinator { router, home },
        })
    }

    pub fn shard(storage: StorageNode) -> Self {
        Self {
            storage,
            role: Role::Shard,
        }
    }

    pub fn is_shard(&self) -> bool {
        matches!(self.role, Role::Shard)
    }
}
