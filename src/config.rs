//! Node Configuration
//!
//! Turns command-line settings (and an optional JSON mapping file) into the immutable
//! `NodeContext` every session of a node shares.

use crate::routing::router::Router;
use crate::routing::types::{Category, ShardMapping};
use crate::session::types::NodeContext;
use crate::storage::node::StorageNode;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_COORDINATOR_ADDR: &str = "0.0.0.0:8086";
pub const DEFAULT_PDF_SHARD_ADDR: &str = "127.0.0.1:8081";
pub const DEFAULT_TEXT_SHARD_ADDR: &str = "127.0.0.1:8082";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub bind: SocketAddr,
    /// Directory backing the coordinator's own category.
    pub root: PathBuf,
    /// Directory `~` stands for in client paths.
    pub home: PathBuf,
    pub mapping: ShardMapping,
}

impl CoordinatorConfig {
    pub fn into_node(self) -> anyhow::Result<NodeContext> {
        let local = self.mapping.local_categories();
        let &[category] = local.as_slice() else {
            anyhow::bail!(
                "the mapping must serve exactly one category locally, found {:?}",
                local
            );
        };

        let segment = self
            .mapping
            .entry(category)
            .map(|entry| entry.root_segment.clone())
            .with_context(|| format!("no mapping entry for {}", category))?;

        let storage = StorageNode::with_segment(category, self.root, segment);
        let node = NodeContext::coordinator(storage, Router::new(self.mapping), self.home)?;

        Ok(node)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub bind: SocketAddr,
    pub category: Category,
    pub root: PathBuf,
    /// Wire-path segment that stands for `root`.
    pub root_segment: String,
}

impl ShardConfig {
    pub fn into_node(self) -> anyhow::Result<NodeContext> {
        if self.root_segment.is_empty() || self.root_segment.contains('/') {
            anyhow::bail!(
                "root segment '{}' must be a single path segment",
                self.root_segment
            );
        }

        let storage = StorageNode::with_segment(self.category, self.root, self.root_segment);
        Ok(NodeContext::shard(storage))
    }
}

/// Reads a mapping table from a JSON file (a list of entries).
pub fn load_mapping(path: &Path) -> anyhow::Result<ShardMapping> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read mapping file {}", path.display()))?;

    let mapping = serde_json::from_str(&raw)
        .with_context(|| format!("invalid mapping file {}", path.display()))?;

    tracing::info!("Loaded shard mapping from {}", path.display());

    Ok(mapping)
}

/// Expands a leading `~` in a local directory argument.
pub fn expand_local(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
