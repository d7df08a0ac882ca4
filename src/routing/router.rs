use super::types::{Category, NAMESPACE_ROOT, ShardEntry, ShardId, ShardMapping, ShardTarget};
use crate::error::RouteError;

use std::path::Path;

/// A path exactly as the client typed it. May start with `~`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPath(String);

impl VirtualPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rewrites a leading home marker against `home`.
    ///
    /// Consumes the raw path, so an expanded path can never be expanded a second time.
    pub fn expand(self, home: &Path) -> ExpandedPath {
        let home = home.to_string_lossy();
        let home = home.trim_end_matches('/');

        if self.0 == "~" {
            return ExpandedPath(home.to_string());
        }
        match self.0.strip_prefix("~/") {
            Some(rest) => ExpandedPath(format!("{}/{}", home, rest)),
            None => ExpandedPath(self.0),
        }
    }
}

/// A virtual path after home expansion. Only `VirtualPath::expand` builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedPath(String);

impl ExpandedPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends a plain file name to a directory path.
    pub fn join(&self, file_name: &str) -> Result<ExpandedPath, RouteError> {
        join_file_name(&self.0, file_name).map(ExpandedPath)
    }
}

/// Outcome of a successful classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub category: Category,
    pub shard: ShardId,
    pub target: ShardTarget,
    /// The path as the owning node expects it on the wire.
    pub path: String,
}

/// Maps virtual paths onto the node that owns them.
#[derive(Debug, Clone)]
pub struct Router {
    mapping: ShardMapping,
    namespace: String,
}

impl Router {
    pub fn new(mapping: ShardMapping) -> Self {
        Self {
            mapping,
            namespace: NAMESPACE_ROOT.to_string(),
        }
    }

    pub fn mapping(&self) -> &ShardMapping {
        &self.mapping
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entry(&self, category: Category) -> Result<&ShardEntry, RouteError> {
        self.mapping
            .entry(category)
            .ok_or_else(|| RouteError::UnsupportedType(category.to_string()))
    }

    /// Classifies a file path by its extension and rewrites it for the owner.
    pub fn classify(&self, path: &ExpandedPath) -> Result<Route, RouteError> {
        if path.as_str().is_empty() {
            return Err(RouteError::EmptyPath);
        }

        let category = Category::from_path(path.as_str())
            .ok_or_else(|| RouteError::UnsupportedType(path.as_str().to_string()))?;

        let route = self.rewrite_for(path, category)?;

        tracing::debug!(
            "Classified {} as {} -> {} ({})",
            path.as_str(),
            category,
            route.shard,
            route.path
        );

        Ok(route)
    }

    /// Rewrites any path (typically a directory) for the owner of `category`.
    pub fn rewrite_for(&self, path: &ExpandedPath, category: Category) -> Result<Route, RouteError> {
        if path.as_str().is_empty() {
            return Err(RouteError::EmptyPath);
        }

        let entry = self.entry(category)?;

        let rewritten = replace_segment(path.as_str(), &self.namespace, &entry.root_segment)
            .ok_or_else(|| RouteError::MissingRoot {
                path: path.as_str().to_string(),
                segment: self.namespace.clone(),
            })?;

        // The owner resolves from the first occurrence of its own segment
        let shadowed = path
            .as_str()
            .split('/')
            .take_while(|segment| *segment != self.namespace)
            .any(|segment| segment == entry.root_segment);
        if shadowed {
            return Err(RouteError::ShadowedRoot {
                path: path.as_str().to_string(),
                segment: entry.root_segment.clone(),
            });
        }

        Ok(Route {
            category,
            shard: entry.shard.clone(),
            target: entry.target,
            path: rewritten,
        })
    }
}

/// Replaces the first segment equal to `from`. Every other segment, including empty
/// ones from leading or trailing slashes, is kept as is.
pub fn replace_segment(path: &str, from: &str, to: &str) -> Option<String> {
    let mut segments: Vec<&str> = path.split('/').collect();
    let idx = segments.iter().position(|segment| *segment == from)?;
    segments[idx] = to;
    Some(segments.join("/"))
}

/// Appends a plain file name (no `/`, no whitespace, not `.` or `..`) to a directory path.
pub fn join_file_name(dir: &str, file_name: &str) -> Result<String, RouteError> {
    if file_name.is_empty()
        || file_name.contains('/')
        || file_name.contains(char::is_whitespace)
        || file_name == "."
        || file_name == ".."
    {
        return Err(RouteError::InvalidFilename(file_name.to_string()));
    }
    Ok(format!("{}/{}", dir.trim_end_matches('/'), file_name))
}
