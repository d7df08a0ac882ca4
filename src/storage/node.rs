use super::archive::ArchiveJob;
use crate::error::StorageError;
use crate::routing::types::Category;
use crate::transport::relay::{self, ChunkStream, RelayError};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A node's store for one category, rooted at a local directory.
#[derive(Debug, Clone)]
pub struct StorageNode {
    category: Category,
    root: PathBuf,
    /// The wire-path segment that stands for `root`.
    root_segment: String,
}

impl StorageNode {
    /// Uses the last component of `root` as the root segment.
    pub fn new(category: Category, root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        let segment = root
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StorageError::InvalidPath(root.display().to_string()))?
            .to_string();

        Ok(Self::with_segment(category, root, segment))
    }

    pub fn with_segment(
        category: Category,
        root: impl Into<PathBuf>,
        root_segment: impl Into<String>,
    ) -> Self {
        Self {
            category,
            root: root.into(),
            root_segment: root_segment.into(),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_segment(&self) -> &str {
        &self.root_segment
    }

    /// Maps a wire path onto the local disk.
    ///
    /// Everything up to and including the first segment equal to the root segment is
    /// dropped; the rest is joined onto the root directory.
    pub fn resolve(&self, wire_path: &str) -> Result<PathBuf, StorageError> {
        let invalid = || StorageError::InvalidPath(wire_path.to_string());

        let mut segments = wire_path.split('/');
        if !segments.by_ref().any(|segment| segment == self.root_segment) {
            return Err(invalid());
        }

        let mut path = self.root.clone();
        for segment in segments {
            match segment {
                "" | "." => continue,
                ".." => return Err(invalid()),
                name => path.push(name),
            }
        }

        Ok(path)
    }

    /// Like `resolve`, but the path must name a file of this node's category.
    fn resolve_file(&self, wire_path: &str) -> Result<PathBuf, StorageError> {
        if Category::from_path(wire_path) != Some(self.category) {
            return Err(StorageError::Category {
                path: wire_path.to_string(),
                expected: self.category.extension(),
            });
        }
        self.resolve(wire_path)
    }

    /// Whether `wire_path` is the conventional name of this node's archive.
    pub fn is_archive_name(&self, wire_path: &str) -> bool {
        wire_path == self.category.archive_name()
    }

    /// Writes `body` to `wire_path`, creating parent directories and truncating any
    /// existing file. Returns the number of bytes stored.
    pub async fn store(&self, wire_path: &str, body: ChunkStream<'_>) -> Result<u64, StorageError> {
        let path = self.resolve_file(wire_path)?;

        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;

        match relay::relay_to_end(body, &mut file).await {
            Ok(bytes) => {
                tracing::info!("Stored {} bytes at {}", bytes, path.display());
                Ok(bytes)
            }
            Err(RelayError::Source(source)) => {
                tracing::warn!("Upload to {} interrupted: {}", path.display(), source);
                Err(StorageError::Receive { path, source })
            }
            Err(RelayError::Sink(source)) => {
                tracing::error!("Write to {} failed: {}", path.display(), source);
                Err(StorageError::Write { path, source })
            }
        }
    }

    /// Opens a stored file as a chunk stream.
    pub async fn fetch(&self, wire_path: &str) -> Result<ChunkStream<'static>, StorageError> {
        let path = self.resolve_file(wire_path)?;

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path));
            }
            Err(source) => return Err(StorageError::Read { path, source }),
        };

        let metadata = file.metadata().await.map_err(|source| StorageError::Read {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(path));
        }

        tracing::debug!("Serving {} ({} bytes)", path.display(), metadata.len());

        Ok(relay::chunks(file))
    }

    pub async fn delete(&self, wire_path: &str) -> Result<PathBuf, StorageError> {
        let path = self.resolve_file(wire_path)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Deleted {}", path.display());
                Ok(path)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(path)),
            Err(source) => Err(StorageError::Delete { path, source }),
        }
    }

    /// Lists files of this node's category below `wire_dir`, relative to it and sorted.
    ///
    /// A directory that does not exist lists as empty. A path that is not a directory,
    /// or any entry that cannot be read, fails the whole listing.
    pub async fn list(&self, wire_dir: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.resolve(wire_dir)?;
        let category = self.category;

        tokio::task::spawn_blocking(move || walk(&dir, category))
            .await
            .map_err(|e| StorageError::Listing(e.to_string()))?
            .map_err(StorageError::Listing)
    }

    /// Prepares an archive of every file of this node's category.
    pub async fn archive(&self) -> Result<ArchiveJob, StorageError> {
        let root = self.root.clone();
        let category = self.category;

        let files = tokio::task::spawn_blocking(move || walk(&root, category))
            .await
            .map_err(|e| StorageError::Archive(e.to_string()))?
            .map_err(StorageError::Archive)?;

        ArchiveJob::spawn(&self.root, files)
    }
}

/// Creates `path` and any missing parents. Succeeds if it already exists.
pub async fn ensure_dir(path: &Path) -> Result<(), StorageError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| StorageError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Collects the files of `category` below `dir`, relative to it and sorted.
fn walk(dir: &Path, category: Category) -> Result<Vec<String>, String> {
    match std::fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(format!("{} is not a directory", dir.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(format!("{}: {}", dir.display(), e)),
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| format!("{}: {}", dir.display(), e))?;

        if !entry.file_type().is_file() {
            continue;
        }
        if !entry
            .file_name()
            .to_str()
            .is_some_and(|name| category.matches(name))
        {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| format!("{}: {}", entry.path().display(), e))?;
        let parts: Option<Vec<&str>> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect();
        match parts {
            Some(parts) => files.push(parts.join("/")),
            None => tracing::warn!("Skipping non UTF-8 name {}", entry.path().display()),
        }
    }

    files.sort();
    Ok(files)
}
