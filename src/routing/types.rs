use crate::error::RouteError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Namespace segment every client-visible path is rooted at.
pub const NAMESPACE_ROOT: &str = "smain";

/// A file category. Each one is owned by exactly one storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    C,
    Pdf,
    Txt,
}

impl Category {
    /// Fixed order used when results from several nodes are concatenated.
    pub const ALL: [Category; 3] = [Category::C, Category::Pdf, Category::Txt];

    pub fn extension(self) -> &'static str {
        match self {
            Category::C => ".c",
            Category::Pdf => ".pdf",
            Category::Txt => ".txt",
        }
    }

    /// Accepts `.pdf` as well as `pdf`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.strip_prefix('.').unwrap_or(ext) {
            "c" => Some(Category::C),
            "pdf" => Some(Category::Pdf),
            "txt" => Some(Category::Txt),
            _ => None,
        }
    }

    /// Classifies a path by the text after the last `.` of its final segment.
    pub fn from_path(path: &str) -> Option<Self> {
        let name = path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Self::from_extension(ext)
    }

    /// Root segment of the node that owns this category in the standard layout.
    pub fn default_root_segment(self) -> &'static str {
        match self {
            Category::C => NAMESPACE_ROOT,
            Category::Pdf => "spdf",
            Category::Txt => "stext",
        }
    }

    /// Name under which a node's pre-built archive is requested (`pdf.tar`).
    pub fn archive_name(self) -> String {
        format!("{}.tar", &self.extension()[1..])
    }

    pub fn matches(self, file_name: &str) -> bool {
        let ext = self.extension();
        file_name.len() > ext.len() && file_name.ends_with(ext)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Category {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| RouteError::UnsupportedType(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ShardId(pub String);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the owner of a category can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardTarget {
    /// Served by the coordinator's own storage node.
    Local,
    Remote(SocketAddr),
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub category: Category,
    pub shard: ShardId,
    /// Replaces `NAMESPACE_ROOT` in paths sent to this shard.
    pub root_segment: String,
    pub target: ShardTarget,
}

/// Static category -> owner table. Holds exactly one entry per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ShardEntry>", into = "Vec<ShardEntry>")]
pub struct ShardMapping {
    entries: Vec<ShardEntry>,
}

impl ShardMapping {
    pub fn new(mut entries: Vec<ShardEntry>) -> Result<Self, RouteError> {
        entries.sort_by_key(|entry| entry.category);

        for category in Category::ALL {
            let owners = entries.iter().filter(|e| e.category == category).count();
            if owners != 1 {
                return Err(RouteError::Mapping(format!(
                    "category {} has {} owners, expected exactly one",
                    category, owners
                )));
            }
        }

        if let Some(entry) = entries
            .iter()
            .find(|e| e.root_segment.is_empty() || e.root_segment.contains('/'))
        {
            return Err(RouteError::Mapping(format!(
                "root segment '{}' for {} must be a single path segment",
                entry.root_segment, entry.category
            )));
        }

        Ok(Self { entries })
    }

    /// `.c` stays on the coordinator, `.pdf` and `.txt` go to their shards.
    pub fn standard(pdf_shard: SocketAddr, text_shard: SocketAddr) -> Self {
        let entry = |category: Category, target| ShardEntry {
            category,
            shard: ShardId(category.default_root_segment().to_string()),
            root_segment: category.default_root_segment().to_string(),
            target,
        };

        Self {
            entries: vec![
                entry(Category::C, ShardTarget::Local),
                entry(Category::Pdf, ShardTarget::Remote(pdf_shard)),
                entry(Category::Txt, ShardTarget::Remote(text_shard)),
            ],
        }
    }

    pub fn entry(&self, category: Category) -> Option<&ShardEntry> {
        self.entries.iter().find(|e| e.category == category)
    }

    pub fn entries(&self) -> &[ShardEntry] {
        &self.entries
    }

    /// The categories the coordinator serves from its own disk.
    pub fn local_categories(&self) -> Vec<Category> {
        self.entries
            .iter()
            .filter(|e| e.target == ShardTarget::Local)
            .map(|e| e.category)
            .collect()
    }
}

impl TryFrom<Vec<ShardEntry>> for ShardMapping {
    type Error = RouteError;

    fn try_from(entries: Vec<ShardEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<ShardMapping> for Vec<ShardEntry> {
    fn from(mapping: ShardMapping) -> Self {
        mapping.entries
    }
}
