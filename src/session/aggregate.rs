//! Listing Aggregation
//!
//! Merges the partial, unordered listings returned by independent nodes into the single
//! response a `display` command sends back.

use crate::routing::types::Category;

use std::collections::HashSet;

/// One node's answer for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub category: Category,
    pub entries: Vec<String>,
}

impl Listing {
    pub fn new(category: Category, entries: Vec<String>) -> Self {
        Self { category, entries }
    }
}

/// Concatenates listings in category order (`.c`, `.pdf`, `.txt`).
///
/// Within a category entries are sorted; entries of the wrong category and duplicates
/// are dropped.
pub fn merge(mut listings: Vec<Listing>) -> Vec<String> {
    listings.sort_by_key(|listing| listing.category);

    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for listing in listings {
        let mut entries: Vec<String> = listing
            .entries
            .into_iter()
            .filter(|entry| {
                let file_name = entry.rsplit('/').next().unwrap_or(entry);
                let belongs = listing.category.matches(file_name);
                if !belongs {
                    tracing::warn!(
                        "Dropping '{}' from the {} listing: wrong category",
                        entry,
                        listing.category
                    );
                }
                belongs
            })
            .collect();
        entries.sort();

        for entry in entries {
            if seen.insert(entry.clone()) {
                merged.push(entry);
            }
        }
    }

    merged
}

/// One newline-terminated line per entry.
pub fn render(entries: &[String]) -> String {
    let mut out = String::with_capacity(entries.iter().map(|e| e.len() + 1).sum());
    for entry in entries {
        out.push_str(entry);
        out.push('\n');
    }
    out
}
