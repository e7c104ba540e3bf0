//! Document sources.
//!
//! A [`DocumentSource`] lists the full current document set of one
//! collection. Sources do no change tracking of their own; the reconciler
//! diffs every listing against the stored snapshot.
//!
//! - [`FilesystemSource`] walks a directory with include/exclude globs.
//! - [`InMemorySource`] holds a settable list, for tests and embedding.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::SourceConfig;
use crate::models::{Document, SourceListing, UnreadableDocument};

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Collection identity; keys the snapshot and the writer guard.
    fn collection(&self) -> &str;

    /// Return every document currently in the collection.
    async fn list_documents(&self) -> Result<SourceListing>;
}

// ============ Filesystem ============

/// Files under `root` matching the include globs become documents.
///
/// | Field | Value |
/// |-------|-------|
/// | `id` | path relative to `root`, `/`-separated |
/// | `title` | file name |
/// | `body` | file contents (UTF-8) |
/// | `last_modified` | file mtime |
/// | `version` | `0` |
///
/// A matching file that cannot be read as UTF-8 is reported as unreadable
/// rather than as an empty document.
pub struct FilesystemSource {
    collection: String,
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl FilesystemSource {
    pub fn new(collection: &str, config: &SourceConfig) -> Result<Self> {
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());

        Ok(Self {
            collection: collection.to_string(),
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&default_excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    fn scan(&self) -> Result<SourceListing> {
        if !self.root.exists() {
            bail!("Source root does not exist: {}", self.root.display());
        }

        let mut listing = SourceListing::default();
        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            match file_to_document(path, &rel_str) {
                Ok(doc) => listing.documents.push(doc),
                Err(e) => {
                    warn!(path = %rel_str, error = %e, "unreadable file");
                    listing.unreadable.push(UnreadableDocument {
                        id: rel_str,
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Sort for deterministic ordering
        listing.documents.sort_by(|a, b| a.id.cmp(&b.id));
        listing.unreadable.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listing)
    }
}

#[async_trait]
impl DocumentSource for FilesystemSource {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn list_documents(&self) -> Result<SourceListing> {
        self.scan()
    }
}

fn file_to_document(path: &Path, relative_path: &str) -> Result<Document> {
    let metadata = std::fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::UNIX_EPOCH);

    let body = std::fs::read_to_string(path)?;

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut meta = BTreeMap::new();
    meta.insert("path".to_string(), relative_path.to_string());
    meta.insert("source_url".to_string(), format!("file://{}", path.display()));

    Ok(Document {
        id: relative_path.to_string(),
        title,
        body,
        last_modified: modified,
        version: 0,
        metadata: meta,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ In-memory ============

pub struct InMemorySource {
    collection: String,
    listing: Mutex<SourceListing>,
}

impl InMemorySource {
    pub fn new(collection: &str, documents: Vec<Document>) -> Self {
        Self {
            collection: collection.to_string(),
            listing: Mutex::new(SourceListing {
                documents,
                unreadable: Vec::new(),
            }),
        }
    }

    pub fn set_documents(&self, documents: Vec<Document>) {
        self.lock().documents = documents;
    }

    pub fn set_unreadable(&self, unreadable: Vec<UnreadableDocument>) {
        self.lock().unreadable = unreadable;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SourceListing> {
        self.listing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn list_documents(&self) -> Result<SourceListing> {
        Ok(self.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> SourceConfig {
        SourceConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".into()],
            exclude_globs: vec!["drafts/**".into()],
            follow_symlinks: false,
        }
    }

    #[tokio::test]
    async fn test_filesystem_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("guide")).unwrap();
        std::fs::create_dir_all(dir.path().join("drafts")).unwrap();
        std::fs::write(dir.path().join("guide/setup.md"), "# Setup\nRun it.").unwrap();
        std::fs::write(dir.path().join("readme.md"), "").unwrap();
        std::fs::write(dir.path().join("drafts/wip.md"), "wip").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not included").unwrap();

        let source = FilesystemSource::new("docs", &config(dir.path())).unwrap();
        let listing = source.list_documents().await.unwrap();

        let ids: Vec<&str> = listing.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["guide/setup.md", "readme.md"]);
        assert_eq!(listing.documents[0].title, "setup.md");
        assert_eq!(listing.documents[0].body, "# Setup\nRun it.");
        assert_eq!(listing.documents[0].metadata["path"], "guide/setup.md");
        // Empty files are documents, not unreadable.
        assert_eq!(listing.documents[1].body, "");
        assert!(listing.unreadable.is_empty());
    }

    #[tokio::test]
    async fn test_non_utf8_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.md"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let source = FilesystemSource::new("docs", &config(dir.path())).unwrap();
        let listing = source.list_documents().await.unwrap();
        assert!(listing.documents.is_empty());
        assert_eq!(listing.unreadable.len(), 1);
        assert_eq!(listing.unreadable[0].id, "bin.md");
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilesystemSource::new("docs", &config(&dir.path().join("nope"))).unwrap();
        assert!(source.list_documents().await.is_err());
    }
}
