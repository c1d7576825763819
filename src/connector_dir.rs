//! JSON-directory document store.
//!
//! A [`DocumentSource`] over a directory tree: each subdirectory of the root
//! is a collection, each `*.json` file inside is one document. The file stem
//! is the fallback document id and the file's mtime seeds `_upload_timestamp`
//! when the document carries no modification marker of its own — so edits on
//! disk show up in the content fingerprint.
//!
//! Storage order is file-name order, which is stable across scans.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use walkdir::WalkDir;

use crate::source::{DocumentSource, SourceDocument};

/// Document store rooted at a directory of per-collection subdirectories.
pub struct DirSource {
    name: String,
    root: PathBuf,
}

impl DirSource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("Source root does not exist: {}", root.display());
        }
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn document_files(&self, collection: &str) -> Vec<PathBuf> {
        let dir = self.collection_dir(collection);
        let mut files: Vec<PathBuf> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
    }
}

fn read_document(path: &Path) -> Result<SourceDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse document: {}", path.display()))?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut doc = SourceDocument::from_value(&stem, value);

    if doc.modified_marker().is_empty() {
        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let secs = mtime
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let stamp = Utc
            .timestamp_opt(secs, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        doc.fields
            .insert("_upload_timestamp".to_string(), Value::String(stamp));
    }

    Ok(doc)
}

#[async_trait]
impl DocumentSource for DirSource {
    fn display_name(&self) -> &str {
        &self.name
    }

    async fn count_documents(&self, collection: &str) -> Result<u64> {
        Ok(self.document_files(collection).len() as u64)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn find(&self, collection: &str, limit: Option<usize>) -> Result<Vec<SourceDocument>> {
        let files = self.document_files(collection);
        let take = limit.unwrap_or(files.len());
        files.iter().take(take).map(|p| read_document(p)).collect()
    }
}
