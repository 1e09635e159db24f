//! Entry persistence: one UTF-8 blob per calendar date.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::domain::DateKey;

const ENTRY_EXTENSION: &str = "md";
const MISSING_ENTRY_NOTE: &str = "no entry found for this date";

#[derive(Debug, Error)]
pub enum EntryStoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result of loading an entry. A date that was never saved loads as empty
/// content with an informational note rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedEntry {
    pub content: String,
    pub note: Option<&'static str>,
}

/// Filesystem-backed entry storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct EntryStore {
    entries_dir: PathBuf,
}

impl EntryStore {
    /// Initialise storage rooted at the provided directory, creating it if
    /// necessary.
    pub fn new(entries_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&entries_dir)?;
        Ok(Self { entries_dir })
    }

    /// Persist the entry for `key`, overwriting any previous content, and
    /// return the path it was written to.
    pub async fn save(&self, key: &DateKey, content: &str) -> Result<PathBuf, EntryStoreError> {
        let path = self.entry_path(key);
        fs::write(&path, content).await?;
        info!(
            target = "application::entries",
            op = "entries::save",
            date_key = %key,
            bytes = content.len(),
            path = %path.display(),
            "Entry saved"
        );
        Ok(path)
    }

    /// Load the entry for `key`. Missing entries are not an error.
    pub async fn load(&self, key: &DateKey) -> Result<LoadedEntry, EntryStoreError> {
        match fs::read_to_string(self.entry_path(key)).await {
            Ok(content) => Ok(LoadedEntry {
                content,
                note: None,
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(LoadedEntry {
                content: String::new(),
                note: Some(MISSING_ENTRY_NOTE),
            }),
            Err(err) => Err(EntryStoreError::Io(err)),
        }
    }

    pub fn entry_path(&self, key: &DateKey) -> PathBuf {
        self.entries_dir
            .join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    pub fn entries_dir(&self) -> &Path {
        &self.entries_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> EntryStore {
        EntryStore::new(dir.path().join("entries")).expect("entry store")
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let key = DateKey::parse("2024-01-01").expect("key");

        store.save(&key, "# Hi").await.expect("save");
        let loaded = store.load(&key).await.expect("load");

        assert_eq!(loaded.content, "# Hi");
        assert_eq!(loaded.note, None);
    }

    #[tokio::test]
    async fn loading_a_never_saved_date_yields_empty_content() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let key = DateKey::parse("1999-12-31").expect("key");

        let loaded = store.load(&key).await.expect("load");

        assert_eq!(loaded.content, "");
        assert_eq!(loaded.note, Some(MISSING_ENTRY_NOTE));
    }

    #[tokio::test]
    async fn save_overwrites_unconditionally() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let key = DateKey::parse("2024-06-15").expect("key");

        store.save(&key, "first").await.expect("save");
        store.save(&key, "second").await.expect("save again");

        let loaded = store.load(&key).await.expect("load");
        assert_eq!(loaded.content, "second");
    }

    #[test]
    fn entry_paths_use_the_date_as_stem() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let key = DateKey::parse("2024-01-02").expect("key");

        assert!(store.entry_path(&key).ends_with("entries/2024-01-02.md"));
    }
}
