//! Artifact locations: path arithmetic for produced documents and the
//! shared table of the most recently published artifact per date.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use thiserror::Error;

use crate::domain::DateKey;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactPathError {
    #[error("renderer reported an invalid artifact file name `{name}`")]
    InvalidFileName { name: String },
    #[error("renderer-reported artifact path `{path}` escapes the output directory")]
    OutsideOutputDir { path: String },
    #[error("renderer reported success without an artifact path")]
    MissingPath,
}

/// Maps a date key to the stable on-disk location of its artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
    extension: String,
}

impl ArtifactStore {
    /// Root the store at `output_dir`, creating it if necessary.
    pub fn new(output_dir: PathBuf, extension: impl Into<String>) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            extension: extension.into(),
        })
    }

    /// Canonical location for the artifact of `key`: `<output_dir>/<key>.<ext>`.
    pub fn artifact_path(&self, key: &DateKey) -> PathBuf {
        self.output_dir.join(format!("{key}.{}", self.extension))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Resolve a bare file name reported by the renderer against the output
    /// directory. Anything that is not a plain file name is rejected.
    pub fn resolve_reported_name(&self, name: &str) -> Result<PathBuf, ArtifactPathError> {
        let candidate = Path::new(name);
        let mut components = candidate.components();
        let is_bare_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if name.is_empty() || !is_bare_name {
            return Err(ArtifactPathError::InvalidFileName {
                name: name.to_string(),
            });
        }
        Ok(self.output_dir.join(candidate))
    }

    /// Accept a full path reported by the renderer only when it stays inside
    /// the output directory.
    pub fn confine_reported_path(&self, path: &str) -> Result<PathBuf, ArtifactPathError> {
        let candidate = Path::new(path);
        let escapes = candidate
            .components()
            .any(|component| matches!(component, Component::ParentDir))
            || !candidate.starts_with(&self.output_dir);
        if escapes {
            return Err(ArtifactPathError::OutsideOutputDir {
                path: path.to_string(),
            });
        }
        Ok(candidate.to_path_buf())
    }
}

/// Most recently published artifact per date key.
///
/// Written only by the compile orchestrator on successful outcomes; read by
/// anyone holding a clone. A failed compile never touches it.
#[derive(Debug, Default, Clone)]
pub struct CurrentArtifacts {
    inner: Arc<DashMap<DateKey, PathBuf>>,
}

impl CurrentArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, key: DateKey, artifact_path: PathBuf) {
        self.inner.insert(key, artifact_path);
    }

    pub fn get(&self, key: &DateKey) -> Option<PathBuf> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }
}
