//! Per-request scratch files in a shared temp directory.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::error::StartupError;

const ARTIFACT_PREFIX: &str = "zkprover_";

/// Lifecycle of a scratch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Allocated,
    Written,
    Consumed,
    Deleted,
}

/// Allocates uniquely named scratch files in one directory.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    dir: PathBuf,
}

impl ScratchSpace {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StartupError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StartupError::ScratchDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a new empty file with a unique name.
    ///
    /// Name choice and creation happen in a single `O_EXCL` open, so
    /// concurrent requests never share a file.
    pub fn allocate(&self, suffix: &str) -> io::Result<TempArtifact> {
        let file = tempfile::Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .suffix(suffix)
            .tempfile_in(&self.dir)?;
        let path = file.into_temp_path();
        tracing::trace!(path = %path.display(), "scratch file allocated");
        Ok(TempArtifact {
            path: Some(path),
            state: ArtifactState::Allocated,
        })
    }
}

/// A scratch file deleted on [`TempArtifact::release`] or when dropped.
#[derive(Debug)]
pub struct TempArtifact {
    path: Option<TempPath>,
    state: ArtifactState,
}

impl TempArtifact {
    /// Backing path; empty once released.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    pub fn state(&self) -> ArtifactState {
        self.state
    }

    pub fn mark_written(&mut self) {
        self.state = ArtifactState::Written;
    }

    pub fn mark_consumed(&mut self) {
        self.state = ArtifactState::Consumed;
    }

    /// Delete the backing file. A file that is already gone counts as deleted.
    pub fn release(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let shown = path.to_path_buf();
        match path.close() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %shown.display(), error = %e, "failed to delete scratch file");
            }
        }
        self.state = ArtifactState::Deleted;
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.release();
    }
}
