// File: soundbot-core/src/voice/sample.rs
//
// Minimal directory-backed sample store: one audio file per sample, named
// after the sample. Anything smarter (uploads, encoding, per-guild sets)
// belongs to an external store implementing `Sample`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use soundbot_common::traits::voice_traits::Sample;

use crate::Error;

/// Containers the transport can play without re-encoding.
const PLAYABLE_EXTENSIONS: &[&str] = &["ogg", "opus", "webm", "mp3", "wav", "flac"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSample {
    id: String,
    path: PathBuf,
}

impl FileSample {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sample for FileSample {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&self) -> Result<PathBuf, Error> {
        let meta = tokio::fs::metadata(&self.path).await?;
        if !meta.is_file() {
            return Err(Error::NotFound(format!("sample '{}' is not a file", self.id)));
        }
        Ok(self.path.clone())
    }
}

pub struct SampleLibrary {
    root: PathBuf,
}

impl SampleLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Case-insensitive lookup by file stem.
    pub async fn find(&self, name: &str) -> Result<FileSample, Error> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return Err(Error::NotFound("empty sample name".into()));
        }

        for sample in self.list().await? {
            if sample.id.to_lowercase() == wanted {
                debug!("(SampleLibrary) '{name}' => {}", sample.path.display());
                return Ok(sample);
            }
        }
        Err(Error::NotFound(format!("no sample named '{name}'")))
    }

    /// Every playable file directly under the library root, sorted by name.
    pub async fn list(&self) -> Result<Vec<FileSample>, Error> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut samples = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || !is_playable(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                samples.push(FileSample::new(stem, path.clone()));
            }
        }

        samples.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(samples)
    }
}

fn is_playable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PLAYABLE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}
