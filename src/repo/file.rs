// src/repo/file.rs

//! Filesystem repository backends: one file per id under a base directory.
//!
//! [`FileRepository`] stores raw blobs; [`MetadataFileRepository`] layers
//! JSON serialization on top of the same directory conventions so that
//! structured values survive a round-trip.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{validate_id, Artifact, Repository, RepositoryError};

#[derive(Debug, Clone)]
pub struct FileRepository {
    basedir: PathBuf,
    /// Filename suffix appended after the id, stored with its leading dot.
    extension: Option<String>,
    /// Fold ids to lowercase before hitting the filesystem.
    case_insensitive: bool,
}

impl FileRepository {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
            extension: None,
            case_insensitive: false,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let ext = extension.into();
        self.extension = Some(if ext.starts_with('.') {
            ext
        } else {
            format!(".{ext}")
        });
        self
    }

    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.case_insensitive = yes;
        self
    }

    fn fold(&self, id: &str) -> String {
        if self.case_insensitive {
            id.to_lowercase()
        } else {
            id.to_string()
        }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, RepositoryError> {
        validate_id(id)?;
        let mut name = self.fold(id);
        if let Some(ext) = &self.extension {
            name.push_str(ext);
        }
        Ok(self.basedir.join(name))
    }

    fn id_from_entry(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        match &self.extension {
            Some(ext) => name.strip_suffix(ext.as_str()).map(|s| s.to_string()),
            None => Some(name.to_string()),
        }
    }
}

fn io_unavailable(err: std::io::Error) -> RepositoryError {
    RepositoryError::Unavailable(err.to_string())
}

#[async_trait]
impl Repository for FileRepository {
    async fn contains(&self, id: &str) -> Result<bool, RepositoryError> {
        let path = self.path_for(id)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_unavailable(err)),
        }
    }

    async fn get(&self, id: &str) -> Result<Artifact, RepositoryError> {
        let path = self.path_for(id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Artifact::Blob(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(RepositoryError::NotFound(id.to_string()))
            }
            Err(err) => Err(io_unavailable(err)),
        }
    }

    async fn put(&self, id: &str, value: Artifact) -> Result<(), RepositoryError> {
        let path = self.path_for(id)?;
        let bytes = match value {
            Artifact::Blob(bytes) => bytes,
            Artifact::Metadata(_) => {
                return Err(RepositoryError::Conflict {
                    id: id.to_string(),
                    reason: "blob repository cannot store structured metadata".to_string(),
                });
            }
        };
        fs::create_dir_all(&self.basedir).await.map_err(io_unavailable)?;
        fs::write(&path, bytes).await.map_err(io_unavailable)
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_unavailable(err)),
        }
    }

    async fn ids(&self) -> Result<Vec<String>, RepositoryError> {
        let mut entries = match fs::read_dir(&self.basedir).await {
            Ok(entries) => entries,
            // An untouched repository simply has no ids yet.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_unavailable(err)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_unavailable)? {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map_err(io_unavailable)?
                .is_file();
            if !is_file {
                continue;
            }
            if let Some(id) = self.id_from_entry(&path) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// Structured values serialized as JSON, one file per id.
#[derive(Debug, Clone)]
pub struct MetadataFileRepository {
    files: FileRepository,
}

impl MetadataFileRepository {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            files: FileRepository::new(basedir).with_extension(".json"),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.files = self.files.with_extension(extension);
        self
    }

    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.files = self.files.case_insensitive(yes);
        self
    }
}

#[async_trait]
impl Repository for MetadataFileRepository {
    async fn contains(&self, id: &str) -> Result<bool, RepositoryError> {
        self.files.contains(id).await
    }

    async fn get(&self, id: &str) -> Result<Artifact, RepositoryError> {
        let blob = self.files.get(id).await?;
        let bytes = blob.as_blob().unwrap_or_default();
        let value = serde_json::from_slice(bytes).map_err(|err| RepositoryError::Conflict {
            id: id.to_string(),
            reason: format!("stored value is not valid JSON: {err}"),
        })?;
        Ok(Artifact::Metadata(value))
    }

    async fn put(&self, id: &str, value: Artifact) -> Result<(), RepositoryError> {
        let value = match value {
            Artifact::Metadata(value) => value,
            Artifact::Blob(_) => {
                return Err(RepositoryError::Conflict {
                    id: id.to_string(),
                    reason: "metadata repository cannot store raw blobs".to_string(),
                });
            }
        };
        let bytes = serde_json::to_vec_pretty(&value).map_err(|err| {
            RepositoryError::Conflict {
                id: id.to_string(),
                reason: format!("value is not serializable: {err}"),
            }
        })?;
        self.files.put(id, Artifact::Blob(bytes)).await
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.files.delete(id).await
    }

    async fn ids(&self) -> Result<Vec<String>, RepositoryError> {
        self.files.ids().await
    }
}
