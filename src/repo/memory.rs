// src/repo/memory.rs

//! In-process repository backend (no persistence; test/dev use).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{validate_id, Artifact, Repository, RepositoryError};

#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<HashMap<String, Artifact>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn contains(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(self.inner.lock().unwrap().contains_key(id))
    }

    async fn get(&self, id: &str) -> Result<Artifact, RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn put(&self, id: &str, value: Artifact) -> Result<(), RepositoryError> {
        validate_id(id)?;
        self.inner.lock().unwrap().insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.inner.lock().unwrap().remove(id);
        Ok(())
    }

    async fn ids(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.inner.lock().unwrap().keys().cloned().collect())
    }
}
