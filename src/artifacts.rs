//! Filesystem-backed blob store for large run outputs (diffs, logs).
//!
//! Keys are literal paths of the form `{org}/{team}/{repo}/{run}/{artifact}`.
//! `put` creates parent namespaces implicitly; `delete` of a missing key
//! succeeds.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::errors::StoreError;
use crate::scope::Scope;

pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .await
            .with_context(|| format!("create artifact dir {}", base_dir.display()))?;
        Ok(Self { base_dir })
    }

    /// Builds the canonical artifact key for a run-scoped blob.
    pub fn key(scope: &Scope, run_id: &str, artifact: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            scope.org_id, scope.team_id, scope.repo_id, run_id, artifact
        )
    }

    /// Write a blob, streaming from the reader. Overwrites any existing
    /// blob at the key.
    pub async fn put(
        &self,
        key: &str,
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create artifact namespace for {key}"))?;
        }
        let mut file = fs::File::create(&path)
            .await
            .with_context(|| format!("create artifact {key}"))?;
        tokio::io::copy(&mut reader, &mut file)
            .await
            .with_context(|| format!("write artifact {key}"))?;
        file.flush().await.with_context(|| format!("flush artifact {key}"))?;
        Ok(())
    }

    /// Open a blob for streaming reads.
    pub async fn get(&self, key: &str) -> Result<fs::File, StoreError> {
        let path = self.resolve(key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found("artifact", key))
            }
            Err(e) => Err(StoreError::Internal(
                anyhow::Error::new(e).context(format!("open artifact {key}")),
            )),
        }
    }

    /// Remove a blob. Removing a missing key is a success.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Internal(
                anyhow::Error::new(e).context(format!("delete artifact {key}")),
            )),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.resolve(key)?;
        match fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Internal(
                anyhow::Error::new(e).context(format!("stat artifact {key}")),
            )),
        }
    }

    /// Keys are relative paths; anything that would escape the base
    /// directory is rejected.
    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("artifact key is required".into()));
        }
        let rel = Path::new(key);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(StoreError::InvalidArgument(format!(
                "artifact key {key:?} must be a relative path without '..'"
            )));
        }
        Ok(self.base_dir.join(rel))
    }
}
