//! Where the phases hand artifacts to each other.
//!
//! Every artifact is written once per iteration, read by exactly one
//! consumer and then deleted. The medium is pluggable: [`MemoryStore`] for
//! tests and the standalone cluster, [`FsStore`] for a local working
//! directory and [`s3::S3Store`] for an S3-compatible object store.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Error, Result};

pub mod s3;

/// Name of the artifact a map worker's results are persisted to.
pub fn map_artifact(index: usize) -> String {
    format!("map-{index}.parquet")
}

/// Name of the shard handed to reduce worker `index`.
pub fn shuffle_artifact(index: usize) -> String {
    format!("shuffle-{index}.json")
}

/// Name of the artifact a reduce worker's results are persisted to.
pub fn reduce_artifact(index: usize) -> String {
    format!("reduce-{index}.csv")
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write (or overwrite) an artifact.
    async fn put(&self, name: &str, data: Bytes) -> Result<()>;

    /// Read an artifact. A missing artifact is an error.
    async fn get(&self, name: &str) -> Result<Bytes>;

    /// Delete an artifact. Deleting a missing artifact succeeds.
    async fn delete(&self, name: &str) -> Result<()>;

    async fn exists(&self, name: &str) -> Result<bool>;

    /// Read an artifact and delete it.
    async fn take(&self, name: &str) -> Result<Bytes> {
        let data = self.get(name).await?;
        self.delete(name).await?;
        Ok(data)
    }
}

fn missing(name: &str) -> Error {
    Error::artifact(name, io::Error::new(io::ErrorKind::NotFound, "no such artifact"))
}

/////////////////////////////////////////////////////////////////////////////
// In-memory
/////////////////////////////////////////////////////////////////////////////

#[derive(Default)]
pub struct MemoryStore {
    artifacts: DashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every stored artifact, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.artifacts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        self.artifacts.insert(name.to_string(), data);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        self.artifacts
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| missing(name))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.artifacts.remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.artifacts.contains_key(name))
    }

    async fn take(&self, name: &str) -> Result<Bytes> {
        self.artifacts
            .remove(name)
            .map(|(_, data)| data)
            .ok_or_else(|| missing(name))
    }
}

/////////////////////////////////////////////////////////////////////////////
// Local filesystem
/////////////////////////////////////////////////////////////////////////////

/// Artifacts as plain files under one directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Use `root` as the artifact directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| Error::io(format!("create artifact directory {}", root.display()), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::Validation(format!("bad artifact name `{name}`")));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        let path = self.path(name)?;
        // Write beside the target and rename so readers never see a partial file.
        let tmp = self.root.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| Error::artifact(name, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::artifact(name, e))
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        let path = self.path(name)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| Error::artifact(name, e))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::artifact(name, e)),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path(name)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::artifact(name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn ArtifactStore) {
        assert!(!store.exists("shuffle-0.json").await.unwrap());
        assert!(store.get("shuffle-0.json").await.is_err());

        store
            .put("shuffle-0.json", Bytes::from_static(b"[]"))
            .await
            .unwrap();
        assert!(store.exists("shuffle-0.json").await.unwrap());
        assert_eq!(store.get("shuffle-0.json").await.unwrap(), "[]");

        // Read exactly once.
        assert_eq!(store.take("shuffle-0.json").await.unwrap(), "[]");
        assert!(!store.exists("shuffle-0.json").await.unwrap());
        assert!(store.take("shuffle-0.json").await.is_err());

        store.delete("never-written").await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_contract() {
        let store = MemoryStore::new();
        exercise(&store).await;
        assert!(store.names().is_empty());
    }

    #[tokio::test]
    async fn fs_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path().join("work")).await.unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn fs_store_rejects_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.put("../escape", Bytes::new()).await,
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn artifact_names() {
        assert_eq!(map_artifact(0), "map-0.parquet");
        assert_eq!(shuffle_artifact(2), "shuffle-2.json");
        assert_eq!(reduce_artifact(1), "reduce-1.csv");
    }
}
