use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::handle::is_legacy_identifier;

/// Error from the local cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid cache id: {0:?}")]
    InvalidId(String),
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local byte cache keyed by content identifier.
pub trait LegacyCache: Send + Sync {
    fn write(&self, id: &str, value: &[u8]) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn read(&self, id: &str) -> impl Future<Output = Result<Option<Vec<u8>>, CacheError>> + Send;

    /// Removes an entry. Returns whether it existed.
    fn delete(&self, id: &str) -> impl Future<Output = Result<bool, CacheError>> + Send;
}

/// Number of trailing id characters that become directory levels.
const SHARD_DEPTH: usize = 4;

/// A cache of JSON files sharded by id suffix.
///
/// `bafy...wxyz` lives at `<root>/w/x/y/z/bafy...wxyz.json`, bounding the
/// fan-out of any single directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, CacheError> {
        if !is_legacy_identifier(id) {
            return Err(CacheError::InvalidId(id.to_string()));
        }
        let suffix_start = id.len().saturating_sub(SHARD_DEPTH);
        let mut path = self.root.clone();
        for ch in id[suffix_start..].chars() {
            path.push(ch.to_string());
        }
        path.push(format!("{id}.json"));
        Ok(path)
    }
}

impl LegacyCache for FileCache {
    async fn write(&self, id: &str, value: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(id)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        // Write-then-rename so readers never see a torn file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, CacheError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_cache() -> (FileCache, TempDir) {
        let dir = TempDir::new().unwrap();
        (FileCache::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn shards_by_suffix() {
        let (cache, dir) = temp_cache();

        cache.write("bafyabcd", b"{}").await.unwrap();

        assert!(dir.path().join("a/b/c/d/bafyabcd.json").exists());
    }

    #[tokio::test]
    async fn short_ids_use_shallower_shards() {
        let (cache, dir) = temp_cache();

        cache.write("xy", b"1").await.unwrap();

        assert!(dir.path().join("x/y/xy.json").exists());
        assert_eq!(cache.read("xy").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn read_write_delete() {
        let (cache, _dir) = temp_cache();

        assert_eq!(cache.read("bafy1234").await.unwrap(), None);
        cache.write("bafy1234", b"payload").await.unwrap();
        assert_eq!(cache.read("bafy1234").await.unwrap(), Some(b"payload".to_vec()));

        assert!(cache.delete("bafy1234").await.unwrap());
        assert!(!cache.delete("bafy1234").await.unwrap());
        assert_eq!(cache.read("bafy1234").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let (cache, _dir) = temp_cache();

        assert!(matches!(cache.write("../../x", b"").await, Err(CacheError::InvalidId(_))));
        assert!(matches!(cache.read("a/b").await, Err(CacheError::InvalidId(_))));
    }
}
