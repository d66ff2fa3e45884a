//! Pluggable segment store.
//!
//! Segments live either as OS files under the configured temp
//! directory or in an in-memory filesystem, selected by settings. Both
//! back-ends present the same surface, and a written segment becomes
//! visible only once it is complete (disk writes go through a sibling
//! temp file and rename).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn write(&self, path: &Path, data: Bytes) -> io::Result<()>;
    async fn read(&self, path: &Path) -> io::Result<Bytes>;
    async fn remove(&self, path: &Path) -> io::Result<()>;
    /// Remove a segment directory and everything in it.
    async fn clear_dir(&self, dir: &Path) -> io::Result<()>;
    async fn exists(&self, path: &Path) -> bool;
}

/// Build the configured store.
pub fn make_store(in_ram: bool) -> Arc<dyn SegmentStore> {
    if in_ram {
        Arc::new(MemStore::default())
    } else {
        Arc::new(DiskStore)
    }
}

/// OS-file store rooted at the session's segment directory.
pub struct DiskStore;

#[async_trait]
impl SegmentStore for DiskStore {
    async fn write(&self, path: &Path, data: Bytes) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Full file first, then rename: readers never observe a
        // partially written segment.
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, path).await
    }

    async fn read(&self, path: &Path) -> io::Result<Bytes> {
        tokio::fs::read(path).await.map(Bytes::from)
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn clear_dir(&self, dir: &Path) -> io::Result<()> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// In-memory store keyed by path; selected by `storeBufferInRAM`.
#[derive(Default)]
pub struct MemStore {
    files: DashMap<PathBuf, Bytes>,
}

#[async_trait]
impl SegmentStore for MemStore {
    async fn write(&self, path: &Path, data: Bytes) -> io::Result<()> {
        self.files.insert(path.to_path_buf(), data);
        Ok(())
    }

    async fn read(&self, path: &Path) -> io::Result<Bytes> {
        self.files
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        self.files.remove(path);
        Ok(())
    }

    async fn clear_dir(&self, dir: &Path) -> io::Result<()> {
        self.files.retain(|path, _| !path.starts_with(dir));
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mem_store_round_trip_and_clear() {
        let store = MemStore::default();
        let dir = PathBuf::from("/buf/p1/abcd");
        let path = dir.join("1.ts");

        store.write(&path, Bytes::from_static(b"data")).await.unwrap();
        assert!(store.exists(&path).await);
        assert_eq!(store.read(&path).await.unwrap(), Bytes::from_static(b"data"));

        store.clear_dir(&dir).await.unwrap();
        assert!(!store.exists(&path).await);
    }

    #[tokio::test]
    async fn disk_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DiskStore;
        let path = tmp.path().join("session").join("1.ts");

        store.write(&path, Bytes::from_static(b"abc")).await.unwrap();
        assert!(store.exists(&path).await);
        assert_eq!(store.read(&path).await.unwrap(), Bytes::from_static(b"abc"));
        // No stray temp file remains next to the segment.
        let count = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(count, 1);

        store.clear_dir(&path.parent().unwrap().to_path_buf()).await.unwrap();
        assert!(!store.exists(&path).await);
    }

    #[tokio::test]
    async fn clear_missing_dir_is_not_an_error() {
        let store = DiskStore;
        store.clear_dir(Path::new("/definitely/not/here")).await.unwrap();
    }
}
