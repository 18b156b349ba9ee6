//! Temporary per-upload byte containers.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{StoreError, StoreResult};
use crate::models::format_timestamp;

/// Byte source for one chunk. Request bodies are adapted into this.
pub type ChunkReader<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Resume information for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStat {
    pub offset: u64,
    pub declared_size: u64,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Create an empty container for at most `declared_size` bytes.
    async fn open(
        &self,
        id: &str,
        declared_size: u64,
        metadata: &HashMap<String, String>,
    ) -> StoreResult<()>;

    /// Append the reader's bytes at `offset` and return the new length.
    /// On error the container is left at `offset`.
    async fn write_at(&self, id: &str, offset: u64, reader: ChunkReader<'_>) -> StoreResult<u64>;

    async fn stat(&self, id: &str) -> StoreResult<ChunkStat>;

    /// Move the container to `permanent_path`. On error the container is untouched.
    /// The container's bookkeeping survives until [`ChunkStore::discard`].
    async fn finalize(&self, id: &str, permanent_path: &Path) -> StoreResult<()>;

    /// Move a finalized file back into its container.
    async fn restore(&self, id: &str, permanent_path: &Path) -> StoreResult<()>;

    /// Remove the container. Missing containers are not an error.
    async fn discard(&self, id: &str) -> StoreResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ContainerInfo {
    id: String,
    size: u64,
    metadata: HashMap<String, String>,
    created_at: String,
}

/// Chunk store backed by `<root>/<id>.bin` plus a JSON `<id>.info` sidecar.
pub struct FilesystemChunkStore {
    root: PathBuf,
}

impl FilesystemChunkStore {
    pub async fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn checked_id(id: &str) -> StoreResult<&str> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(id)
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    fn data_path(&self, id: &str) -> StoreResult<PathBuf> {
        Ok(self.root.join(format!("{}.bin", Self::checked_id(id)?)))
    }

    fn info_path(&self, id: &str) -> StoreResult<PathBuf> {
        Ok(self.root.join(format!("{}.info", Self::checked_id(id)?)))
    }

    async fn read_info(&self, id: &str) -> StoreResult<ContainerInfo> {
        let raw = fs::read(self.info_path(id)?)
            .await
            .map_err(|e| not_found_or_io(e, id))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn current_len(&self, id: &str) -> StoreResult<u64> {
        let meta = fs::metadata(self.data_path(id)?)
            .await
            .map_err(|e| not_found_or_io(e, id))?;
        Ok(meta.len())
    }
}

fn not_found_or_io(err: std::io::Error, id: &str) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(id.to_string())
    } else {
        StoreError::Io(err)
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Rename, falling back to copy + remove across filesystems. The source
/// is left in place if the copy fails.
async fn move_file(from: &Path, to: &Path, id: &str) -> std::io::Result<()> {
    if let Err(rename_err) = fs::rename(from, to).await {
        tracing::debug!("Rename for upload {id} failed ({rename_err}), copying instead");
        if let Err(e) = fs::copy(from, to).await {
            let _ = remove_if_exists(to).await;
            return Err(e);
        }
        remove_if_exists(from).await?;
    }
    Ok(())
}

/// Truncate back to the last good offset after a failed append.
async fn rollback(file: &mut fs::File, offset: u64, id: &str) {
    let _ = file.flush().await;
    if let Err(e) = file.set_len(offset).await {
        tracing::error!("Failed to roll back upload {id} to offset {offset}: {e}");
    }
}

#[async_trait]
impl ChunkStore for FilesystemChunkStore {
    async fn open(
        &self,
        id: &str,
        declared_size: u64,
        metadata: &HashMap<String, String>,
    ) -> StoreResult<()> {
        let info = ContainerInfo {
            id: id.to_string(),
            size: declared_size,
            metadata: metadata.clone(),
            created_at: format_timestamp(chrono::Utc::now()),
        };
        fs::write(self.info_path(id)?, serde_json::to_vec(&info)?).await?;
        if let Err(e) = fs::File::create(self.data_path(id)?).await {
            let _ = remove_if_exists(&self.info_path(id)?).await;
            return Err(e.into());
        }
        tracing::debug!("Opened upload container {id} ({declared_size} bytes)");
        Ok(())
    }

    async fn write_at(&self, id: &str, offset: u64, reader: ChunkReader<'_>) -> StoreResult<u64> {
        let info = self.read_info(id).await?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.data_path(id)?)
            .await
            .map_err(|e| not_found_or_io(e, id))?;

        let actual = file.metadata().await?.len();
        if actual != offset {
            return Err(StoreError::OffsetMismatch {
                requested: offset,
                actual,
            });
        }

        let remaining = info.size.saturating_sub(offset);
        if let Err(e) = file.seek(SeekFrom::Start(offset)).await {
            return Err(e.into());
        }

        // One byte past the remaining budget is enough to detect an overflowing chunk.
        let mut limited = reader.take(remaining.saturating_add(1));
        let written = match tokio::io::copy(&mut limited, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                rollback(&mut file, offset, id).await;
                return Err(e.into());
            }
        };

        if written > remaining {
            rollback(&mut file, offset, id).await;
            return Err(StoreError::Overflow {
                offset,
                declared: info.size,
            });
        }

        if let Err(e) = file.flush().await {
            rollback(&mut file, offset, id).await;
            return Err(e.into());
        }

        Ok(offset + written)
    }

    async fn stat(&self, id: &str) -> StoreResult<ChunkStat> {
        let info = self.read_info(id).await?;
        let offset = self.current_len(id).await?;
        Ok(ChunkStat {
            offset,
            declared_size: info.size,
        })
    }

    async fn finalize(&self, id: &str, permanent_path: &Path) -> StoreResult<()> {
        let data_path = self.data_path(id)?;
        self.current_len(id).await?;

        if let Some(parent) = permanent_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        move_file(&data_path, permanent_path, id).await?;
        Ok(())
    }

    async fn restore(&self, id: &str, permanent_path: &Path) -> StoreResult<()> {
        self.read_info(id).await?;
        move_file(permanent_path, &self.data_path(id)?, id).await?;
        Ok(())
    }

    async fn discard(&self, id: &str) -> StoreResult<()> {
        remove_if_exists(&self.data_path(id)?).await?;
        remove_if_exists(&self.info_path(id)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields `good` bytes, then fails.
    struct BrokenReader {
        good: usize,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.good == 0 {
                return Poll::Ready(Err(std::io::Error::other("connection reset")));
            }
            let n = self.good.min(buf.remaining());
            buf.put_slice(&vec![7u8; n]);
            self.good -= n;
            Poll::Ready(Ok(()))
        }
    }

    async fn store() -> (tempfile::TempDir, FilesystemChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path().join("tmp")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_appends_accumulate_offset() {
        let (_dir, store) = store().await;
        store.open("a1", 10, &HashMap::new()).await.unwrap();

        let mut first: &[u8] = b"hello";
        assert_eq!(store.write_at("a1", 0, &mut first).await.unwrap(), 5);
        let mut second: &[u8] = b"world";
        assert_eq!(store.write_at("a1", 5, &mut second).await.unwrap(), 10);

        let stat = store.stat("a1").await.unwrap();
        assert_eq!(stat, ChunkStat { offset: 10, declared_size: 10 });
    }

    #[tokio::test]
    async fn test_wrong_offset_writes_nothing() {
        let (_dir, store) = store().await;
        store.open("a2", 10, &HashMap::new()).await.unwrap();

        let mut chunk: &[u8] = b"abc";
        let err = store.write_at("a2", 4, &mut chunk).await.unwrap_err();
        assert!(matches!(err, StoreError::OffsetMismatch { requested: 4, actual: 0 }));
        assert_eq!(store.stat("a2").await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let (_dir, store) = store().await;
        store.open("a3", 100_000, &HashMap::new()).await.unwrap();
        let mut chunk: &[u8] = &[1u8; 10];
        store.write_at("a3", 0, &mut chunk).await.unwrap();

        let mut broken = BrokenReader { good: 4096 };
        assert!(store.write_at("a3", 10, &mut broken).await.is_err());
        assert_eq!(store.stat("a3").await.unwrap().offset, 10);
    }

    #[tokio::test]
    async fn test_overflowing_chunk_is_rejected() {
        let (_dir, store) = store().await;
        store.open("a4", 4, &HashMap::new()).await.unwrap();

        let mut chunk: &[u8] = b"too long";
        let err = store.write_at("a4", 0, &mut chunk).await.unwrap_err();
        assert!(matches!(err, StoreError::Overflow { offset: 0, declared: 4 }));
        assert_eq!(store.stat("a4").await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_finalize_moves_container() {
        let (dir, store) = store().await;
        store.open("a5", 3, &HashMap::new()).await.unwrap();
        let mut chunk: &[u8] = b"xyz";
        store.write_at("a5", 0, &mut chunk).await.unwrap();

        let dest = dir.path().join("final").join("out.zip");
        store.finalize("a5", &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"xyz");
        assert!(matches!(store.stat("a5").await, Err(StoreError::NotFound(_))));

        store.restore("a5", &dest).await.unwrap();
        assert!(!dest.exists());
        assert_eq!(store.stat("a5").await.unwrap(), ChunkStat { offset: 3, declared_size: 3 });

        store.finalize("a5", &dest).await.unwrap();
        store.discard("a5").await.unwrap();
        assert!(dest.exists());
        assert!(matches!(store.restore("a5", &dest).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_finalize_missing_container_fails() {
        let (dir, store) = store().await;
        let dest = dir.path().join("final").join("out.zip");
        assert!(matches!(
            store.finalize("ghost", &dest).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_discard_is_idempotent() {
        let (_dir, store) = store().await;
        store.open("a6", 3, &HashMap::new()).await.unwrap();
        store.discard("a6").await.unwrap();
        store.discard("a6").await.unwrap();
        assert!(matches!(store.stat("a6").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let (_dir, store) = store().await;
        assert!(store.open("../escape", 3, &HashMap::new()).await.is_err());
    }
}
