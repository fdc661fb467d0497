//! Scoped on-disk staging of a single logical object. A stage lazily
//! materializes the object on first read, enforces an expected hash right
//! after download, tracks whether the content changed, and pushes the new
//! content through its remote strategy on close. The local file is purged
//! on every exit path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use cumulus_crypt::hash::{CHUNK_SIZE, Hash, Hasher};
use rand::RngCore;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::CoreError;

/// The two capabilities a staged object needs from its backing store.
#[async_trait]
pub(crate) trait StageRemote: Send + Sync {
    /// Fetch the stored payload, or `None` when nothing is stored yet.
    async fn download(&mut self) -> Result<Option<Bytes>, CoreError>;
    /// Push the changed payload to durable storage.
    async fn upload(&mut self, content: Bytes) -> Result<(), CoreError>;
}

pub(crate) enum StageOutcome {
    /// Content never changed; nothing was uploaded.
    Unchanged,
    /// Changed content was uploaded; this is its digest.
    Uploaded(Hash),
}

pub(crate) struct Stage<R: StageRemote> {
    remote: R,
    path: PathBuf,
    expected_hash: Option<Hash>,
    downloaded: bool,
    dirty: bool,
    initial_hash: Option<Hash>,
    cached_hash: Option<Hash>,
    poisoned: Option<(Hash, Hash)>,
    released: bool,
}

impl<R: StageRemote> Stage<R> {
    pub fn open(staging_dir: &Path, remote: R, expected_hash: Option<Hash>) -> Self {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self {
            remote,
            path: staging_dir.join(hex::encode(nonce)),
            expected_hash,
            downloaded: false,
            dirty: false,
            initial_hash: None,
            cached_hash: None,
            poisoned: None,
            released: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    async fn ensure_local(&mut self) -> Result<(), CoreError> {
        if let Some((expected, actual)) = self.poisoned {
            return Err(CoreError::HashMismatch { expected, actual });
        }
        if self.downloaded || self.dirty {
            return Ok(());
        }
        let content = self.remote.download().await?.unwrap_or_default();
        fs::write(&self.path, &content).await?;
        self.downloaded = true;
        let digest = hash_file(&self.path).await?;
        self.initial_hash = Some(digest);
        self.cached_hash = Some(digest);
        if let Some(expected) = self.expected_hash {
            if expected != digest {
                self.purge().await;
                self.poisoned = Some((expected, digest));
                return Err(CoreError::HashMismatch {
                    expected,
                    actual: digest,
                });
            }
        }
        Ok(())
    }

    pub async fn read_all(&mut self) -> Result<Bytes, CoreError> {
        self.ensure_local().await?;
        Ok(Bytes::from(fs::read(&self.path).await?))
    }

    pub async fn read_chunks(&mut self, chunk_size: usize) -> Result<ChunkReader, CoreError> {
        self.ensure_local().await?;
        let file = fs::File::open(&self.path).await?;
        Ok(ChunkReader { file, chunk_size })
    }

    pub async fn size(&mut self) -> Result<u64, CoreError> {
        self.ensure_local().await?;
        Ok(fs::metadata(&self.path).await?.len())
    }

    pub async fn hash(&mut self) -> Result<Hash, CoreError> {
        self.ensure_local().await?;
        if let Some(hash) = self.cached_hash {
            return Ok(hash);
        }
        let digest = hash_file(&self.path).await?;
        self.cached_hash = Some(digest);
        Ok(digest)
    }

    pub async fn write(&mut self, content: &[u8]) -> Result<(), CoreError> {
        fs::write(&self.path, content).await?;
        self.mark_dirty();
        Ok(())
    }

    pub async fn write_chunks<I>(&mut self, chunks: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = Bytes> + Send,
    {
        let mut file = fs::File::create(&self.path).await?;
        for chunk in chunks {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        self.mark_dirty();
        Ok(())
    }

    pub async fn append(&mut self, content: &[u8]) -> Result<(), CoreError> {
        self.ensure_local().await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(content).await?;
        file.flush().await?;
        self.mark_dirty();
        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.cached_hash = None;
    }

    /// Release the stage: upload iff the content changed, then purge the
    /// local copy regardless of the outcome.
    pub async fn close(mut self) -> Result<StageOutcome, CoreError> {
        let result = self.close_inner().await;
        self.purge().await;
        self.released = true;
        result
    }

    async fn close_inner(&mut self) -> Result<StageOutcome, CoreError> {
        if !self.dirty {
            return Ok(StageOutcome::Unchanged);
        }
        let digest = self.hash().await?;
        if self.initial_hash == Some(digest) {
            return Ok(StageOutcome::Unchanged);
        }
        let content = self.read_all().await?;
        self.remote.upload(content).await?;
        Ok(StageOutcome::Uploaded(digest))
    }

    async fn purge(&mut self) {
        let _ = fs::remove_file(&self.path).await;
    }
}

impl<R: StageRemote> Drop for Stage<R> {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

pub(crate) struct ChunkReader {
    file: fs::File,
    chunk_size: usize,
}

impl ChunkReader {
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, CoreError> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(Bytes::from(buf)))
    }
}

/// Digest a file in [`CHUNK_SIZE`] chunks.
pub(crate) async fn hash_file(path: &Path) -> Result<Hash, CoreError> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;
    use cumulus_crypt::hash::Hash;

    use super::{Stage, StageOutcome, StageRemote};
    use crate::error::{CoreError, RemoteError};

    #[derive(Default, Clone)]
    struct MemoryRemote {
        stored: Arc<Mutex<Option<Bytes>>>,
        uploads: Arc<Mutex<usize>>,
        fail_upload: bool,
    }

    #[async_trait]
    impl StageRemote for MemoryRemote {
        async fn download(&mut self) -> Result<Option<Bytes>, CoreError> {
            Ok(self.stored.lock().expect("lock").clone())
        }

        async fn upload(&mut self, content: Bytes) -> Result<(), CoreError> {
            *self.uploads.lock().expect("lock") += 1;
            if self.fail_upload {
                return Err(RemoteError::UploadFailed.into());
            }
            *self.stored.lock().expect("lock") = Some(content);
            Ok(())
        }
    }

    fn staging_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[tokio::test]
    async fn upload_on_close_when_changed() {
        let dir = staging_dir();
        let remote = MemoryRemote::default();
        let mut stage = Stage::open(dir.path(), remote.clone(), None);
        stage.write(b"fresh content").await.expect("write");
        match stage.close().await.expect("close") {
            StageOutcome::Uploaded(hash) => assert_eq!(hash, Hash::digest(b"fresh content")),
            StageOutcome::Unchanged => panic!("expected an upload"),
        }
        assert_eq!(
            remote.stored.lock().expect("lock").as_deref(),
            Some(b"fresh content".as_slice())
        );
    }

    #[tokio::test]
    async fn clean_close_skips_download_and_upload() {
        let dir = staging_dir();
        let remote = MemoryRemote::default();
        *remote.stored.lock().expect("lock") = Some(Bytes::from_static(b"stored"));
        let stage = Stage::open(dir.path(), remote.clone(), None);
        assert!(matches!(
            stage.close().await.expect("close"),
            StageOutcome::Unchanged
        ));
        assert_eq!(*remote.uploads.lock().expect("lock"), 0);
    }

    #[tokio::test]
    async fn rewriting_identical_content_is_unchanged() {
        let dir = staging_dir();
        let remote = MemoryRemote::default();
        *remote.stored.lock().expect("lock") = Some(Bytes::from_static(b"same"));
        let mut stage = Stage::open(dir.path(), remote.clone(), None);
        let read = stage.read_all().await.expect("read");
        stage.write(&read).await.expect("write");
        assert!(matches!(
            stage.close().await.expect("close"),
            StageOutcome::Unchanged
        ));
        assert_eq!(*remote.uploads.lock().expect("lock"), 0);
    }

    #[tokio::test]
    async fn expected_hash_mismatch_purges_and_refuses() {
        let dir = staging_dir();
        let remote = MemoryRemote::default();
        *remote.stored.lock().expect("lock") = Some(Bytes::from_static(b"corrupted"));
        let expected = Hash::digest(b"pristine");
        let mut stage = Stage::open(dir.path(), remote, Some(expected));
        assert!(matches!(
            stage.read_all().await,
            Err(CoreError::HashMismatch { .. })
        ));
        // the staging file is gone and further reads keep failing
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 0);
        assert!(matches!(
            stage.size().await,
            Err(CoreError::HashMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn append_extends_downloaded_content() {
        let dir = staging_dir();
        let remote = MemoryRemote::default();
        *remote.stored.lock().expect("lock") = Some(Bytes::from_static(b"head"));
        let mut stage = Stage::open(dir.path(), remote.clone(), None);
        stage.append(b"+tail").await.expect("append");
        assert!(matches!(
            stage.close().await.expect("close"),
            StageOutcome::Uploaded(_)
        ));
        assert_eq!(
            remote.stored.lock().expect("lock").as_deref(),
            Some(b"head+tail".as_slice())
        );
    }

    #[tokio::test]
    async fn failed_upload_still_purges() {
        let dir = staging_dir();
        let remote = MemoryRemote {
            fail_upload: true,
            ..MemoryRemote::default()
        };
        let mut stage = Stage::open(dir.path(), remote, None);
        stage.write(b"doomed").await.expect("write");
        assert!(matches!(
            stage.close().await,
            Err(CoreError::Remote(RemoteError::UploadFailed))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 0);
    }

    #[tokio::test]
    async fn drop_purges_local_file() {
        let dir = staging_dir();
        let remote = MemoryRemote::default();
        let mut stage = Stage::open(dir.path(), remote, None);
        stage.write(b"leftover").await.expect("write");
        drop(stage);
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 0);
    }

    #[tokio::test]
    async fn read_chunks_splits_at_requested_size() {
        let dir = staging_dir();
        let remote = MemoryRemote::default();
        *remote.stored.lock().expect("lock") = Some(Bytes::from(vec![9u8; 10]));
        let mut stage = Stage::open(dir.path(), remote, None);
        let mut reader = stage.read_chunks(4).await.expect("reader");
        let mut sizes = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.expect("chunk") {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }
}
