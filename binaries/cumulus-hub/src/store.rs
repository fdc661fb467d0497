//! On-disk fragment store with the hub's capacity rule. Blobs live under
//! `<root>/<xx>/<yy>/<frag_id>.frag`, sharded by the first hex characters
//! of the fragment id.

use std::path::{Path, PathBuf};

use cumulus_crypt::hash::{CHUNK_SIZE, Hash, Hasher};
use cumulus_structs::id::FragId;
use tokio::io::AsyncReadExt;

const MIB: u64 = 1024 * 1024;

pub struct FragmentStore {
    root: PathBuf,
    reserve_mb: u64,
    reserve_ratio: f64,
}

pub enum PutOutcome {
    Stored { hash: Hash, available_bytes: u64 },
    /// The capacity rule left no room; carries the pre-write figure.
    Refused { available_bytes: u64 },
}

impl FragmentStore {
    pub fn new(root: PathBuf, reserve_mb: u64, reserve_ratio: f64) -> Self {
        // the capacity rule stats the root, so it has to exist up front
        let _ = std::fs::create_dir_all(&root);
        Self {
            root,
            reserve_mb,
            reserve_ratio,
        }
    }

    fn path_for(&self, frag_id: &FragId) -> PathBuf {
        let hex = frag_id.as_str();
        if hex.len() < 4 {
            return self.root.join(format!("{hex}.frag"));
        }
        let xx = &hex[0..2];
        let yy = &hex[2..4];
        self.root.join(xx).join(yy).join(format!("{hex}.frag"))
    }

    pub async fn put(&self, frag_id: &FragId, content: &[u8]) -> anyhow::Result<PutOutcome> {
        let available_bytes = self.available_bytes().await?;
        if available_bytes <= content.len() as u64 {
            return Ok(PutOutcome::Refused { available_bytes });
        }
        let path = self.path_for(frag_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        let hash = hash_file(&path).await?;
        Ok(PutOutcome::Stored {
            hash,
            available_bytes: available_bytes - content.len() as u64,
        })
    }

    pub async fn get(&self, frag_id: &FragId) -> anyhow::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(frag_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn hash(&self, frag_id: &FragId) -> anyhow::Result<Option<Hash>> {
        let path = self.path_for(frag_id);
        match hash_file(&path).await {
            Ok(hash) => Ok(Some(hash)),
            Err(err)
                if err
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Deleting an absent fragment succeeds.
    pub async fn delete(&self, frag_id: &FragId) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.path_for(frag_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn stored_bytes(&self) -> anyhow::Result<u64> {
        let root = self.root.clone();
        let total = tokio::task::spawn_blocking(move || walk_size(&root)).await??;
        Ok(total)
    }

    /// The capacity rule: what the hub will still accept, as the smaller
    /// of the free-disk reserve and the stored-bytes quota.
    pub async fn available_bytes(&self) -> anyhow::Result<u64> {
        let stored_bytes = self.stored_bytes().await?;
        let root = self.root.clone();
        let (free, total) = tokio::task::spawn_blocking(move || disk_usage(&root)).await??;
        let by_free = free.saturating_sub(self.reserve_mb * MIB);
        let quota = (total as f64 * (1.0 - self.reserve_ratio)) as u64;
        let by_quota = quota.saturating_sub(stored_bytes);
        Ok(by_free.min(by_quota))
    }
}

fn disk_usage(path: &Path) -> anyhow::Result<(u64, u64)> {
    let stat = nix::sys::statvfs::statvfs(path)?;
    let frsize = stat.fragment_size() as u64;
    let free = stat.blocks_available() as u64 * frsize;
    let total = stat.blocks() as u64 * frsize;
    Ok((free, total))
}

fn walk_size(dir: &Path) -> anyhow::Result<u64> {
    let mut total = 0;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += walk_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

async fn hash_file(path: &Path) -> anyhow::Result<Hash> {
    let mut file = tokio::fs::File::open(path).await?;
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
