//! Catalog files and their staging sessions: encode/place/upload on the
//! way out, select/decode/verify on the way in, and the repair path that
//! rebuilds dirty fragments from the survivors.

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use cumulus_crypt::hash::Hash;
use cumulus_structs::broker::FileMeta;
use cumulus_structs::encoding::Encoding;
use cumulus_structs::id::{FileId, HubId};
use cumulus_structs::timestamp::Timestamp;
use smol_str::SmolStr;

use crate::Core;
use crate::catalog;
use crate::coder::ShardCoder;
use crate::error::CoreError;
use crate::fragment::Fragment;
use crate::orphan::Orphan;
use crate::placement;
use crate::stage::{Stage, StageRemote};

/// Extra headroom the planner demands over the nominal shard size, to
/// absorb padding and stale capacity figures.
const PLACEMENT_HEADROOM_PERCENT: u64 = 10;

/// A catalog file: origin, namespace, encoding and the fragment set.
/// `hash` and `size` are unset until the file has been stored once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub file_id: FileId,
    pub created_at: Timestamp,
    pub source: HubId,
    pub collection: SmolStr,
    pub filename: SmolStr,
    pub hash: Option<Hash>,
    pub size: Option<u64>,
    pub encoding: Encoding,
    pub fragments: Vec<Fragment>,
}

impl File {
    pub fn create(
        source: HubId,
        collection: impl AsRef<str>,
        filename: impl AsRef<str>,
        encoding: Encoding,
    ) -> Self {
        Self {
            file_id: FileId::generate(),
            created_at: Timestamp::now(),
            source,
            collection: SmolStr::new(collection),
            filename: SmolStr::new(filename),
            hash: None,
            size: None,
            encoding,
            fragments: Vec::new(),
        }
    }

    pub fn meta(&self) -> FileMeta {
        FileMeta {
            file_id: self.file_id.clone(),
            created_at: self.created_at,
            source: self.source.clone(),
            collection: self.collection.clone(),
            name: self.filename.clone(),
            hash: self.hash,
        }
    }

    /// Open a staging session. The session owns the file value until
    /// `close` hands it back, so concurrent opens of the same file value
    /// cannot be expressed.
    pub fn open(self, core: &Core) -> FileSession {
        let remote = FileRemote {
            core: core.clone(),
            encoding: self.encoding.clone(),
            expected_size: self.size,
            fragments: self.fragments.clone(),
        };
        let stage = Stage::open(&core.config().staging_dir, remote, self.hash);
        FileSession {
            core: core.clone(),
            file: self,
            stage,
        }
    }

    /// Rebuild every dirty fragment from the surviving clean ones and
    /// re-upload it, until no dirty fragment remains.
    pub async fn reconstruct(&mut self, core: &Core) -> Result<(), CoreError> {
        let coder = ShardCoder::new(&self.encoding)?;
        let k = usize::from(self.encoding.k);
        while self.fragments.iter().any(|f| !f.is_clean) {
            let mut slots: Vec<Option<Vec<u8>>> = vec![None; coder.total_shards()];
            let mut collected = 0;
            for position in 0..self.fragments.len() {
                if collected >= k {
                    break;
                }
                if !self.fragments[position].is_clean {
                    continue;
                }
                let fragment = self.fragments[position].clone();
                let index = usize::from(fragment.index);
                match read_fragment_payload(core, fragment).await {
                    Ok(payload) => {
                        slots[index] = Some(payload.to_vec());
                        collected += 1;
                    }
                    Err(err) if err.degrades_fragment() => {
                        let frag_id = self.fragments[position].frag_id.clone();
                        tracing::debug!(%frag_id, error = %err, "fragment degraded during repair");
                        self.fragments[position].is_clean = false;
                        catalog::set_fragment_clean(core, &frag_id, false).await?;
                    }
                    Err(err) => return Err(err),
                }
            }
            if collected < k {
                return Err(CoreError::Reconstruction(format!(
                    "{collected} intact fragments, {k} needed"
                )));
            }
            let restored = coder.reconstruct(slots)?;
            for position in 0..self.fragments.len() {
                if self.fragments[position].is_clean {
                    continue;
                }
                let fragment = self.fragments[position].clone();
                let shard = &restored[usize::from(fragment.index)];
                let mut session = fragment.open(core).await?;
                session.write(shard).await?;
                let mut repaired = session.close().await?;
                repaired.is_clean = true;
                catalog::update_fragment(core, &repaired).await?;
                self.fragments[position] = repaired;
            }
        }
        Ok(())
    }

    /// Fully verify every fragment; true only when all of them check out.
    pub async fn verify_full(&mut self, core: &Core) -> Result<bool, CoreError> {
        let mut all_clean = true;
        for fragment in &mut self.fragments {
            all_clean &= fragment.verify_full(core).await?;
        }
        Ok(all_clean)
    }

    /// Verify every fragment by remote hash; true only when all match.
    pub async fn verify_hash(&mut self, core: &Core) -> Result<bool, CoreError> {
        let mut all_clean = true;
        for fragment in &mut self.fragments {
            all_clean &= fragment.verify_hash(core).await?;
        }
        Ok(all_clean)
    }

    /// Demote all fragments to orphans and delete the catalog record.
    pub async fn remove(self, core: &Core) -> Result<(), CoreError> {
        let orphans: Vec<Orphan> = self
            .fragments
            .iter()
            .map(|fragment| Orphan::from_fragment(&self.file_id, fragment))
            .collect();
        catalog::remove_file(core, &self.file_id, &orphans).await
    }
}

/// A staging session over one file's plaintext.
pub struct FileSession {
    core: Core,
    file: File,
    stage: Stage<FileRemote>,
}

impl FileSession {
    pub async fn read_all(&mut self) -> Result<Bytes, CoreError> {
        self.stage.read_all().await
    }

    pub async fn write(&mut self, content: &[u8]) -> Result<(), CoreError> {
        self.stage.write(content).await
    }

    pub async fn write_chunks<I>(&mut self, chunks: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = Bytes> + Send,
    {
        self.stage.write_chunks(chunks).await
    }

    pub async fn append(&mut self, content: &[u8]) -> Result<(), CoreError> {
        self.stage.append(content).await
    }

    pub async fn size(&mut self) -> Result<u64, CoreError> {
        self.stage.size().await
    }

    pub async fn hash(&mut self) -> Result<Hash, CoreError> {
        self.stage.hash().await
    }

    /// Release the session. Unchanged content closes without touching the
    /// catalog or any hub. Changed content is re-encoded and placed as a
    /// fresh fragment set; the old fragments are demoted to orphans in the
    /// same transaction that commits the new ones. If placement fails, the
    /// partial fragments are orphaned immediately and the catalog keeps
    /// the previous file state.
    pub async fn close(self) -> Result<File, CoreError> {
        let FileSession {
            core,
            mut file,
            mut stage,
        } = self;

        if !stage.is_dirty() {
            stage.close().await?;
            return Ok(file);
        }
        let digest = stage.hash().await?;
        if file.hash == Some(digest) {
            stage.close().await?;
            return Ok(file);
        }

        let plaintext = stage.read_all().await?;
        let delayed: Vec<Fragment> = std::mem::take(&mut file.fragments);
        match upload_fragments(&core, &file, &plaintext).await {
            Ok(fragments) => {
                file.hash = Some(digest);
                file.size = Some(plaintext.len() as u64);
                file.fragments = fragments;
                stage.close().await?;
                let orphans: Vec<Orphan> = delayed
                    .iter()
                    .map(|fragment| Orphan::from_fragment(&file.file_id, fragment))
                    .collect();
                catalog::commit_file_replace(&core, &file, &orphans).await?;
                Ok(file)
            }
            Err((err, partial)) => {
                let orphans: Vec<Orphan> = partial
                    .iter()
                    .map(|fragment| Orphan::from_fragment(&file.file_id, fragment))
                    .collect();
                if let Err(persist_err) = catalog::insert_orphans(&core, &orphans).await {
                    tracing::error!(
                        file_id = %file.file_id,
                        error = %persist_err,
                        "failed to record orphans of a failed upload"
                    );
                }
                let _ = stage.close().await;
                Err(err)
            }
        }
    }
}

/// Encode the plaintext and place each shard on a hub, retrying refused
/// hubs elsewhere. On failure, returns the fragments placed so far so the
/// caller can orphan them.
async fn upload_fragments(
    core: &Core,
    file: &File,
    plaintext: &[u8],
) -> Result<Vec<Fragment>, (CoreError, Vec<Fragment>)> {
    let mut placed: Vec<Fragment> = Vec::new();
    let coder = ShardCoder::new(&file.encoding).map_err(|err| (err, Vec::new()))?;
    let shards = coder.encode(plaintext).map_err(|err| (err, Vec::new()))?;
    let required = required_fragment_bytes(plaintext.len() as u64, file.encoding.k);

    let mut local_excluded: HashSet<HubId> = HashSet::new();
    for (index, shard) in shards.into_iter().enumerate() {
        loop {
            let hub = match placement::select_hub(
                core,
                &file.source,
                &placed,
                required,
                &local_excluded,
            )
            .await
            {
                Ok(hub) => hub,
                Err(err) => return Err((err, placed)),
            };
            let fragment = Fragment::new(index as u16, hub.hub_id.clone());
            let mut session = fragment.open_at(core, hub.clone());
            if let Err(err) = session.write(&shard).await {
                return Err((err, placed));
            }
            match session.close().await {
                Ok(fragment) => {
                    placed.push(fragment);
                    break;
                }
                Err(err @ (CoreError::Remote(_) | CoreError::Timeout)) => {
                    tracing::warn!(
                        hub = %hub.hub_id,
                        error = %err,
                        "fragment upload failed, excluding hub for this upload"
                    );
                    local_excluded.insert(hub.hub_id.clone());
                }
                Err(err) => return Err((err, placed)),
            }
        }
    }
    Ok(placed)
}

fn required_fragment_bytes(total_size: u64, k: u16) -> u64 {
    let percent = 100 + PLACEMENT_HEADROOM_PERCENT;
    (total_size * percent).div_ceil(u64::from(k) * 100)
}

async fn read_fragment_payload(core: &Core, fragment: Fragment) -> Result<Bytes, CoreError> {
    let mut session = fragment.open(core).await?;
    let payload = session.read_all().await?;
    session.close().await?;
    Ok(payload)
}

struct FileRemote {
    core: Core,
    encoding: Encoding,
    expected_size: Option<u64>,
    fragments: Vec<Fragment>,
}

#[async_trait]
impl StageRemote for FileRemote {
    /// Walk the fragments in order until `k` verified payloads are in
    /// hand, degrading every fragment that fails on the way, then decode.
    async fn download(&mut self) -> Result<Option<Bytes>, CoreError> {
        if self.fragments.is_empty() {
            return Ok(None);
        }
        let coder = ShardCoder::new(&self.encoding)?;
        let size = self.expected_size.ok_or_else(|| {
            CoreError::InvalidRecord("stored file is missing its size".to_owned())
        })?;
        let k = usize::from(self.encoding.k);
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; coder.total_shards()];
        let mut collected = 0;
        for fragment in self.fragments.clone() {
            if collected >= k {
                break;
            }
            let frag_id = fragment.frag_id.clone();
            let index = usize::from(fragment.index);
            match read_fragment_payload(&self.core, fragment).await {
                Ok(payload) => {
                    slots[index] = Some(payload.to_vec());
                    collected += 1;
                }
                Err(err) if err.degrades_fragment() => {
                    tracing::debug!(%frag_id, error = %err, "fragment degraded during read");
                    catalog::set_fragment_clean(&self.core, &frag_id, false).await?;
                }
                Err(err) => return Err(err),
            }
        }
        let plaintext = coder.decode(slots, size)?;
        Ok(Some(Bytes::from(plaintext)))
    }

    /// Uploading is driven by the file session's own close protocol.
    async fn upload(&mut self, _content: Bytes) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Store content under (source, collection, name), creating the file with
/// the given encoding on first sight.
pub async fn store_file(
    core: &Core,
    source: &HubId,
    collection: &str,
    filename: &str,
    content: &[u8],
    default_encoding: &Encoding,
) -> Result<File, CoreError> {
    let file = match catalog::find_file(core, source, collection, filename).await? {
        Some(file) => file,
        None => {
            let hub = catalog::get_hub(core, source).await?;
            File::create(hub.hub_id, collection, filename, default_encoding.clone())
        }
    };
    let mut session = file.open(core);
    session.write(content).await?;
    session.close().await
}

/// Reconstruct a file's content and return it with the catalog record.
pub async fn fetch_file(
    core: &Core,
    source: &HubId,
    collection: &str,
    filename: &str,
) -> Result<(File, Bytes), CoreError> {
    let file = catalog::find_file(core, source, collection, filename)
        .await?
        .ok_or(CoreError::DoesNotExist)?;
    let mut session = file.open(core);
    let content = session.read_all().await?;
    let file = session.close().await?;
    Ok((file, content))
}
