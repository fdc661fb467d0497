//! Catalog fragments and their staging sessions. A fragment maps 1:1 to a
//! remote blob keyed by its `frag_id`; the catalog's `hash` is only moved
//! forward after the remote accepted the new content.

use async_trait::async_trait;
use bytes::Bytes;
use cumulus_crypt::hash::{CHUNK_SIZE, Hash};
use cumulus_structs::id::{FragId, HubId};
use cumulus_structs::timestamp::Timestamp;

use crate::Core;
use crate::blob::BlobClient;
use crate::catalog::{self, Hub};
use crate::error::CoreError;
use crate::stage::{ChunkReader, Stage, StageOutcome, StageRemote};

/// One erasure-coded shard of a file, stored at a hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub frag_id: FragId,
    pub created_at: Timestamp,
    pub index: u16,
    pub remote: HubId,
    pub hash: Hash,
    pub is_clean: bool,
}

impl Fragment {
    /// A fresh fragment pinned to a hub, not yet uploaded anywhere. Its
    /// hash starts as the digest of empty content, matching the blob the
    /// remote does not have yet.
    pub(crate) fn new(index: u16, remote: HubId) -> Self {
        Self {
            frag_id: FragId::generate(),
            created_at: Timestamp::now(),
            index,
            remote,
            hash: Hash::digest(&[]),
            is_clean: true,
        }
    }

    /// Open a staging session for this fragment's blob. The session owns
    /// the fragment value until `close` hands it back, so a second open of
    /// the same fragment is unrepresentable.
    pub async fn open(self, core: &Core) -> Result<FragmentSession, CoreError> {
        let hub = catalog::get_hub(core, &self.remote).await?;
        Ok(self.open_at(core, hub))
    }

    /// Like [`Fragment::open`], with the hub row already in hand.
    pub(crate) fn open_at(self, core: &Core, hub: Hub) -> FragmentSession {
        let remote = FragmentRemote {
            client: BlobClient::new(core, hub),
            frag_id: self.frag_id.clone(),
        };
        let stage = Stage::open(&core.config().staging_dir, remote, Some(self.hash));
        FragmentSession {
            fragment: self,
            stage,
        }
    }

    /// Download the whole blob and check it against the catalog hash.
    /// Flips and persists `is_clean`; returns the new value.
    pub async fn verify_full(&mut self, core: &Core) -> Result<bool, CoreError> {
        let outcome = async {
            let mut session = self.clone().open(core).await?;
            let mut reader = session.read_chunks(CHUNK_SIZE).await?;
            while reader.next_chunk().await?.is_some() {}
            session.close().await?;
            Ok::<(), CoreError>(())
        }
        .await;
        let clean = match outcome {
            Ok(()) => true,
            Err(err) if err.degrades_fragment() => {
                tracing::debug!(frag_id = %self.frag_id, error = %err, "full verification failed");
                false
            }
            Err(err) => return Err(err),
        };
        self.set_clean(core, clean).await?;
        Ok(clean)
    }

    /// Ask the hub for the blob's digest and compare against the catalog
    /// hash. Flips and persists `is_clean`; returns the new value.
    pub async fn verify_hash(&mut self, core: &Core) -> Result<bool, CoreError> {
        let hub = catalog::get_hub(core, &self.remote).await?;
        let client = BlobClient::new(core, hub);
        let clean = match client.get_hash(&self.frag_id).await {
            Ok(Some(remote_hash)) => remote_hash == self.hash,
            Ok(None) => false,
            Err(err) if err.degrades_fragment() => {
                tracing::debug!(frag_id = %self.frag_id, error = %err, "hash verification failed");
                false
            }
            Err(err) => return Err(err),
        };
        self.set_clean(core, clean).await?;
        Ok(clean)
    }

    async fn set_clean(&mut self, core: &Core, clean: bool) -> Result<(), CoreError> {
        self.is_clean = clean;
        catalog::set_fragment_clean(core, &self.frag_id, clean).await
    }
}

/// A staging session over one fragment blob.
pub struct FragmentSession {
    fragment: Fragment,
    stage: Stage<FragmentRemote>,
}

impl FragmentSession {
    pub async fn read_all(&mut self) -> Result<Bytes, CoreError> {
        self.stage.read_all().await
    }

    pub(crate) async fn read_chunks(&mut self, chunk_size: usize) -> Result<ChunkReader, CoreError> {
        self.stage.read_chunks(chunk_size).await
    }

    pub async fn write(&mut self, content: &[u8]) -> Result<(), CoreError> {
        self.stage.write(content).await
    }

    pub async fn size(&mut self) -> Result<u64, CoreError> {
        self.stage.size().await
    }

    pub async fn hash(&mut self) -> Result<Hash, CoreError> {
        self.stage.hash().await
    }

    /// Release the session. If the content changed, the new blob is
    /// uploaded and the returned fragment carries its digest; on upload
    /// failure the fragment's hash is left behind durable storage and the
    /// error propagates.
    pub async fn close(self) -> Result<Fragment, CoreError> {
        let FragmentSession {
            mut fragment,
            stage,
        } = self;
        match stage.close().await? {
            StageOutcome::Unchanged => {}
            StageOutcome::Uploaded(hash) => fragment.hash = hash,
        }
        Ok(fragment)
    }
}

struct FragmentRemote {
    client: BlobClient,
    frag_id: FragId,
}

#[async_trait]
impl StageRemote for FragmentRemote {
    async fn download(&mut self) -> Result<Option<Bytes>, CoreError> {
        // NotFound surfaces as an empty local stage; the expected-hash
        // check then degrades the fragment like any other corruption.
        self.client.get_content(&self.frag_id).await
    }

    async fn upload(&mut self, content: Bytes) -> Result<(), CoreError> {
        self.client.put_content(&self.frag_id, content).await?;
        Ok(())
    }
}
