//! Tombstones for fragments no longer referenced by any file. An orphan
//! keeps its remote blob reclaimable: the record is only dropped once the
//! hub confirmed the delete.

use cumulus_crypt::hash::Hash;
use cumulus_structs::id::{FileId, FragId, HubId};
use cumulus_structs::timestamp::Timestamp;

use crate::Core;
use crate::blob::BlobClient;
use crate::catalog;
use crate::error::CoreError;
use crate::fragment::Fragment;

#[derive(Debug, Clone)]
pub struct Orphan {
    pub frag_id: FragId,
    pub file_id: FileId,
    pub index: u16,
    pub created_at: Timestamp,
    pub orphaned_at: Timestamp,
    pub remote: HubId,
    pub hash: Hash,
}

impl Orphan {
    pub(crate) fn from_fragment(file_id: &FileId, fragment: &Fragment) -> Self {
        Self {
            frag_id: fragment.frag_id.clone(),
            file_id: file_id.clone(),
            index: fragment.index,
            created_at: fragment.created_at,
            orphaned_at: Timestamp::now(),
            remote: fragment.remote.clone(),
            hash: fragment.hash,
        }
    }

    /// Delete the remote blob, then the orphan record. A failed delete
    /// leaves the record in place for a later sweep.
    pub async fn remove(self, core: &Core) -> Result<(), CoreError> {
        let hub = catalog::get_hub(core, &self.remote).await?;
        BlobClient::new(core, hub).delete(&self.frag_id).await?;
        catalog::delete_orphan(core, &self.frag_id).await
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct SweepReport {
    pub removed: usize,
    pub remaining: usize,
}

/// Walk the orphan set and reclaim every blob the hubs will let go of.
pub async fn sweep_orphans(core: &Core) -> Result<SweepReport, CoreError> {
    let mut report = SweepReport::default();
    for orphan in catalog::list_orphans(core).await? {
        let frag_id = orphan.frag_id.clone();
        match orphan.remove(core).await {
            Ok(()) => report.removed += 1,
            Err(err) => {
                tracing::warn!(%frag_id, error = %err, "orphan not reclaimed");
                report.remaining += 1;
            }
        }
    }
    tracing::info!(
        removed = report.removed,
        remaining = report.remaining,
        "orphan sweep finished"
    );
    Ok(report)
}
