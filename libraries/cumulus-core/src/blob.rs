//! Typed client for one storage hub. Every response that reports the
//! hub's capacity is written back to the catalog before the call returns,
//! so the placement planner always works from the freshest figure.

use std::future::Future;

use bytes::Bytes;
use cumulus_crypt::hash::Hash;
use cumulus_structs::Blob;
use cumulus_structs::hub::{HubClient, HubRpcError, HubStats};
use cumulus_structs::id::FragId;
use nanorpc::DynRpcTransport;

use crate::Core;
use crate::catalog::{self, Hub};
use crate::error::{CoreError, RemoteError};

pub struct BlobClient {
    core: Core,
    hub: Hub,
}

impl BlobClient {
    pub fn new(core: &Core, hub: Hub) -> Self {
        Self {
            core: core.clone(),
            hub,
        }
    }

    fn client(&self) -> HubClient {
        let transport = self.core.rpc().rpc(self.hub.endpoint.clone());
        HubClient::from(DynRpcTransport::new(transport))
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = T>) -> Result<T, CoreError> {
        tokio::time::timeout(self.core.request_timeout(), fut)
            .await
            .map_err(|_| {
                tracing::warn!(hub = %self.hub.hub_id, "hub call timed out");
                CoreError::Timeout
            })
    }

    async fn record_capacity(&self, available_bytes: u64) -> Result<(), CoreError> {
        catalog::update_hub_capacity(&self.core, &self.hub.hub_id, available_bytes).await
    }

    /// Fetch the raw blob, or `None` if the hub does not have it.
    pub async fn get_content(&self, frag_id: &FragId) -> Result<Option<Bytes>, CoreError> {
        let response = self
            .with_timeout(self.client().v1_get_fragment(frag_id.clone()))
            .await?;
        match response {
            Ok(Ok(blob)) => Ok(Some(blob.into_bytes())),
            Ok(Err(HubRpcError::NotFound)) => Ok(None),
            Ok(Err(err)) => {
                tracing::warn!(hub = %self.hub.hub_id, %frag_id, error = %err, "download refused");
                Err(RemoteError::DownloadFailed.into())
            }
            Err(err) => {
                tracing::warn!(hub = %self.hub.hub_id, %frag_id, error = %err, "download failed");
                Err(RemoteError::DownloadFailed.into())
            }
        }
    }

    /// Fetch the blob's digest as computed by the hub.
    pub async fn get_hash(&self, frag_id: &FragId) -> Result<Option<Hash>, CoreError> {
        let response = self
            .with_timeout(self.client().v1_get_fragment_hash(frag_id.clone()))
            .await?;
        match response {
            Ok(Ok(hash)) => Ok(Some(hash)),
            Ok(Err(HubRpcError::NotFound)) => Ok(None),
            Ok(Err(err)) => {
                tracing::warn!(hub = %self.hub.hub_id, %frag_id, error = %err, "hash fetch refused");
                Err(RemoteError::DownloadFailed.into())
            }
            Err(err) => {
                tracing::warn!(hub = %self.hub.hub_id, %frag_id, error = %err, "hash fetch failed");
                Err(RemoteError::DownloadFailed.into())
            }
        }
    }

    /// Write the blob; returns the hub's post-write capacity. A capacity
    /// refusal is surfaced as `InsufficientSpace` after recording the
    /// figure the hub reported with it.
    pub async fn put_content(&self, frag_id: &FragId, content: Bytes) -> Result<u64, CoreError> {
        let response = self
            .with_timeout(
                self.client()
                    .v1_put_fragment(frag_id.clone(), Blob::from(content)),
            )
            .await?;
        match response {
            Ok(Ok(put)) => {
                self.record_capacity(put.available_bytes).await?;
                Ok(put.available_bytes)
            }
            Ok(Err(HubRpcError::OutOfSpace { available_bytes })) => {
                self.record_capacity(available_bytes).await?;
                Err(RemoteError::InsufficientSpace { available_bytes }.into())
            }
            Ok(Err(err)) => {
                tracing::warn!(hub = %self.hub.hub_id, %frag_id, error = %err, "upload refused");
                Err(RemoteError::UploadFailed.into())
            }
            Err(err) => {
                tracing::warn!(hub = %self.hub.hub_id, %frag_id, error = %err, "upload failed");
                Err(RemoteError::UploadFailed.into())
            }
        }
    }

    /// Delete the blob; idempotent at the hub. Returns the post-delete
    /// capacity.
    pub async fn delete(&self, frag_id: &FragId) -> Result<u64, CoreError> {
        let response = self
            .with_timeout(self.client().v1_delete_fragment(frag_id.clone()))
            .await?;
        match response {
            Ok(Ok(deleted)) => {
                self.record_capacity(deleted.available_bytes).await?;
                Ok(deleted.available_bytes)
            }
            Ok(Err(err)) => {
                tracing::warn!(hub = %self.hub.hub_id, %frag_id, error = %err, "delete refused");
                Err(RemoteError::DeleteFailed.into())
            }
            Err(err) => {
                tracing::warn!(hub = %self.hub.hub_id, %frag_id, error = %err, "delete failed");
                Err(RemoteError::DeleteFailed.into())
            }
        }
    }

    /// The hub's capacity report; also refreshes the catalog figure.
    pub async fn stats(&self) -> Result<HubStats, CoreError> {
        let response = self.with_timeout(self.client().v1_stats()).await?;
        match response {
            Ok(Ok(stats)) => {
                self.record_capacity(stats.available_bytes).await?;
                Ok(stats)
            }
            Ok(Err(err)) => {
                tracing::warn!(hub = %self.hub.hub_id, error = %err, "stats refused");
                Err(RemoteError::DownloadFailed.into())
            }
            Err(err) => {
                tracing::warn!(hub = %self.hub.hub_id, error = %err, "stats failed");
                Err(RemoteError::DownloadFailed.into())
            }
        }
    }
}
