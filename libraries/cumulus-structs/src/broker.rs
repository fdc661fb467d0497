use async_trait::async_trait;
use cumulus_crypt::hash::Hash;
use nanorpc::nanorpc_derive;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

use crate::Blob;
use crate::id::{FileId, HubId};
use crate::timestamp::Timestamp;

/// The client-facing RPC protocol of the file service.
#[nanorpc_derive]
#[async_trait]
pub trait BrokerProtocol {
    /// List stored files, optionally restricted to one source hub.
    async fn v1_list_files(&self, source: Option<HubId>) -> Result<Vec<FileMeta>, BrokerRpcError>;

    /// Store a file, upserting by (source, collection, name). A file seen
    /// for the first time is encoded with the service's default encoding.
    async fn v1_store_file(
        &self,
        source: HubId,
        collection: SmolStr,
        name: SmolStr,
        content: Blob,
    ) -> Result<FileMeta, BrokerRpcError>;

    /// Retrieve a file's metadata together with its reconstructed content.
    async fn v1_fetch_file(
        &self,
        source: HubId,
        collection: SmolStr,
        name: SmolStr,
    ) -> Result<FileWithContent, BrokerRpcError>;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileMeta {
    pub file_id: FileId,
    pub created_at: Timestamp,
    pub source: HubId,
    pub collection: SmolStr,
    pub name: SmolStr,
    pub hash: Option<Hash>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileWithContent {
    #[serde(flatten)]
    pub meta: FileMeta,
    pub content: Blob,
}

/// An error from the file service, as surfaced to external clients.
#[derive(Error, Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerRpcError {
    #[error("object does not exist")]
    DoesNotExist,
    #[error("multiple objects found")]
    MultipleFound,
    #[error("the object is in use, retry later")]
    Busy,
    #[error("not enough surviving fragments to reconstruct the file")]
    Reconstruction,
    #[error("no remote storage location found")]
    NoStorageLocation,
    #[error("remote storage error: {0}")]
    RemoteStorage(String),
    #[error("connection to a storage hub timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}
