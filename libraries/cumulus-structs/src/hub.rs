use async_trait::async_trait;
use cumulus_crypt::hash::Hash;
use nanorpc::nanorpc_derive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Blob;
use crate::id::FragId;

/// The RPC protocol implemented by storage hubs. A hub is a dumb
/// byte/hash/capacity service: it never interprets fragment content.
#[nanorpc_derive]
#[async_trait]
pub trait HubProtocol {
    /// Store a fragment blob. Succeeds only when the hub's capacity rule
    /// leaves room for the content; a refusal still reports the hub's
    /// current capacity so callers can update their records.
    async fn v1_put_fragment(
        &self,
        frag_id: FragId,
        content: Blob,
    ) -> Result<PutFragmentResponse, HubRpcError>;

    /// Retrieve a fragment blob.
    async fn v1_get_fragment(&self, frag_id: FragId) -> Result<Blob, HubRpcError>;

    /// Retrieve the hash of a stored fragment, as computed by the hub.
    async fn v1_get_fragment_hash(&self, frag_id: FragId) -> Result<Hash, HubRpcError>;

    /// Delete a fragment blob. Deleting an absent fragment succeeds.
    async fn v1_delete_fragment(
        &self,
        frag_id: FragId,
    ) -> Result<DeleteFragmentResponse, HubRpcError>;

    /// Report the hub's capacity and usage.
    async fn v1_stats(&self) -> Result<HubStats, HubRpcError>;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PutFragmentResponse {
    pub frag_id: FragId,
    pub hash: Hash,
    pub available_bytes: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeleteFragmentResponse {
    pub frag_id: FragId,
    pub available_bytes: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct HubStats {
    pub available_bytes: u64,
    pub stored_bytes: u64,
}

/// An error from a storage hub.
#[derive(Error, Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubRpcError {
    #[error("fragment not found")]
    NotFound,
    #[error("insufficient storage space ({available_bytes} bytes available)")]
    OutOfSpace { available_bytes: u64 },
    #[error("internal hub error")]
    Internal,
}

#[cfg(test)]
mod tests {
    use super::HubRpcError;

    #[test]
    fn rpc_error_wire_format() {
        let json = serde_json::to_string(&HubRpcError::NotFound).expect("serialize");
        assert_eq!(json, "\"not_found\"");
        let refused = HubRpcError::OutOfSpace {
            available_bytes: 99,
        };
        let json = serde_json::to_string(&refused).expect("serialize");
        assert_eq!(json, "{\"out_of_space\":{\"available_bytes\":99}}");
    }
}
