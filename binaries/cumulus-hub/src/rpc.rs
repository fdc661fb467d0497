use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use cumulus_crypt::hash::Hash;
use cumulus_structs::Blob;
use cumulus_structs::hub::{
    DeleteFragmentResponse, HubProtocol, HubRpcError, HubService, HubStats, PutFragmentResponse,
};
use cumulus_structs::id::FragId;
use nanorpc::{JrpcRequest, RpcService};

use crate::store::{FragmentStore, PutOutcome};

#[derive(Clone)]
pub struct HubRpc {
    pub store: Arc<FragmentStore>,
}

pub async fn handle_rpc(
    State(rpc): State<HubRpc>,
    body: Bytes,
) -> impl IntoResponse {
    let Ok(req) = serde_json::from_slice::<JrpcRequest>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain")],
            Vec::new(),
        );
    };
    let service = HubService(rpc);
    let response = service.respond_raw(req).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_vec(&response).unwrap(),
    )
}

fn internal(err: anyhow::Error) -> HubRpcError {
    tracing::error!(error = %err, "fragment store failure");
    HubRpcError::Internal
}

#[async_trait::async_trait]
impl HubProtocol for HubRpc {
    async fn v1_put_fragment(
        &self,
        frag_id: FragId,
        content: Blob,
    ) -> Result<PutFragmentResponse, HubRpcError> {
        match self
            .store
            .put(&frag_id, content.as_ref())
            .await
            .map_err(internal)?
        {
            PutOutcome::Stored {
                hash,
                available_bytes,
            } => Ok(PutFragmentResponse {
                frag_id,
                hash,
                available_bytes,
            }),
            PutOutcome::Refused { available_bytes } => {
                tracing::debug!(%frag_id, available_bytes, "put refused for capacity");
                Err(HubRpcError::OutOfSpace { available_bytes })
            }
        }
    }

    async fn v1_get_fragment(&self, frag_id: FragId) -> Result<Blob, HubRpcError> {
        self.store
            .get(&frag_id)
            .await
            .map_err(internal)?
            .map(Blob::from)
            .ok_or(HubRpcError::NotFound)
    }

    async fn v1_get_fragment_hash(&self, frag_id: FragId) -> Result<Hash, HubRpcError> {
        self.store
            .hash(&frag_id)
            .await
            .map_err(internal)?
            .ok_or(HubRpcError::NotFound)
    }

    async fn v1_delete_fragment(
        &self,
        frag_id: FragId,
    ) -> Result<DeleteFragmentResponse, HubRpcError> {
        self.store.delete(&frag_id).await.map_err(internal)?;
        let available_bytes = self.store.available_bytes().await.map_err(internal)?;
        Ok(DeleteFragmentResponse {
            frag_id,
            available_bytes,
        })
    }

    async fn v1_stats(&self) -> Result<HubStats, HubRpcError> {
        let available_bytes = self.store.available_bytes().await.map_err(internal)?;
        let stored_bytes = self.store.stored_bytes().await.map_err(internal)?;
        Ok(HubStats {
            available_bytes,
            stored_bytes,
        })
    }
}
