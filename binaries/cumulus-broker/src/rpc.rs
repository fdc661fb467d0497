use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use cumulus_core::file::{fetch_file, store_file};
use cumulus_core::{Core, CoreError, catalog};
use cumulus_structs::Blob;
use cumulus_structs::broker::{
    BrokerProtocol, BrokerRpcError, BrokerService, FileMeta, FileWithContent,
};
use cumulus_structs::encoding::Encoding;
use cumulus_structs::id::HubId;
use nanorpc::{JrpcRequest, RpcService};
use smol_str::SmolStr;

#[derive(Clone)]
pub struct BrokerRpc {
    pub core: Core,
    pub default_encoding: Encoding,
    /// Files with an open session in this process. A file is single-writer;
    /// a second open is rejected instead of queued.
    pub in_progress: Arc<Mutex<HashSet<String>>>,
}

impl BrokerRpc {
    pub fn new(core: Core, default_encoding: Encoding) -> Self {
        Self {
            core,
            default_encoding,
            in_progress: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn try_claim(&self, key: &str) -> Result<(), BrokerRpcError> {
        try_claim(&self.in_progress, key)
    }

    fn release(&self, key: &str) {
        self.in_progress
            .lock()
            .expect("in-progress lock")
            .remove(key);
    }
}

fn try_claim(in_progress: &Mutex<HashSet<String>>, key: &str) -> Result<(), BrokerRpcError> {
    let mut in_progress = in_progress.lock().expect("in-progress lock");
    if !in_progress.insert(key.to_owned()) {
        return Err(BrokerRpcError::Busy);
    }
    Ok(())
}

fn file_key(source: &HubId, collection: &str, name: &str) -> String {
    format!("{source}/{collection}/{name}")
}

fn map_err(err: CoreError) -> BrokerRpcError {
    match err {
        CoreError::DoesNotExist => BrokerRpcError::DoesNotExist,
        CoreError::MultipleFound => BrokerRpcError::MultipleFound,
        CoreError::Reconstruction(_) | CoreError::HashMismatch { .. } => {
            BrokerRpcError::Reconstruction
        }
        CoreError::NoStorageLocation => BrokerRpcError::NoStorageLocation,
        CoreError::Remote(remote) => BrokerRpcError::RemoteStorage(remote.to_string()),
        CoreError::Timeout => BrokerRpcError::Timeout,
        other => BrokerRpcError::Internal(other.to_string()),
    }
}

pub async fn handle_rpc(State(rpc): State<BrokerRpc>, body: Bytes) -> impl IntoResponse {
    let Ok(req) = serde_json::from_slice::<JrpcRequest>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain")],
            Vec::new(),
        );
    };
    let service = BrokerService(rpc);
    let response = service.respond_raw(req).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_vec(&response).unwrap(),
    )
}

#[async_trait::async_trait]
impl BrokerProtocol for BrokerRpc {
    async fn v1_list_files(&self, source: Option<HubId>) -> Result<Vec<FileMeta>, BrokerRpcError> {
        let files = catalog::list_files(&self.core, source.as_ref())
            .await
            .map_err(map_err)?;
        Ok(files.iter().map(|file| file.meta()).collect())
    }

    async fn v1_store_file(
        &self,
        source: HubId,
        collection: SmolStr,
        name: SmolStr,
        content: Blob,
    ) -> Result<FileMeta, BrokerRpcError> {
        let key = file_key(&source, &collection, &name);
        self.try_claim(&key)?;
        scopeguard::defer!({
            self.release(&key);
        });
        let file = store_file(
            &self.core,
            &source,
            &collection,
            &name,
            content.as_ref(),
            &self.default_encoding,
        )
        .await
        .map_err(map_err)?;
        tracing::debug!(file_id = %file.file_id, source = %source, "file stored");
        Ok(file.meta())
    }

    async fn v1_fetch_file(
        &self,
        source: HubId,
        collection: SmolStr,
        name: SmolStr,
    ) -> Result<FileWithContent, BrokerRpcError> {
        let key = file_key(&source, &collection, &name);
        self.try_claim(&key)?;
        scopeguard::defer!({
            self.release(&key);
        });
        let (file, content) = fetch_file(&self.core, &source, &collection, &name)
            .await
            .map_err(map_err)?;
        Ok(FileWithContent {
            meta: file.meta(),
            content: Blob::from(content),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::{BrokerRpcError, try_claim};

    #[test]
    fn second_claim_on_same_file_is_busy() {
        let in_progress = Mutex::new(HashSet::new());
        assert!(try_claim(&in_progress, "CML-1/c/f").is_ok());
        assert!(matches!(
            try_claim(&in_progress, "CML-1/c/f"),
            Err(BrokerRpcError::Busy)
        ));
        assert!(try_claim(&in_progress, "CML-1/c/other").is_ok());
        in_progress.lock().expect("lock").remove("CML-1/c/f");
        assert!(try_claim(&in_progress, "CML-1/c/f").is_ok());
    }
}
