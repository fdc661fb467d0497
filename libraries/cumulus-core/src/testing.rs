//! Shared test fixtures: a tempdir-backed core and in-memory hubs served
//! over real HTTP, so the whole client stack is exercised end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use bytes::Bytes;
use cumulus_crypt::hash::Hash;
use cumulus_structs::Blob;
use cumulus_structs::hub::{
    DeleteFragmentResponse, HubProtocol, HubRpcError, HubService, HubStats, PutFragmentResponse,
};
use cumulus_structs::id::{FragId, HubId};
use nanorpc::{JrpcRequest, RpcService};
use smol_str::SmolStr;
use url::Url;

use crate::catalog::{self, Hub};
use crate::{Core, CoreConfig};

pub(crate) struct TestGuard {
    _dir: tempfile::TempDir,
}

pub(crate) async fn test_core() -> (Core, TestGuard) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = CoreConfig {
        db_path: dir.path().join("catalog.db").to_string_lossy().into_owned(),
        staging_dir: dir.path().join("staging"),
        request_timeout_secs: 1,
        repair_lock_path: dir.path().join("locks").join("reconstruct.lock"),
        verify_fraction: 0.5,
    };
    let core = Core::open(config).await.expect("open core");
    (core, TestGuard { _dir: dir })
}

#[derive(Default)]
pub(crate) struct HubState {
    pub blobs: HashMap<FragId, Bytes>,
    pub available_bytes: u64,
    pub puts: usize,
    pub gets: usize,
    pub deletes: usize,
    pub hang: bool,
}

/// An in-memory blob server implementing the hub protocol, with knobs for
/// injecting capacity pressure, shared put budgets and hangs.
#[derive(Clone, Default)]
pub(crate) struct MemoryHub {
    state: Arc<Mutex<HubState>>,
    put_budget: Option<Arc<AtomicI64>>,
}

impl MemoryHub {
    pub fn new(available_bytes: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                available_bytes,
                ..HubState::default()
            })),
            put_budget: None,
        }
    }

    /// Every put across all hubs sharing `budget` decrements it; once it
    /// runs out, puts fail unrecoverably.
    pub fn with_put_budget(available_bytes: u64, budget: Arc<AtomicI64>) -> Self {
        Self {
            put_budget: Some(budget),
            ..Self::new(available_bytes)
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().expect("hub state lock")
    }

    async fn maybe_hang(&self) {
        let hang = self.lock().hang;
        if hang {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}

#[async_trait]
impl HubProtocol for MemoryHub {
    async fn v1_put_fragment(
        &self,
        frag_id: FragId,
        content: Blob,
    ) -> Result<PutFragmentResponse, HubRpcError> {
        self.maybe_hang().await;
        if let Some(budget) = &self.put_budget {
            if budget.fetch_sub(1, Ordering::SeqCst) <= 0 {
                return Err(HubRpcError::Internal);
            }
        }
        let mut state = self.lock();
        state.puts += 1;
        let len = content.len() as u64;
        if state.available_bytes <= len {
            return Err(HubRpcError::OutOfSpace {
                available_bytes: state.available_bytes,
            });
        }
        state.available_bytes -= len;
        let bytes = content.into_bytes();
        let hash = Hash::digest(&bytes);
        state.blobs.insert(frag_id.clone(), bytes);
        Ok(PutFragmentResponse {
            frag_id,
            hash,
            available_bytes: state.available_bytes,
        })
    }

    async fn v1_get_fragment(&self, frag_id: FragId) -> Result<Blob, HubRpcError> {
        self.maybe_hang().await;
        let mut state = self.lock();
        state.gets += 1;
        state
            .blobs
            .get(&frag_id)
            .cloned()
            .map(Blob::from)
            .ok_or(HubRpcError::NotFound)
    }

    async fn v1_get_fragment_hash(&self, frag_id: FragId) -> Result<Hash, HubRpcError> {
        self.maybe_hang().await;
        let state = self.lock();
        state
            .blobs
            .get(&frag_id)
            .map(|blob| Hash::digest(blob))
            .ok_or(HubRpcError::NotFound)
    }

    async fn v1_delete_fragment(
        &self,
        frag_id: FragId,
    ) -> Result<DeleteFragmentResponse, HubRpcError> {
        self.maybe_hang().await;
        let mut state = self.lock();
        state.deletes += 1;
        if let Some(blob) = state.blobs.remove(&frag_id) {
            state.available_bytes += blob.len() as u64;
        }
        Ok(DeleteFragmentResponse {
            frag_id,
            available_bytes: state.available_bytes,
        })
    }

    async fn v1_stats(&self) -> Result<HubStats, HubRpcError> {
        let state = self.lock();
        Ok(HubStats {
            available_bytes: state.available_bytes,
            stored_bytes: state.blobs.values().map(|blob| blob.len() as u64).sum(),
        })
    }
}

async fn handle_rpc(
    State(service): State<Arc<HubService<MemoryHub>>>,
    body: Bytes,
) -> impl IntoResponse {
    let Ok(req) = serde_json::from_slice::<JrpcRequest>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain")],
            Vec::new(),
        );
    };
    let response = service.respond_raw(req).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_vec(&response).expect("serialize jrpc response"),
    )
}

/// Serve a hub on an ephemeral localhost port, returning its endpoint.
pub(crate) async fn spawn_hub(hub: MemoryHub) -> Url {
    let service = Arc::new(HubService(hub));
    let app = Router::new()
        .route("/", post(handle_rpc))
        .with_state(service);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind hub listener");
    let addr = listener.local_addr().expect("hub listener addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve hub");
    });
    Url::parse(&format!("http://{addr}/")).expect("hub url")
}

/// Register a catalog-only hub with an unreachable endpoint. Good enough
/// for everything that never actually dials it.
pub(crate) async fn register_hub(core: &Core, reference: &str, available_bytes: u64) -> Hub {
    let hub = Hub {
        hub_id: HubId::generate(),
        reference: SmolStr::new(reference),
        endpoint: Url::parse("http://127.0.0.1:9/").expect("static url"),
        available_bytes,
    };
    catalog::insert_hub(core, &hub).await.expect("insert hub");
    hub
}

/// Serve `memory` and register it in the catalog. `catalog_bytes` is the
/// capacity the catalog *believes* the hub has, which tests may let drift
/// from the hub's own figure.
pub(crate) async fn add_live_hub(
    core: &Core,
    reference: &str,
    memory: MemoryHub,
    catalog_bytes: u64,
) -> (Hub, MemoryHub) {
    let endpoint = spawn_hub(memory.clone()).await;
    let hub = Hub {
        hub_id: HubId::generate(),
        reference: SmolStr::new(reference),
        endpoint,
        available_bytes: catalog_bytes,
    };
    catalog::insert_hub(core, &hub).await.expect("insert hub");
    (hub, memory)
}
