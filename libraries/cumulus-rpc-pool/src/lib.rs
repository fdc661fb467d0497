use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;
use nanorpc::{JrpcRequest, JrpcResponse, RpcTransport};
use url::Url;

/// A pool of JSON-RPC transports keyed by endpoint URL. Transports are
/// created on first use, cached, and dropped after a failed call so the
/// next call starts from a fresh one.
#[derive(Clone)]
pub struct RpcPool {
    inner: Arc<RpcPoolInner>,
}

struct RpcPoolInner {
    client: reqwest::Client,
    transports: Cache<Url, Arc<HttpTransport>>,
}

impl RpcPool {
    pub fn new() -> Self {
        RpcPool {
            inner: Arc::new(RpcPoolInner {
                client: reqwest::Client::new(),
                transports: Cache::builder().build(),
            }),
        }
    }

    /// A transport handle for the given endpoint.
    pub fn rpc(&self, url: Url) -> PooledTransport {
        PooledTransport {
            pool: self.clone(),
            url,
        }
    }

    async fn call_raw(&self, url: Url, req: JrpcRequest) -> Result<JrpcResponse, anyhow::Error> {
        let client = self.inner.client.clone();
        let transport = self
            .inner
            .transports
            .get_with(url.clone(), async move {
                Arc::new(HttpTransport {
                    client,
                    endpoint: url,
                })
            })
            .await;
        let result = transport.call_raw(req).await;
        if result.is_err() {
            self.inner.transports.invalidate(&transport.endpoint).await;
        }
        result
    }
}

impl Default for RpcPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable transport bound to one endpoint of an [`RpcPool`].
#[derive(Clone)]
pub struct PooledTransport {
    pool: RpcPool,
    url: Url,
}

#[async_trait]
impl RpcTransport for PooledTransport {
    type Error = anyhow::Error;

    async fn call_raw(&self, req: JrpcRequest) -> Result<JrpcResponse, Self::Error> {
        self.pool.call_raw(self.url.clone(), req).await
    }
}

struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
}

#[async_trait]
impl RpcTransport for HttpTransport {
    type Error = anyhow::Error;

    async fn call_raw(&self, req: JrpcRequest) -> Result<JrpcResponse, Self::Error> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&req)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<JrpcResponse>().await?)
    }
}
