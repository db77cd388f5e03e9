use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError};
use crate::filter::{Page, ResourceFilter};
use crate::resource::Resource;

/// REST collaborator the repository talks to while online.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn list(&self, filter: &ResourceFilter) -> Result<Page<Resource>, SyncError>;
    async fn get_by_id(&self, id: &str) -> Result<Resource, SyncError>;
    async fn create(&self, body: &Value) -> Result<Resource, SyncError>;
    async fn update(&self, id: &str, body: &Value) -> Result<Resource, SyncError>;
    async fn delete(&self, id: &str) -> Result<(), SyncError>;
}

/// JSON-over-HTTP client for a single resource collection.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.collection_url(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}", self.base_url, id),
            None => self.base_url.clone(),
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, SyncError> {
        let req = match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body: Option<Value> = resp.json().await.ok();
        Err(error_from_response(status, body).into())
    }

    /// Decode a 2xx body. A body that does not match is the server's fault.
    async fn read_json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, SyncError> {
        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| SyncError::Server {
            status,
            message: format!("invalid response body: {e}"),
            data: None,
        })
    }
}

/// Build the `{message, status, data}` error from a non-2xx response.
pub(crate) fn error_from_response(status: StatusCode, body: Option<Value>) -> RemoteError {
    let message = body
        .as_ref()
        .and_then(|b| {
            ["message", "detail", "error"]
                .iter()
                .find_map(|k| b.get(*k).and_then(Value::as_str))
        })
        .map(str::to_string)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    RemoteError {
        message,
        status: Some(status.as_u16()),
        data: body,
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn list(&self, filter: &ResourceFilter) -> Result<Page<Resource>, SyncError> {
        let resp = self
            .send(self.client.get(self.url(None)).query(&filter.query_pairs()))
            .await?;
        Self::read_json(resp).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Resource, SyncError> {
        let resp = self.send(self.client.get(self.url(Some(id)))).await?;
        Self::read_json(resp).await
    }

    async fn create(&self, body: &Value) -> Result<Resource, SyncError> {
        let resp = self.send(self.client.post(self.url(None)).json(body)).await?;
        Self::read_json(resp).await
    }

    async fn update(&self, id: &str, body: &Value) -> Result<Resource, SyncError> {
        let resp = self
            .send(self.client.put(self.url(Some(id))).json(body))
            .await?;
        Self::read_json(resp).await
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.send(self.client.delete(self.url(Some(id)))).await?;
        Ok(())
    }
}
