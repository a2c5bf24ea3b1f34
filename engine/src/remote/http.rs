//! HTTP client for `satchel-server`.

use super::{PushRequest, PushResponse, RecordPage, RecordPush, RemoteStore};
use crate::{error::Result, DatasetMetadata, Error, SyncCount};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;

/// Remote store speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpRemote {
    /// Create a client for the server at `base_url` (e.g. `http://localhost:3000`).
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Validation(format!("invalid base url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Validation(format!("base url '{}' cannot hold a path", base_url)));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token: None,
        })
    }

    /// Send a bearer token with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Append path segments to the base url, percent-encoding each one.
    fn url(&self, identity: &str, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["identities", identity, "datasets"])
                .extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::service("transport", e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::service(status.as_u16().to_string(), message))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| Error::service("decode", e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn get_dataset_metadata(&self, identity: &str) -> Result<Vec<DatasetMetadata>> {
        self.send_json(self.client.get(self.url(identity, &[])))
            .await
    }

    async fn list_records(
        &self,
        identity: &str,
        dataset: &str,
        since: SyncCount,
    ) -> Result<RecordPage> {
        let url = self.url(identity, &[dataset, "records"]);
        self.send_json(self.client.get(url).query(&[("since", since)]))
            .await
    }

    async fn put_records(
        &self,
        identity: &str,
        dataset: &str,
        device_id: &str,
        records: Vec<RecordPush>,
    ) -> Result<PushResponse> {
        let url = self.url(identity, &[dataset, "records"]);
        let body = PushRequest {
            device_id: device_id.to_string(),
            records,
        };
        self.send_json(self.client.post(url).json(&body)).await
    }

    async fn delete_dataset(&self, identity: &str, dataset: &str) -> Result<()> {
        self.send(self.client.delete(self.url(identity, &[dataset])))
            .await?;
        Ok(())
    }
}
