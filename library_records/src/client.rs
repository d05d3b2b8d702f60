use anyhow::Context;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use reqwest_tracing::TracingMiddleware;
use serde_json::Value;

use crate::backend::{BackendError, Collection, LibraryBackend, RecordId};

pub const DEFAULT_READ_RETRIES: u32 = 3;

/// [`LibraryBackend`] talking to a json-server style REST service
/// Only reads are retried, a write that failed is reported straight away
pub struct LibraryRestClient {
    url: String,
    client: ClientWithMiddleware,
    read_client: ClientWithMiddleware,
}

impl LibraryRestClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Self::with_read_retries(url, DEFAULT_READ_RETRIES)
    }

    pub fn with_read_retries(url: &str, read_retries: u32) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client.clone())
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(read_retries);
        let read_client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
            read_client,
        })
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/{}", self.url, collection.path())
    }

    fn record_url(&self, collection: Collection, id: RecordId) -> String {
        format!("{}/{}/{}", self.url, collection.path(), id)
    }
}

fn transport_error(err: impl std::fmt::Display) -> BackendError {
    BackendError::Transport(err.to_string())
}

/// Maps the response status to an error, 404 on a record url is `NotFound`
async fn check_status(
    response: reqwest::Response,
    collection: Collection,
    id: Option<RecordId>,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let (StatusCode::NOT_FOUND, Some(id)) = (status, id) {
        return Err(BackendError::NotFound { collection, id });
    }
    let message = response.text().await.unwrap_or_default();
    tracing::error!("Request to {} failed with {}: {}", collection, status, message);
    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn read_json(
    response: reqwest::Response,
    collection: Collection,
    id: Option<RecordId>,
) -> Result<Value, BackendError> {
    check_status(response, collection, id)
        .await?
        .json()
        .await
        .map_err(transport_error)
}

#[async_trait::async_trait]
impl LibraryBackend for LibraryRestClient {
    /// Calls GET /{collection}
    async fn list(&self, collection: Collection) -> Result<Vec<Value>, BackendError> {
        let response = self
            .read_client
            .get(self.collection_url(collection))
            .send()
            .await
            .map_err(transport_error)?;
        match read_json(response, collection, None).await? {
            Value::Array(records) => Ok(records),
            other => Err(BackendError::Other(format!(
                "Expected a list of {}, got {}",
                collection, other
            ))),
        }
    }

    /// Calls GET /{collection}/{id}
    async fn get(&self, collection: Collection, id: RecordId) -> Result<Value, BackendError> {
        let response = self
            .read_client
            .get(self.record_url(collection, id))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response, collection, Some(id)).await
    }

    /// Calls POST /{collection}
    async fn create(&self, collection: Collection, record: Value) -> Result<Value, BackendError> {
        let response = self
            .client
            .post(self.collection_url(collection))
            .json(&record)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response, collection, None).await
    }

    /// Calls PUT /{collection}/{id}
    async fn replace(
        &self,
        collection: Collection,
        id: RecordId,
        record: Value,
    ) -> Result<Value, BackendError> {
        let response = self
            .client
            .put(self.record_url(collection, id))
            .json(&record)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response, collection, Some(id)).await
    }

    /// Calls PATCH /{collection}/{id}
    async fn patch(
        &self,
        collection: Collection,
        id: RecordId,
        patch: Value,
    ) -> Result<Value, BackendError> {
        let response = self
            .client
            .patch(self.record_url(collection, id))
            .json(&patch)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response, collection, Some(id)).await
    }

    /// Calls DELETE /{collection}/{id}
    async fn delete(&self, collection: Collection, id: RecordId) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.record_url(collection, id))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response, collection, Some(id)).await?;
        Ok(())
    }
}
