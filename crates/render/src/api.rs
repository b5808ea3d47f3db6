//! HTTP implementation of [`RenderBackend`] using [`reqwest`].

use async_trait::async_trait;
use serde::Deserialize;

use crate::backend::RenderBackend;
use crate::error::RenderError;
use crate::types::{HistoryEntry, OutputFile, QueueSnapshot, RawQueue};

/// REST client for a single render server.
pub struct RenderApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the `/prompt` endpoint after queuing a graph.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[allow(dead_code)]
    pub number: i32,
}

impl RenderApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`RenderError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RenderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RenderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RenderError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), RenderError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RenderBackend for RenderApi {
    /// `POST /prompt` with the graph and a fresh client id.
    async fn submit(&self, graph: &serde_json::Value) -> Result<String, RenderError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::json!({
            "prompt": graph,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        tracing::debug!(prompt_id = %submitted.prompt_id, "Graph submitted to render server");
        Ok(submitted.prompt_id)
    }

    /// `GET /queue`.
    async fn queue(&self) -> Result<QueueSnapshot, RenderError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .send()
            .await?;

        let raw: RawQueue = Self::parse_response(response).await?;
        Ok(raw.into())
    }

    /// `GET /history/{prompt_id}`.
    ///
    /// The server responds with a map keyed by prompt id; an empty map
    /// means it has no record of the prompt.
    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, RenderError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        let mut body: serde_json::Value = Self::parse_response(response).await?;
        match body.get_mut(prompt_id) {
            Some(entry) => {
                let entry: HistoryEntry = serde_json::from_value(entry.take())
                    .map_err(|e| RenderError::Decode(format!("history entry: {e}")))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// `GET /view?filename=...&subfolder=...&type=...`.
    async fn fetch_output(&self, file: &OutputFile) -> Result<Vec<u8>, RenderError> {
        let folder_type = if file.folder_type.is_empty() {
            "output"
        } else {
            file.folder_type.as_str()
        };

        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", file.filename.as_str()),
                ("subfolder", file.subfolder.as_str()),
                ("type", folder_type),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// `POST /queue {delete: [ids]}`.
    async fn delete_from_queue(&self, prompt_ids: &[String]) -> Result<(), RenderError> {
        let body = serde_json::json!({ "delete": prompt_ids });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// `POST /interrupt`. Stops whatever is executing right now.
    async fn interrupt(&self) -> Result<(), RenderError> {
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// `GET /object_info/CheckpointLoaderSimple`. The first installed
    /// checkpoint is used as the default model.
    async fn default_checkpoint(&self) -> Result<String, RenderError> {
        let response = self
            .client
            .get(format!("{}/object_info/CheckpointLoaderSimple", self.api_url))
            .send()
            .await?;

        let body: serde_json::Value = Self::parse_response(response).await?;
        body.pointer("/CheckpointLoaderSimple/input/required/ckpt_name/0/0")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RenderError::Decode("render server reports no installed checkpoints".into())
            })
    }
}
