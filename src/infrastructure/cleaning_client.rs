//! HTTP client for the catalog cleaning backend
//!
//! One `reqwest` client serves the three backend calls a run makes: the
//! batched products clean-up, the per-store clean-up and the run log upload.
//! Every request races the run's cancellation token, so cancelling a run
//! drops the in-flight request instead of waiting for the backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, USER_AGENT},
    Client, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::domain::{
    EndpointError, ProductCleanOutcome, ProductCleaningService, RunLogEntry, RunLogSink,
    StoreCleanOutcome, StoreCleaningService,
};
use crate::infrastructure::config::EndpointConfig;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanProductsRequest<'a> {
    product_ids: &'a [String],
    scope: &'a str,
}

#[derive(Deserialize)]
struct CleanProductsResponse {
    results: Vec<ProductCleanOutcome>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanStoreRequest<'a> {
    store_id: &'a str,
}

/// Error body the backend sends with non-2xx responses
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct HttpCleaningClient {
    client: Client,
    products_url: Url,
    stores_url: Url,
    run_logs_url: Url,
}

impl HttpCleaningClient {
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid endpoint base URL: {}", config.base_url))?;
        let join = |path: &str| {
            base.join(path)
                .with_context(|| format!("Invalid endpoint path: {}", path))
        };

        Ok(Self {
            products_url: join(&config.products_path)?,
            stores_url: join(&config.stores_path)?,
            run_logs_url: join(&config.run_logs_path)?,
            client,
        })
    }

    /// POST `body` as JSON and return the status and raw body
    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
        cancellation_token: &CancellationToken,
    ) -> Result<String, EndpointError> {
        if cancellation_token.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }

        tracing::debug!("POST {}", url);

        let response = tokio::select! {
            result = self.client.post(url.clone()).json(body).send() => {
                result.map_err(transport_error)?
            },
            _ = cancellation_token.cancelled() => {
                tracing::warn!("🛑 HTTP request cancelled: {}", url);
                return Err(EndpointError::Cancelled);
            }
        };

        let status = response.status();
        let text = tokio::select! {
            result = response.text() => result.map_err(transport_error)?,
            _ = cancellation_token.cancelled() => {
                tracing::warn!("🛑 Response reading cancelled: {}", url);
                return Err(EndpointError::Cancelled);
            }
        };

        if !status.is_success() {
            return Err(EndpointError::Status {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }

        tracing::debug!("{} answered {} ({} bytes)", url, status, text.len());
        Ok(text)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &Url,
        body: &B,
        cancellation_token: &CancellationToken,
    ) -> Result<R, EndpointError> {
        let text = self.post(url, body, cancellation_token).await?;
        serde_json::from_str(&text).map_err(|e| EndpointError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ProductCleaningService for HttpCleaningClient {
    async fn clean_products(
        &self,
        product_ids: &[String],
        scope: &str,
        cancellation_token: &CancellationToken,
    ) -> Result<Vec<ProductCleanOutcome>, EndpointError> {
        let request = CleanProductsRequest { product_ids, scope };
        let response: CleanProductsResponse = self
            .post_json(&self.products_url, &request, cancellation_token)
            .await?;
        Ok(response.results)
    }
}

#[async_trait]
impl StoreCleaningService for HttpCleaningClient {
    async fn clean_store(
        &self,
        store_id: &str,
        cancellation_token: &CancellationToken,
    ) -> Result<StoreCleanOutcome, EndpointError> {
        self.post_json(
            &self.stores_url,
            &CleanStoreRequest { store_id },
            cancellation_token,
        )
        .await
    }
}

/// Uploads finished run logs to the backend's activity log endpoint
#[async_trait]
impl RunLogSink for HttpCleaningClient {
    async fn persist(&self, entry: &RunLogEntry) -> Result<()> {
        // Logging happens after the run; it is never cancelled
        self.post(&self.run_logs_url, entry, &CancellationToken::new())
            .await
            .with_context(|| format!("Failed to upload run log {}", entry.id))?;
        Ok(())
    }
}

fn transport_error(error: reqwest::Error) -> EndpointError {
    if error.is_timeout() {
        EndpointError::Transport("request timed out".to_string())
    } else if error.is_decode() {
        EndpointError::InvalidResponse(error.to_string())
    } else {
        EndpointError::Transport(error.to_string())
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(ErrorBody { error }) = serde_json::from_str(body) {
        return error;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}
