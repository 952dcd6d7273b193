//! Client for the serverless functions
//!
//! One long-lived reqwest::Client for connection pooling, shared by the chat
//! stream, the tip generators and the market panels.

use crate::chat::{ByteStream, ChatTransport};
use crate::config::Config;
use crate::error::TrackerError;
use crate::market::{MarketCategory, MarketInfoSource};
use crate::models::ChatMessage;
use crate::tips::{TipRequest, TipsSource};
use crate::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const CHAT_FUNCTION: &str = "finance-chat";
const MARKET_FUNCTION: &str = "generate-market-info";
const CHAT_CONNECT_ERROR: &str = "Falha ao conectar com o agente";
const FUNCTION_ERROR: &str = "Edge function returned an error";

/// Reusable functions client (connection-pooled)
#[derive(Clone)]
pub struct FunctionsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
}

#[derive(Debug, Serialize)]
struct MarketRequest {
    category: MarketCategory,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

impl FunctionsClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.functions_url.clone(), config.functions_key.clone())
    }

    fn endpoint(&self, function: &str) -> String {
        format!("{}/functions/v1/{}", self.base_url, function)
    }

    fn post(&self, function: &str) -> RequestBuilder {
        let request = self.client.post(self.endpoint(function));
        match &self.api_key {
            Some(key) => request.header(AUTHORIZATION, format!("Bearer {}", key)),
            None => request,
        }
    }

    /// POST a JSON body and return the decoded JSON answer
    async fn invoke<B: Serialize + ?Sized>(&self, function: &str, body: &B) -> Result<serde_json::Value> {
        info!(function, "Invoking function");

        let response = self.post(function).json(body).send().await.map_err(|e| {
            error!(function, "Function request failed: {}", e);
            TrackerError::Remote(format!("{} request failed: {}", function, e))
        })?;

        let response = ensure_success(response, function, FUNCTION_ERROR).await?;

        response.json().await.map_err(|e| {
            error!(function, "Failed to parse function response: {}", e);
            TrackerError::MalformedResponse(format!("{}: {}", function, e))
        })
    }
}

/// Turn a non-2xx response into `TrackerError::Remote`, preferring its `{ error }` body
async fn ensure_success(response: Response, function: &str, fallback: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| fallback.to_string());

    error!(function, status = status.as_u16(), "Function error response: {}", body);
    Err(TrackerError::Remote(message))
}

#[async_trait]
impl ChatTransport for FunctionsClient {
    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream> {
        info!(messages = messages.len(), "Opening finance chat stream");

        let response = self
            .post(CHAT_FUNCTION)
            .header(ACCEPT, "text/event-stream")
            .json(&ChatRequest { messages })
            .send()
            .await
            .map_err(|e| {
                error!("Chat request failed: {}", e);
                TrackerError::Remote(format!("{}: {}", CHAT_CONNECT_ERROR, e))
            })?;

        let response = ensure_success(response, CHAT_FUNCTION, CHAT_CONNECT_ERROR).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TrackerError::from))
            .boxed())
    }
}

#[async_trait]
impl MarketInfoSource for FunctionsClient {
    async fn market_info(&self, category: MarketCategory) -> Result<serde_json::Value> {
        self.invoke(MARKET_FUNCTION, &MarketRequest { category }).await
    }
}

#[async_trait]
impl TipsSource for FunctionsClient {
    async fn generate_tips(&self, request: &TipRequest) -> Result<serde_json::Value> {
        self.invoke(request.function_name(), request).await
    }
}
