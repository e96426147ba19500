//! [`MessageSource`] over the HTTP API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;

use super::poller::MessageSource;
use super::{ChatError, SentMessage, Watermark};
use crate::api::error::ErrorResponse;
use crate::db::{ChatMessage, MessagesResponse, SendMessageRequest, SendMessageResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpMessageSource {
    client: Client,
    base_url: String,
}

impl HttpMessageSource {
    /// `base_url` is the server root, e.g. `http://localhost:8080`.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", token)
                .parse()
                .context("Invalid token format")?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a non-success response into [`ChatError::Api`] using the error envelope.
async fn check(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("request failed").to_string());

    Err(ChatError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl MessageSource for HttpMessageSource {
    async fn fetch(
        &self,
        peer_id: i64,
        since: Option<&Watermark>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let mut query = vec![("peer_id", peer_id.to_string())];
        if let Some(mark) = since {
            query.push(("since", mark.timestamp.clone()));
            query.push(("after_id", mark.id.to_string()));
        }

        let response = self
            .client
            .get(self.url("/api/messages"))
            .query(&query)
            .send()
            .await?;
        let body: MessagesResponse = check(response).await?.json().await?;
        Ok(body.messages)
    }

    async fn send(
        &self,
        peer_id: i64,
        text: &str,
        correlation_id: &str,
    ) -> Result<SentMessage, ChatError> {
        let request = SendMessageRequest {
            receiver_id: peer_id,
            message_text: text.to_string(),
            correlation_id: Some(correlation_id.to_string()),
        };

        let response = self
            .client
            .post(self.url("/api/messages"))
            .json(&request)
            .send()
            .await?;
        let body: SendMessageResponse = check(response).await?.json().await?;
        Ok(SentMessage {
            id: body.id,
            timestamp: body.timestamp,
        })
    }
}
