//! Core client trait and error types.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::model::GenerationEvent;
use crate::retry::RetryableError;

/// An open provider stream, already decoded into generation events.
pub type GenerationStream = BoxStream<'static, Result<GenerationEvent, ClientError>>;

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The provider answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        headers: HashMap<String, String>,
    },

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Whether an HTTP status indicates a transient failure.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429) || status >= 500
}

impl ClientError {
    /// Create an API error without response headers.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        ClientError::Api {
            status,
            message: message.into(),
            headers: HashMap::new(),
        }
    }

    /// Build an API error from a failed HTTP response, keeping its headers so
    /// the retry policy can honor rate-limit hints.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await.unwrap_or_default();

        ClientError::Api {
            status,
            message: Self::error_message(&body),
            headers,
        }
    }

    /// Extract `error.message` from a provider error body, falling back to
    /// the raw body.
    fn error_message(body: &str) -> String {
        serde_json::from_str::<ErrorEnvelope>(body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| body.to_string())
    }
}

impl RetryableError for ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::Api { status, .. } => is_retryable_status(*status),
            ClientError::Http(error) => {
                error.is_timeout()
                    || error.is_connect()
                    || error
                        .status()
                        .is_some_and(|status| is_retryable_status(status.as_u16()))
            }
            ClientError::Parse(_)
            | ClientError::ProviderError(_)
            | ClientError::StreamCancelled
            | ClientError::Config(_) => false,
        }
    }

    fn response_headers(&self) -> Option<&HashMap<String, String>> {
        match self {
            ClientError::Api { headers, .. } => Some(headers),
            _ => None,
        }
    }

    fn cancelled() -> Self {
        ClientError::StreamCancelled
    }
}

/// Source of generation event streams.
///
/// Implemented by provider integrations, which own the HTTP request and the
/// decoding of the provider's wire format into [`GenerationEvent`]s.
///
/// # Example
/// ```rust,ignore
/// #[async_trait]
/// impl StreamingClient for MyProvider {
///     async fn request_stream(&self) -> Result<GenerationStream, ClientError> {
///         let response = self.http.post(&self.url).json(&self.body).send().await?;
///         if !response.status().is_success() {
///             return Err(ClientError::from_response(response).await);
///         }
///         Ok(decode_events(response).boxed())
///     }
/// }
/// ```
#[async_trait]
pub trait StreamingClient: Send + Sync {
    /// Open one generation stream. Each retry attempt calls this again.
    async fn request_stream(&self) -> Result<GenerationStream, ClientError>;
}
