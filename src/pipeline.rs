//! Pipeline struct wiring a streaming client through retry, tool execution
//! and the UI transform.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ClientError, GenerationStream, StreamingClient};
use crate::options::{RetryOptions, UiStreamOptions};
use crate::retry::RetryPolicy;
use crate::sse::ui_chunks_to_sse;
use crate::tool::{run_tools, ToolSet};
use crate::ui::{transform, UiChunkStream};

/// Streams one generation from a [`StreamingClient`] as UI chunks.
///
/// 1. Opens the provider stream, retrying transient failures
/// 2. Executes tool calls as their input becomes available
/// 3. Frames the result as a well-formed UI chunk stream
///
/// # Example
/// ```ignore
/// let pipeline = Pipeline::new(provider)
///     .with_retry(RetryPolicy::new(RetryOptions::default().with_max_retries(3)))
///     .with_tools(ToolSet::new().with_tool(weather))
///     .with_options(UiStreamOptions::default().with_send_sources(true));
///
/// let mut chunks = pipeline.stream().await?;
/// while let Some(chunk) = chunks.next().await {
///     println!("{}", chunk.kind());
/// }
/// ```
pub struct Pipeline<C: StreamingClient> {
    client: C,
    retry: RetryPolicy,
    tools: Option<Arc<ToolSet>>,
    options: UiStreamOptions,
    cancellation: Option<CancellationToken>,
}

impl<C: StreamingClient> Pipeline<C> {
    /// Create a pipeline with default retry and framing options and no tools.
    pub fn new(client: C) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            tools: None,
            options: UiStreamOptions::default(),
            cancellation: None,
        }
    }

    /// Set the retry policy used to open the stream.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = match &self.cancellation {
            Some(token) => retry.with_cancellation(token.clone()),
            None => retry,
        };
        self
    }

    /// Shorthand for [`with_retry`](Self::with_retry) with a fresh policy.
    pub fn with_retry_options(self, options: RetryOptions) -> Self {
        self.with_retry(RetryPolicy::new(options))
    }

    /// Set the tools executed mid-stream.
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = Some(Arc::new(tools));
        self
    }

    /// Set the UI framing options.
    pub fn with_options(mut self, options: UiStreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Cancel through `token`: pending retries stop, and an open stream ends
    /// with an error chunk and `finish(error)`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.retry = self.retry.with_cancellation(token.clone());
        self.cancellation = Some(token);
        self
    }

    /// Open the generation event stream, with tool results re-entered.
    pub async fn events(&self) -> Result<GenerationStream, ClientError> {
        let events = self.retry.call(|| self.client.request_stream()).await?;

        let events = match &self.tools {
            Some(tools) if !tools.is_empty() => {
                debug!(tools = tools.len(), "Running tools mid-stream");
                run_tools(events, tools.clone()).boxed()
            }
            _ => events,
        };

        Ok(match &self.cancellation {
            Some(token) => cancellable(events, token.clone()),
            None => events,
        })
    }

    /// Open the stream and transform it into UI chunks.
    ///
    /// Fails only if the stream cannot be opened; failures after that are
    /// reported in-band.
    pub async fn stream(&self) -> Result<UiChunkStream, ClientError> {
        let events = self.events().await?;
        info!("Generation stream opened");
        Ok(transform(events, self.options.clone()).boxed())
    }

    /// Like [`stream`](Self::stream), but an opening failure is also reported
    /// in-band as `error` followed by `finish(error)`.
    pub async fn ui_stream(&self) -> UiChunkStream {
        match self.events().await {
            Ok(events) => transform(events, self.options.clone()).boxed(),
            Err(error) => {
                warn!("Failed to open generation stream: {}", error);
                transform(stream::once(async { Err(error) }), self.options.clone()).boxed()
            }
        }
    }

    /// The UI chunk stream framed as SSE bytes.
    pub async fn stream_sse(
        &self,
    ) -> Result<impl Stream<Item = Result<Bytes, ClientError>> + Send, ClientError> {
        Ok(ui_chunks_to_sse(self.stream().await?))
    }
}

/// End `events` with [`ClientError::StreamCancelled`] once `token` fires.
fn cancellable(events: GenerationStream, token: CancellationToken) -> GenerationStream {
    async_stream::stream! {
        let mut events = events;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                item = events.next() => Some(item),
            };

            match next {
                Some(Some(item)) => yield item,
                Some(None) => break,
                None => {
                    debug!("Generation stream cancelled");
                    yield Err(ClientError::StreamCancelled);
                    break;
                }
            }
        }
    }
    .boxed()
}
