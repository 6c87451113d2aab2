//! # unai - Streaming event pipeline for LLM clients
//!
//! Turns a provider's generation event stream into a well-formed stream of
//! UI message chunks.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Retry with exponential backoff that honors `retry-after` headers
//! - Tool execution mid-stream, including streaming (preliminary) tool results
//! - Best-effort parsing of partial tool-call JSON while it is still arriving
//! - Serial execution of async jobs
//! - Server-Sent Events framing of the chunk stream
//!
//! ## Architecture
//!
//! ```text
//! StreamingClient ──► RetryPolicy ──► run_tools ──► ui::transform ──► UiChunk stream
//!                                                                    └► sse::ui_chunks_to_sse
//! ```
//!
//! [`Pipeline`] wires these stages together; each stage is also usable on
//! its own.
//!
//! ## Example
//! ```no_run
//! use futures::StreamExt;
//! use unai::client::{ClientError, GenerationStream, StreamingClient};
//! use unai::options::{RetryOptions, UiStreamOptions};
//! use unai::Pipeline;
//!
//! struct MyProvider;
//!
//! #[async_trait::async_trait]
//! impl StreamingClient for MyProvider {
//!     async fn request_stream(&self) -> Result<GenerationStream, ClientError> {
//!         Err(ClientError::Config("not connected".to_string()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(MyProvider)
//!         .with_retry_options(RetryOptions::default().with_max_retries(3))
//!         .with_options(UiStreamOptions::default().with_send_reasoning(false));
//!
//!     let mut chunks = pipeline.stream().await?;
//!     while let Some(chunk) = chunks.next().await {
//!         println!("{}", serde_json::to_string(&chunk)?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod json;
pub mod model;
pub mod options;
pub mod pipeline;
pub mod retry;
pub mod serial;
pub mod sse;
pub mod tool;
pub mod ui;

// Re-exports for convenience
pub use client::{ClientError, GenerationStream, StreamingClient};
pub use model::{FinishReason, GenerationEvent, UiChunk, Usage};
pub use pipeline::Pipeline;
pub use retry::{RetryPolicy, RetryableError};
pub use serial::SerialJobExecutor;
pub use tool::{Tool, ToolExecutionResult, ToolSet};
pub use ui::{transform, transform_text};
