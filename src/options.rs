//! Options structures for retry behavior and UI stream framing.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::client::ClientError;
use crate::model::{FinishReason, Usage};

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(2000);
const DEFAULT_BACKOFF_FACTOR: u32 = 2;

/// Longest server-requested delay that is honored before falling back to
/// exponential backoff.
pub const DEFAULT_MAX_HEADER_DELAY: Duration = Duration::from_secs(60);

/// Retry configuration for the outer request attempt.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use unai::options::RetryOptions;
///
/// let options = RetryOptions::default()
///     .with_max_retries(4)
///     .with_initial_delay(Duration::from_millis(500));
///
/// assert_eq!(options.max_retries, 4);
/// assert_eq!(options.max_header_delay, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after every retry
    pub backoff_factor: u32,

    /// Ceiling for delays taken from `retry-after-ms` / `retry-after` headers.
    /// Longer hints are still honored when shorter than the exponential delay.
    pub max_header_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_header_delay: DEFAULT_MAX_HEADER_DELAY,
        }
    }
}

impl RetryOptions {
    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Set the exponential backoff factor.
    pub fn with_backoff_factor(mut self, backoff_factor: u32) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Set the ceiling for header-derived delays.
    pub fn with_max_header_delay(mut self, max_header_delay: Duration) -> Self {
        self.max_header_delay = max_header_delay;
        self
    }
}

/// The stream position a message metadata callback is invoked for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageMetadataPart<'a> {
    Start,
    Finish {
        finish_reason: FinishReason,
        total_usage: &'a Usage,
    },
}

/// Produces message metadata attached to `start` / `finish` chunks.
pub type MessageMetadataFn = Arc<dyn Fn(MessageMetadataPart<'_>) -> Option<Value> + Send + Sync>;

/// Maps a stream failure to the text of the `error` chunk.
pub type ErrorTextFn = Arc<dyn Fn(&ClientError) -> String + Send + Sync>;

/// Framing options for [`crate::ui::transform`].
///
/// # Example
/// ```rust
/// use serde_json::json;
/// use unai::options::{MessageMetadataPart, UiStreamOptions};
///
/// let options = UiStreamOptions::default()
///     .with_send_reasoning(false)
///     .with_message_metadata(|part| match part {
///         MessageMetadataPart::Start => Some(json!({ "model": "gpt-5" })),
///         MessageMetadataPart::Finish { .. } => None,
///     });
///
/// assert!(options.send_start);
/// assert!(!options.send_reasoning);
/// ```
#[derive(Clone)]
pub struct UiStreamOptions {
    /// Emit the leading `start` chunk
    pub send_start: bool,

    /// Emit the trailing `finish` chunk
    pub send_finish: bool,

    /// Forward `reasoning-*` events
    pub send_reasoning: bool,

    /// Forward `source` events as `source-url` / `source-document`
    pub send_sources: bool,

    /// Message id carried by the `start` chunk
    pub message_id: Option<String>,

    pub message_metadata: Option<MessageMetadataFn>,

    pub on_error: Option<ErrorTextFn>,
}

impl Default for UiStreamOptions {
    fn default() -> Self {
        Self {
            send_start: true,
            send_finish: true,
            send_reasoning: true,
            send_sources: false,
            message_id: None,
            message_metadata: None,
            on_error: None,
        }
    }
}

impl std::fmt::Debug for UiStreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiStreamOptions")
            .field("send_start", &self.send_start)
            .field("send_finish", &self.send_finish)
            .field("send_reasoning", &self.send_reasoning)
            .field("send_sources", &self.send_sources)
            .field("message_id", &self.message_id)
            .field("message_metadata", &self.message_metadata.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl UiStreamOptions {
    /// Set whether the `start` chunk is emitted.
    pub fn with_send_start(mut self, send_start: bool) -> Self {
        self.send_start = send_start;
        self
    }

    /// Set whether the `finish` chunk is emitted.
    pub fn with_send_finish(mut self, send_finish: bool) -> Self {
        self.send_finish = send_finish;
        self
    }

    /// Set whether reasoning is forwarded.
    pub fn with_send_reasoning(mut self, send_reasoning: bool) -> Self {
        self.send_reasoning = send_reasoning;
        self
    }

    /// Set whether sources are forwarded.
    pub fn with_send_sources(mut self, send_sources: bool) -> Self {
        self.send_sources = send_sources;
        self
    }

    /// Set the message id.
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Set the message metadata callback.
    pub fn with_message_metadata(
        mut self,
        f: impl Fn(MessageMetadataPart<'_>) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.message_metadata = Some(Arc::new(f));
        self
    }

    /// Set the mapper used for `error` chunk text.
    pub fn with_on_error(mut self, f: impl Fn(&ClientError) -> String + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn error_text(&self, error: &ClientError) -> String {
        match &self.on_error {
            Some(on_error) => on_error(error),
            None => error.to_string(),
        }
    }
}
