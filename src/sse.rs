//! Server-Sent Events (SSE) framing of UI chunks.
//!
//! Each chunk is one `data:` event holding the chunk's JSON; the stream ends
//! with a `[DONE]` marker:
//! ```text
//! data: {"type":"start"}
//!
//! data: {"type":"text-delta","id":"text-1","delta":"Hi"}
//!
//! data: [DONE]
//! ```

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::client::ClientError;
use crate::model::UiChunk;

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Split a byte stream into SSE data lines.
///
/// Lines are buffered as bytes, so multi-byte characters split across
/// network chunks survive. Non-`data:` lines are skipped and the stream
/// stops at the `[DONE]` marker.
pub fn sse_data<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, ClientError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    stream::unfold(
        (Box::pin(bytes), Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, mut ended)| async move {
            loop {
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(data) = parse_sse_line(line.trim()) else {
                        continue;
                    };
                    if is_done_marker(data) {
                        return None;
                    }
                    let data = data.to_string();
                    return Some((Ok(data), (bytes, buffer, ended)));
                }

                if ended {
                    // Unterminated final line
                    let rest = std::mem::take(&mut buffer);
                    let line = String::from_utf8_lossy(&rest);
                    let data = parse_sse_line(line.trim())
                        .filter(|data| !is_done_marker(data))?
                        .to_string();
                    return Some((Ok(data), (bytes, buffer, ended)));
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => return Some((Err(e.into()), (bytes, buffer, ended))),
                    None => ended = true,
                }
            }
        },
    )
}

/// Extension trait turning any byte stream into SSE data lines.
pub trait SseStreamExt {
    fn sse(self) -> impl Stream<Item = Result<String, ClientError>> + Send;
}

impl<S, B, E> SseStreamExt for S
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    fn sse(self) -> impl Stream<Item = Result<String, ClientError>> + Send {
        sse_data(self)
    }
}

/// Extension trait for `reqwest::Response` to enable SSE streaming.
///
/// # Example
/// ```ignore
/// use unai::sse::SseResponseExt;
///
/// let response = client.get("https://api.example.com/chat").send().await?;
/// let mut lines = response.sse();
/// while let Some(line) = lines.next().await {
///     println!("SSE data: {}", line?);
/// }
/// ```
pub trait SseResponseExt {
    fn sse(self) -> impl Stream<Item = Result<String, ClientError>> + Send;
}

impl SseResponseExt for reqwest::Response {
    fn sse(self) -> impl Stream<Item = Result<String, ClientError>> + Send {
        sse_data(self.bytes_stream())
    }
}

/// Parse an SSE line to extract the data portion.
///
/// # Example
/// ```
/// use unai::sse::parse_sse_line;
///
/// let line = "data: {\"key\": \"value\"}";
/// assert_eq!(parse_sse_line(line), Some("{\"key\": \"value\"}"));
///
/// let line = "invalid";
/// assert_eq!(parse_sse_line(line), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|s| s.trim())
}

/// Check if an SSE data line indicates the stream is done.
///
/// # Example
/// ```
/// use unai::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker(""));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}

/// Encode one chunk as an SSE event.
pub fn encode_ui_chunk(chunk: &UiChunk) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(chunk)?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

/// Encode a chunk stream as SSE, terminated by `data: [DONE]`.
pub fn ui_chunks_to_sse<S>(chunks: S) -> impl Stream<Item = Result<Bytes, ClientError>> + Send
where
    S: Stream<Item = UiChunk> + Send + 'static,
{
    chunks
        .map(|chunk| encode_ui_chunk(&chunk).map_err(ClientError::from))
        .chain(stream::once(async { Ok(Bytes::from_static(DONE_FRAME)) }))
}

/// Decode an SSE byte stream produced by [`ui_chunks_to_sse`].
pub fn decode_ui_chunks<S, B, E>(bytes: S) -> impl Stream<Item = Result<UiChunk, ClientError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    sse_data(bytes).map(|line| line.and_then(|data| Ok(serde_json::from_str::<UiChunk>(&data)?)))
}
