//! Transformation of generation events into UI message chunks.
//!
//! The transform is a state machine over a single pass of the event stream.
//! It tracks the open text/reasoning blocks, the current step and every tool
//! call, and guarantees well-formed framing on the way out:
//!
//! - `start` comes first and `finish` comes last
//! - every `*-start` is closed by a matching `*-end` before `finish`
//! - `start-step` / `finish-step` alternate
//! - upstream failures and failed tool calls become an `error` chunk
//!   followed by `finish(error)`

use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

use crate::client::ClientError;
use crate::json::parse_partial_json;
use crate::model::{FinishReason, GenerationEvent, Source, ToolState, UiChunk, Usage};
use crate::options::{MessageMetadataPart, UiStreamOptions};
use crate::tool::resolve_tool_input;

/// A boxed stream of UI chunks.
pub type UiChunkStream = BoxStream<'static, UiChunk>;

/// Block id used by [`transform_text`].
pub const TEXT_ID: &str = "text-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Reasoning,
}

#[derive(Debug)]
struct OpenBlock {
    kind: BlockKind,
    id: String,
}

#[derive(Debug)]
struct ToolCall {
    tool_name: String,
    state: ToolState,
    input_text: String,
    has_final_output: bool,
}

impl ToolCall {
    fn new(tool_name: impl Into<String>, state: ToolState) -> Self {
        Self {
            tool_name: tool_name.into(),
            state,
            input_text: String::new(),
            has_final_output: false,
        }
    }

    fn accepts_output(&self) -> bool {
        !self.has_final_output && !self.state.is_terminal()
    }
}

/// Single-pass state of one transformed stream.
struct UiStreamMachine {
    options: UiStreamOptions,
    blocks: Vec<OpenBlock>,
    tools: HashMap<String, ToolCall>,
    /// Sum of the usage reported by finished steps.
    usage: Usage,
    started: bool,
    step_open: bool,
    errored: bool,
    finished: bool,
}

impl UiStreamMachine {
    fn new(options: UiStreamOptions) -> Self {
        Self {
            options,
            blocks: Vec::new(),
            tools: HashMap::new(),
            usage: Usage::default(),
            started: false,
            step_open: false,
            errored: false,
            finished: false,
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<UiChunk>) {
        if self.started {
            return;
        }
        self.started = true;

        let metadata = self.metadata(MessageMetadataPart::Start);
        if self.options.send_start {
            out.push(UiChunk::Start {
                message_id: self.options.message_id.clone(),
                message_metadata: metadata,
            });
        } else if let Some(message_metadata) = metadata {
            out.push(UiChunk::MessageMetadata { message_metadata });
        }
    }

    fn ensure_step(&mut self, out: &mut Vec<UiChunk>) {
        self.ensure_started(out);
        if !self.step_open {
            self.step_open = true;
            out.push(UiChunk::StartStep);
        }
    }

    fn metadata(&self, part: MessageMetadataPart<'_>) -> Option<Value> {
        self.options.message_metadata.as_ref().and_then(|f| f(part))
    }

    fn is_open(&self, kind: BlockKind, id: &str) -> bool {
        self.blocks.iter().any(|block| block.kind == kind && block.id == id)
    }

    fn open_block(&mut self, kind: BlockKind, id: String, out: &mut Vec<UiChunk>) {
        self.ensure_step(out);
        if self.is_open(kind, &id) {
            warn!(id = %id, "Ignoring duplicate block start");
            return;
        }
        out.push(match kind {
            BlockKind::Text => UiChunk::TextStart { id: id.clone() },
            BlockKind::Reasoning => UiChunk::ReasoningStart { id: id.clone() },
        });
        self.blocks.push(OpenBlock { kind, id });
    }

    fn block_delta(&mut self, kind: BlockKind, id: String, delta: String, out: &mut Vec<UiChunk>) {
        if !self.is_open(kind, &id) {
            debug!(id = %id, "Delta for unopened block, synthesizing start");
            self.open_block(kind, id.clone(), out);
        }
        out.push(match kind {
            BlockKind::Text => UiChunk::TextDelta { id, delta },
            BlockKind::Reasoning => UiChunk::ReasoningDelta { id, delta },
        });
    }

    fn close_block(&mut self, kind: BlockKind, id: String, out: &mut Vec<UiChunk>) {
        let Some(index) = self
            .blocks
            .iter()
            .position(|block| block.kind == kind && block.id == id)
        else {
            warn!(id = %id, "Ignoring end of unopened block");
            return;
        };
        self.blocks.remove(index);
        out.push(end_chunk(kind, id));
    }

    /// Close every open block (innermost first) and the open step.
    fn close_open(&mut self, out: &mut Vec<UiChunk>) {
        while let Some(block) = self.blocks.pop() {
            out.push(end_chunk(block.kind, block.id));
        }
        if self.step_open {
            self.step_open = false;
            out.push(UiChunk::FinishStep);
        }
    }

    fn on_event(&mut self, event: GenerationEvent, out: &mut Vec<UiChunk>) {
        match event {
            GenerationEvent::Start => self.ensure_started(out),
            GenerationEvent::StartStep => {
                self.ensure_started(out);
                if self.step_open {
                    warn!("Ignoring start-step inside an open step");
                } else {
                    self.step_open = true;
                    out.push(UiChunk::StartStep);
                }
            }
            GenerationEvent::FinishStep { usage, .. } => {
                if !self.step_open {
                    warn!("Ignoring finish-step without an open step");
                    return;
                }
                self.usage += usage;
                while let Some(block) = self.blocks.pop() {
                    out.push(end_chunk(block.kind, block.id));
                }
                self.step_open = false;
                out.push(UiChunk::FinishStep);
            }

            GenerationEvent::TextStart { id } => self.open_block(BlockKind::Text, id, out),
            GenerationEvent::TextDelta { id, delta } => {
                self.block_delta(BlockKind::Text, id, delta, out)
            }
            GenerationEvent::TextEnd { id } => self.close_block(BlockKind::Text, id, out),

            GenerationEvent::ReasoningStart { .. }
            | GenerationEvent::ReasoningDelta { .. }
            | GenerationEvent::ReasoningEnd { .. }
                if !self.options.send_reasoning => {}
            GenerationEvent::ReasoningStart { id } => {
                self.open_block(BlockKind::Reasoning, id, out)
            }
            GenerationEvent::ReasoningDelta { id, delta } => {
                self.block_delta(BlockKind::Reasoning, id, delta, out)
            }
            GenerationEvent::ReasoningEnd { id } => {
                self.close_block(BlockKind::Reasoning, id, out)
            }

            GenerationEvent::Source(_) if !self.options.send_sources => {}
            GenerationEvent::Source(source) => {
                self.ensure_started(out);
                out.push(source_chunk(source));
            }

            GenerationEvent::ToolInputStart {
                tool_call_id,
                tool_name,
                provider_executed,
                dynamic,
            } => {
                self.ensure_step(out);
                if self.tools.contains_key(&tool_call_id) {
                    warn!(tool_call_id = %tool_call_id, "Ignoring duplicate tool-input-start");
                    return;
                }
                self.tools.insert(
                    tool_call_id.clone(),
                    ToolCall::new(tool_name.clone(), ToolState::InputStreaming),
                );
                out.push(UiChunk::ToolInputStart {
                    tool_call_id,
                    tool_name,
                    provider_executed: provider_executed.then_some(true),
                    dynamic: dynamic.then_some(true),
                });
            }
            GenerationEvent::ToolInputDelta {
                tool_call_id,
                delta,
            } => {
                self.ensure_step(out);
                let call = self.tools.entry(tool_call_id.clone()).or_insert_with(|| {
                    debug!(tool_call_id = %tool_call_id, "Input delta without tool-input-start");
                    ToolCall::new(String::new(), ToolState::InputStreaming)
                });
                if call.state != ToolState::InputStreaming {
                    warn!(tool_call_id = %tool_call_id, "Ignoring input delta for tool call that is not streaming input");
                    return;
                }
                call.input_text.push_str(&delta);
                let partial_input = parse_partial_json(Some(call.input_text.as_str())).into_value();
                out.push(UiChunk::ToolInputDelta {
                    tool_call_id,
                    input_text_delta: delta,
                    partial_input,
                });
            }
            GenerationEvent::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
                provider_executed,
                dynamic,
            } => {
                self.ensure_step(out);
                let call = self
                    .tools
                    .entry(tool_call_id.clone())
                    .or_insert_with(|| ToolCall::new(tool_name.clone(), ToolState::InputStreaming));
                if call.state != ToolState::InputStreaming {
                    warn!(tool_call_id = %tool_call_id, "Ignoring repeated tool-input-available");
                    return;
                }
                if call.tool_name.is_empty() {
                    call.tool_name = tool_name.clone();
                }

                match resolve_tool_input(input.as_ref(), &call.input_text) {
                    Ok(input) => {
                        call.state = ToolState::InputAvailable;
                        out.push(UiChunk::ToolInputAvailable {
                            tool_call_id,
                            tool_name,
                            input,
                            provider_executed: provider_executed.then_some(true),
                            dynamic: dynamic.then_some(true),
                        });
                    }
                    Err(error_text) => {
                        warn!(tool_call_id = %tool_call_id, tool = %tool_name, "Tool input is not valid JSON");
                        call.state = ToolState::OutputError;
                        let input = parse_partial_json(Some(call.input_text.as_str()))
                            .into_value()
                            .unwrap_or_else(|| Value::String(call.input_text.clone()));
                        out.push(UiChunk::ToolInputError {
                            tool_call_id,
                            tool_name,
                            input,
                            error_text,
                        });
                    }
                }
            }
            GenerationEvent::ToolApprovalRequest {
                approval_id,
                tool_call_id,
            } => {
                if let Some(call) = self.tools.get_mut(&tool_call_id) {
                    call.state = ToolState::ApprovalRequested;
                }
                out.push(UiChunk::ToolApprovalRequest {
                    approval_id,
                    tool_call_id,
                });
            }
            GenerationEvent::ToolApprovalResponse { tool_call_id, .. } => {
                if let Some(call) = self.tools.get_mut(&tool_call_id) {
                    call.state = ToolState::ApprovalResponded;
                }
            }
            GenerationEvent::ToolResult {
                tool_call_id,
                tool_name,
                output,
                preliminary,
                provider_executed,
            } => {
                let call = self.tools.entry(tool_call_id.clone()).or_insert_with(|| {
                    debug!(tool_call_id = %tool_call_id, "Tool result without prior input");
                    ToolCall::new(tool_name, ToolState::InputAvailable)
                });
                if !call.accepts_output() {
                    warn!(tool_call_id = %tool_call_id, "Ignoring tool result after final output");
                    return;
                }
                call.state = ToolState::OutputAvailable;
                call.has_final_output = !preliminary;
                self.ensure_started(out);
                out.push(UiChunk::ToolOutputAvailable {
                    tool_call_id,
                    output,
                    provider_executed: provider_executed.then_some(true),
                    preliminary: preliminary.then_some(true),
                });
            }
            GenerationEvent::ToolError {
                tool_call_id,
                tool_name,
                error,
                provider_executed,
            } => {
                let call = self
                    .tools
                    .entry(tool_call_id.clone())
                    .or_insert_with(|| ToolCall::new(tool_name, ToolState::InputAvailable));
                if !call.accepts_output() {
                    warn!(tool_call_id = %tool_call_id, "Ignoring tool error after final output");
                    return;
                }
                debug!(tool_call_id = %tool_call_id, tool = %call.tool_name, "Tool call failed");
                call.state = ToolState::OutputError;
                self.ensure_started(out);
                self.errored = true;
                out.push(UiChunk::ToolOutputError {
                    tool_call_id,
                    error_text: error.clone(),
                    provider_executed: provider_executed.then_some(true),
                });
                out.push(UiChunk::Error { error_text: error });
            }
            GenerationEvent::ToolOutputDenied { tool_call_id } => {
                if let Some(call) = self.tools.get_mut(&tool_call_id) {
                    call.state = ToolState::OutputDenied;
                }
                self.ensure_started(out);
                out.push(UiChunk::ToolOutputDenied { tool_call_id });
            }

            GenerationEvent::Error { error } => {
                self.ensure_started(out);
                self.errored = true;
                out.push(UiChunk::Error {
                    error_text: error_text(&error),
                });
            }
            GenerationEvent::Finish {
                finish_reason,
                total_usage,
            } => {
                // Providers that only report per-step usage send an empty total.
                let total_usage = Some(total_usage).filter(|usage| *usage != Usage::default());
                self.finish(Some(finish_reason), total_usage, out)
            }
            GenerationEvent::Raw { .. } => trace!("Dropping raw provider event"),
        }
    }

    /// Upstream failed: report it and terminate the stream.
    fn on_error(&mut self, error: &ClientError, out: &mut Vec<UiChunk>) {
        warn!("Generation stream failed: {}", error);
        self.ensure_started(out);
        self.errored = true;
        out.push(UiChunk::Error {
            error_text: self.options.error_text(error),
        });
        self.finish(Some(FinishReason::Error), None, out);
    }

    /// Upstream ended; synthesize whatever framing is missing.
    fn on_end(&mut self, out: &mut Vec<UiChunk>) {
        if !self.finished {
            debug!("Generation stream ended without finish");
            self.finish(None, None, out);
        }
    }

    /// Close everything and emit the terminal chunk. Without a reported
    /// total, the summed step usage is passed to the metadata callback.
    fn finish(&mut self, finish_reason: Option<FinishReason>, total_usage: Option<Usage>, out: &mut Vec<UiChunk>) {
        self.ensure_started(out);
        self.close_open(out);
        self.finished = true;

        let finish_reason = if self.errored {
            Some(FinishReason::Error)
        } else {
            finish_reason
        };
        let total_usage = total_usage.unwrap_or_else(|| self.usage.clone());
        let metadata = self.metadata(MessageMetadataPart::Finish {
            finish_reason: finish_reason.unwrap_or(FinishReason::Other),
            total_usage: &total_usage,
        });

        if self.options.send_finish {
            out.push(UiChunk::Finish {
                finish_reason,
                message_metadata: metadata,
            });
        } else if let Some(message_metadata) = metadata {
            out.push(UiChunk::MessageMetadata { message_metadata });
        }
    }
}

fn end_chunk(kind: BlockKind, id: String) -> UiChunk {
    match kind {
        BlockKind::Text => UiChunk::TextEnd { id },
        BlockKind::Reasoning => UiChunk::ReasoningEnd { id },
    }
}

fn source_chunk(source: Source) -> UiChunk {
    match source {
        Source::Url { id, url, title } => UiChunk::SourceUrl {
            source_id: id,
            url,
            title,
        },
        Source::Document {
            id,
            media_type,
            title,
            filename,
        } => UiChunk::SourceDocument {
            source_id: id,
            media_type,
            title,
            filename,
        },
    }
}

/// Text of an in-band `error` event.
fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        Value::Object(fields) => match fields.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => error.to_string(),
        },
        other => other.to_string(),
    }
}

/// Transform a generation event stream into UI message chunks.
///
/// Upstream events are pulled one at a time; nothing is pulled after
/// `finish`. Dropping the returned stream drops `events`.
///
/// # Example
/// ```rust
/// use futures::{stream, StreamExt};
/// use unai::client::ClientError;
/// use unai::model::{FinishReason, GenerationEvent, Usage};
/// use unai::options::UiStreamOptions;
/// use unai::ui::transform;
///
/// let events = stream::iter(vec![
///     Ok::<_, ClientError>(GenerationEvent::TextDelta { id: "t".into(), delta: "Hi".into() }),
///     Ok(GenerationEvent::Finish { finish_reason: FinishReason::Stop, total_usage: Usage::default() }),
/// ]);
///
/// let kinds: Vec<_> = futures::executor::block_on(
///     transform(events, UiStreamOptions::default()).map(|chunk| chunk.kind()).collect(),
/// );
/// assert_eq!(
///     kinds,
///     ["start", "start-step", "text-start", "text-delta", "text-end", "finish-step", "finish"]
/// );
/// ```
pub fn transform<S>(events: S, options: UiStreamOptions) -> impl Stream<Item = UiChunk> + Send
where
    S: Stream<Item = Result<GenerationEvent, ClientError>> + Send + 'static,
{
    async_stream::stream! {
        let mut events = Box::pin(events);
        let mut machine = UiStreamMachine::new(options);
        let mut pending = Vec::new();

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => machine.on_event(event, &mut pending),
                Err(error) => machine.on_error(&error, &mut pending),
            }
            for chunk in pending.drain(..) {
                yield chunk;
            }
            if machine.finished {
                break;
            }
        }

        machine.on_end(&mut pending);
        for chunk in pending.drain(..) {
            yield chunk;
        }
    }
}

/// Frame a plain text stream as a single-step message with one text block.
pub fn transform_text<S>(text: S, options: UiStreamOptions) -> impl Stream<Item = UiChunk> + Send
where
    S: Stream<Item = String> + Send + 'static,
{
    let events = async_stream::stream! {
        yield Ok::<_, ClientError>(GenerationEvent::Start);
        yield Ok(GenerationEvent::StartStep);
        yield Ok(GenerationEvent::TextStart { id: TEXT_ID.to_string() });
        for await delta in text {
            yield Ok(GenerationEvent::TextDelta { id: TEXT_ID.to_string(), delta });
        }
        yield Ok(GenerationEvent::TextEnd { id: TEXT_ID.to_string() });
        yield Ok(GenerationEvent::FinishStep {
            response: Default::default(),
            usage: Usage::default(),
            finish_reason: FinishReason::Stop,
        });
        yield Ok(GenerationEvent::Finish {
            finish_reason: FinishReason::Stop,
            total_usage: Usage::default(),
        });
    };
    transform(events, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn text_delta(id: &str, delta: &str) -> GenerationEvent {
        GenerationEvent::TextDelta {
            id: id.to_string(),
            delta: delta.to_string(),
        }
    }

    fn finish(reason: FinishReason) -> GenerationEvent {
        GenerationEvent::Finish {
            finish_reason: reason,
            total_usage: Usage::default(),
        }
    }

    fn finish_step() -> GenerationEvent {
        GenerationEvent::FinishStep {
            response: Default::default(),
            usage: Usage::default(),
            finish_reason: FinishReason::Stop,
        }
    }

    async fn run(events: Vec<GenerationEvent>, options: UiStreamOptions) -> Vec<UiChunk> {
        transform(stream::iter(events.into_iter().map(Ok)), options)
            .collect()
            .await
    }

    fn kinds(chunks: &[UiChunk]) -> Vec<&'static str> {
        chunks.iter().map(UiChunk::kind).collect()
    }

    #[tokio::test]
    async fn test_transform_text_framing() {
        let text = stream::iter(["Hello", ", ", "world"].map(String::from));
        let chunks: Vec<_> = transform_text(text, UiStreamOptions::default()).collect().await;

        assert_eq!(
            kinds(&chunks),
            vec![
                "start",
                "start-step",
                "text-start",
                "text-delta",
                "text-delta",
                "text-delta",
                "text-end",
                "finish-step",
                "finish"
            ]
        );
        assert_eq!(chunks[2], UiChunk::TextStart { id: "text-1".to_string() });
        assert_eq!(
            chunks[4],
            UiChunk::TextDelta {
                id: "text-1".to_string(),
                delta: ", ".to_string()
            }
        );
        assert_eq!(
            chunks[8],
            UiChunk::Finish {
                finish_reason: Some(FinishReason::Stop),
                message_metadata: None
            }
        );
    }

    #[tokio::test]
    async fn test_transform_text_empty_input() {
        let chunks: Vec<_> = transform_text(stream::empty(), UiStreamOptions::default())
            .collect()
            .await;
        assert_eq!(
            kinds(&chunks),
            vec!["start", "start-step", "text-start", "text-end", "finish-step", "finish"]
        );
    }

    #[tokio::test]
    async fn test_reasoning_dropped_when_disabled() {
        let events = vec![
            GenerationEvent::Start,
            GenerationEvent::StartStep,
            GenerationEvent::ReasoningStart { id: "r".to_string() },
            GenerationEvent::ReasoningDelta {
                id: "r".to_string(),
                delta: "thinking".to_string(),
            },
            GenerationEvent::ReasoningEnd { id: "r".to_string() },
            text_delta("t", "answer"),
            GenerationEvent::TextEnd { id: "t".to_string() },
            finish_step(),
            finish(FinishReason::Stop),
        ];

        let with = run(events.clone(), UiStreamOptions::default()).await;
        assert_eq!(kinds(&with)[2..5], ["reasoning-start", "reasoning-delta", "reasoning-end"]);

        let without = run(events, UiStreamOptions::default().with_send_reasoning(false)).await;
        assert!(without.iter().all(|chunk| !chunk.kind().starts_with("reasoning")));
        assert_eq!(
            kinds(&without),
            vec!["start", "start-step", "text-start", "text-delta", "text-end", "finish-step", "finish"]
        );
    }

    #[tokio::test]
    async fn test_sources_forwarded_only_when_enabled() {
        let events = vec![
            GenerationEvent::Source(Source::Url {
                id: "s1".to_string(),
                url: "https://example.com".to_string(),
                title: Some("Example".to_string()),
            }),
            GenerationEvent::Source(Source::Document {
                id: "s2".to_string(),
                media_type: "application/pdf".to_string(),
                title: "Report".to_string(),
                filename: None,
            }),
            finish(FinishReason::Stop),
        ];

        let hidden = run(events.clone(), UiStreamOptions::default()).await;
        assert_eq!(kinds(&hidden), vec!["start", "finish"]);

        let shown = run(events, UiStreamOptions::default().with_send_sources(true)).await;
        assert_eq!(
            shown[1],
            UiChunk::SourceUrl {
                source_id: "s1".to_string(),
                url: "https://example.com".to_string(),
                title: Some("Example".to_string()),
            }
        );
        assert_eq!(shown[2].kind(), "source-document");
    }

    #[tokio::test]
    async fn test_tool_input_deltas_carry_partial_input() {
        let events = vec![
            GenerationEvent::StartStep,
            GenerationEvent::ToolInputStart {
                tool_call_id: "call-1".to_string(),
                tool_name: "weather".to_string(),
                provider_executed: false,
                dynamic: false,
            },
            GenerationEvent::ToolInputDelta {
                tool_call_id: "call-1".to_string(),
                delta: r#"{"city":"#.to_string(),
            },
            GenerationEvent::ToolInputDelta {
                tool_call_id: "call-1".to_string(),
                delta: r#""Ber"#.to_string(),
            },
            GenerationEvent::ToolInputDelta {
                tool_call_id: "call-1".to_string(),
                delta: r#"lin"}"#.to_string(),
            },
            GenerationEvent::ToolInputAvailable {
                tool_call_id: "call-1".to_string(),
                tool_name: "weather".to_string(),
                input: None,
                provider_executed: false,
                dynamic: false,
            },
            GenerationEvent::ToolResult {
                tool_call_id: "call-1".to_string(),
                tool_name: "weather".to_string(),
                output: json!({ "temperature": 21 }),
                preliminary: false,
                provider_executed: false,
            },
            finish_step(),
            finish(FinishReason::ToolCalls),
        ];

        let chunks = run(events, UiStreamOptions::default()).await;
        let partial: Vec<_> = chunks
            .iter()
            .filter_map(|chunk| match chunk {
                UiChunk::ToolInputDelta { partial_input, .. } => Some(partial_input.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            partial,
            vec![
                Some(json!({})),
                Some(json!({ "city": "Ber" })),
                Some(json!({ "city": "Berlin" })),
            ]
        );

        assert!(chunks.contains(&UiChunk::ToolInputAvailable {
            tool_call_id: "call-1".to_string(),
            tool_name: "weather".to_string(),
            input: json!({ "city": "Berlin" }),
            provider_executed: None,
            dynamic: None,
        }));
        assert!(chunks.contains(&UiChunk::ToolOutputAvailable {
            tool_call_id: "call-1".to_string(),
            output: json!({ "temperature": 21 }),
            provider_executed: None,
            preliminary: None,
        }));
    }

    #[tokio::test]
    async fn test_invalid_tool_input_reports_input_error() {
        let events = vec![
            GenerationEvent::ToolInputStart {
                tool_call_id: "call-1".to_string(),
                tool_name: "weather".to_string(),
                provider_executed: false,
                dynamic: false,
            },
            GenerationEvent::ToolInputDelta {
                tool_call_id: "call-1".to_string(),
                delta: r#"{"city": "Oslo""#.to_string(),
            },
            GenerationEvent::ToolInputAvailable {
                tool_call_id: "call-1".to_string(),
                tool_name: "weather".to_string(),
                input: None,
                provider_executed: false,
                dynamic: false,
            },
            GenerationEvent::ToolResult {
                tool_call_id: "call-1".to_string(),
                tool_name: "weather".to_string(),
                output: json!("late"),
                preliminary: false,
                provider_executed: false,
            },
        ];

        let chunks = run(events, UiStreamOptions::default()).await;
        assert_eq!(
            kinds(&chunks),
            vec![
                "start",
                "start-step",
                "tool-input-start",
                "tool-input-delta",
                "tool-input-error",
                "finish-step",
                "finish"
            ]
        );
        let UiChunk::ToolInputError { input, .. } = &chunks[4] else {
            panic!("expected tool-input-error, got {:?}", chunks[4]);
        };
        assert_eq!(input, &json!({ "city": "Oslo" }));
    }

    #[tokio::test]
    async fn test_tool_result_without_input_is_accepted() {
        let events = vec![
            GenerationEvent::ToolResult {
                tool_call_id: "call-7".to_string(),
                tool_name: "search".to_string(),
                output: json!(["a", "b"]),
                preliminary: false,
                provider_executed: true,
            },
            finish(FinishReason::Stop),
        ];

        let chunks = run(events, UiStreamOptions::default()).await;
        assert_eq!(
            chunks[1],
            UiChunk::ToolOutputAvailable {
                tool_call_id: "call-7".to_string(),
                output: json!(["a", "b"]),
                provider_executed: Some(true),
                preliminary: None,
            }
        );
    }

    #[tokio::test]
    async fn test_preliminary_results_then_final() {
        let result = |output: &str, preliminary: bool| GenerationEvent::ToolResult {
            tool_call_id: "call-1".to_string(),
            tool_name: "render".to_string(),
            output: json!(output),
            preliminary,
            provider_executed: false,
        };
        let events = vec![
            result("draft", true),
            result("done", false),
            result("too late", true),
            finish(FinishReason::Stop),
        ];

        let chunks = run(events, UiStreamOptions::default()).await;
        let outputs: Vec<_> = chunks
            .iter()
            .filter_map(|chunk| match chunk {
                UiChunk::ToolOutputAvailable { output, preliminary, .. } => {
                    Some((output.clone(), *preliminary))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            outputs,
            vec![(json!("draft"), Some(true)), (json!("done"), None)]
        );
    }

    #[tokio::test]
    async fn test_upstream_error_terminates_with_error_finish() {
        let events = vec![
            Ok(GenerationEvent::StartStep),
            Ok(text_delta("t", "partial")),
            Err(ClientError::ProviderError("connection reset".to_string())),
            Ok(text_delta("t", "never")),
        ];

        let chunks: Vec<_> = transform(stream::iter(events), UiStreamOptions::default())
            .collect()
            .await;
        assert_eq!(
            kinds(&chunks),
            vec![
                "start",
                "start-step",
                "text-start",
                "text-delta",
                "error",
                "text-end",
                "finish-step",
                "finish"
            ]
        );
        assert_eq!(
            chunks[4],
            UiChunk::Error {
                error_text: "Provider error: connection reset".to_string()
            }
        );
        assert_eq!(
            chunks[7],
            UiChunk::Finish {
                finish_reason: Some(FinishReason::Error),
                message_metadata: None
            }
        );
    }

    #[tokio::test]
    async fn test_error_event_forces_error_finish_reason() {
        let events = vec![
            GenerationEvent::Error {
                error: json!({ "message": "overloaded" }),
            },
            finish(FinishReason::Stop),
        ];

        let chunks = run(events, UiStreamOptions::default()).await;
        assert_eq!(
            chunks,
            vec![
                UiChunk::Start {
                    message_id: None,
                    message_metadata: None
                },
                UiChunk::Error {
                    error_text: "overloaded".to_string()
                },
                UiChunk::Finish {
                    finish_reason: Some(FinishReason::Error),
                    message_metadata: None
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_nothing_after_finish() {
        let events = vec![
            text_delta("t", "a"),
            finish(FinishReason::Stop),
            text_delta("t", "b"),
            finish(FinishReason::OutputTokens),
        ];

        let chunks = run(events, UiStreamOptions::default()).await;
        assert_eq!(chunks.last().map(UiChunk::kind), Some("finish"));
        assert_eq!(chunks.iter().filter(|c| c.kind() == "finish").count(), 1);
        assert_eq!(chunks.iter().filter(|c| c.kind() == "text-delta").count(), 1);
    }

    #[tokio::test]
    async fn test_unterminated_stream_is_closed() {
        let events = vec![
            GenerationEvent::StartStep,
            GenerationEvent::ReasoningStart { id: "r".to_string() },
            text_delta("t", "cut"),
        ];

        let chunks = run(events, UiStreamOptions::default()).await;
        assert_eq!(
            kinds(&chunks),
            vec![
                "start",
                "start-step",
                "reasoning-start",
                "text-start",
                "text-delta",
                "text-end",
                "reasoning-end",
                "finish-step",
                "finish"
            ]
        );
        assert_eq!(
            chunks[8],
            UiChunk::Finish {
                finish_reason: None,
                message_metadata: None
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_and_unmatched_blocks() {
        let events = vec![
            GenerationEvent::TextStart { id: "t".to_string() },
            GenerationEvent::TextStart { id: "t".to_string() },
            GenerationEvent::TextEnd { id: "other".to_string() },
            GenerationEvent::TextEnd { id: "t".to_string() },
            finish_step(),
            finish_step(),
            finish(FinishReason::Stop),
        ];

        let chunks = run(events, UiStreamOptions::default()).await;
        assert_eq!(
            kinds(&chunks),
            vec!["start", "start-step", "text-start", "text-end", "finish-step", "finish"]
        );
    }

    #[tokio::test]
    async fn test_start_and_finish_toggles() {
        let events = vec![text_delta("t", "x"), finish(FinishReason::Stop)];
        let options = UiStreamOptions::default()
            .with_send_start(false)
            .with_send_finish(false);

        let chunks = run(events, options).await;
        assert_eq!(
            kinds(&chunks),
            vec!["start-step", "text-start", "text-delta", "text-end", "finish-step"]
        );
    }

    #[tokio::test]
    async fn test_message_metadata() {
        let options = UiStreamOptions::default()
            .with_message_id("msg-1")
            .with_message_metadata(|part| match part {
                MessageMetadataPart::Start => Some(json!({ "model": "m-1" })),
                MessageMetadataPart::Finish { finish_reason, .. } => {
                    Some(json!({ "reason": finish_reason }))
                }
            });

        let chunks = run(vec![finish(FinishReason::Stop)], options.clone()).await;
        assert_eq!(
            chunks,
            vec![
                UiChunk::Start {
                    message_id: Some("msg-1".to_string()),
                    message_metadata: Some(json!({ "model": "m-1" })),
                },
                UiChunk::Finish {
                    finish_reason: Some(FinishReason::Stop),
                    message_metadata: Some(json!({ "reason": "stop" })),
                },
            ]
        );

        let chunks = run(vec![finish(FinishReason::Stop)], options.with_send_finish(false)).await;
        assert_eq!(
            chunks[1],
            UiChunk::MessageMetadata {
                message_metadata: json!({ "reason": "stop" })
            }
        );
    }

    #[tokio::test]
    async fn test_dropping_output_drops_upstream() {
        struct DropFlag(Arc<AtomicBool>);

        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(dropped.clone());
        let upstream = async_stream::stream! {
            let _guard = guard;
            yield Ok::<_, ClientError>(GenerationEvent::StartStep);
            futures::future::pending::<()>().await;
        };

        let mut chunks = Box::pin(transform(upstream, UiStreamOptions::default()));
        assert_eq!(chunks.next().await.map(|c| c.kind()), Some("start"));
        assert_eq!(chunks.next().await.map(|c| c.kind()), Some("start-step"));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(chunks);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_input_delta_without_start_matches_dispatched_input() {
        use crate::tool::{run_tools, FnTool, ToolCallOptions, ToolExecutionResult, ToolSet};
        use std::sync::Mutex;

        let received = Arc::new(Mutex::new(None));
        let seen = received.clone();
        let tools = ToolSet::new().with_tool(FnTool::new("echo", move |input: Value, _: ToolCallOptions| {
            *seen.lock().unwrap() = Some(input.clone());
            ToolExecutionResult::Value(input)
        }));
        let events = vec![
            Ok(GenerationEvent::StartStep),
            Ok(GenerationEvent::ToolInputDelta {
                tool_call_id: "c".to_string(),
                delta: r#"{"a":1}"#.to_string(),
            }),
            Ok(GenerationEvent::ToolInputAvailable {
                tool_call_id: "c".to_string(),
                tool_name: "echo".to_string(),
                input: None,
                provider_executed: false,
                dynamic: false,
            }),
            Ok(finish(FinishReason::ToolCalls)),
        ];

        let chunks: Vec<_> = transform(
            run_tools(stream::iter(events), Arc::new(tools)),
            UiStreamOptions::default(),
        )
        .collect()
        .await;

        assert_eq!(
            kinds(&chunks),
            vec![
                "start",
                "start-step",
                "tool-input-delta",
                "tool-input-available",
                "tool-output-available",
                "finish-step",
                "finish"
            ]
        );
        assert_eq!(
            chunks[2],
            UiChunk::ToolInputDelta {
                tool_call_id: "c".to_string(),
                input_text_delta: r#"{"a":1}"#.to_string(),
                partial_input: Some(json!({ "a": 1 })),
            }
        );
        assert_eq!(
            chunks[3],
            UiChunk::ToolInputAvailable {
                tool_call_id: "c".to_string(),
                tool_name: "echo".to_string(),
                input: json!({ "a": 1 }),
                provider_executed: None,
                dynamic: None,
            }
        );
        assert_eq!(*received.lock().unwrap(), Some(json!({ "a": 1 })));
    }

    #[tokio::test]
    async fn test_failed_tool_execution_ends_with_error_finish() {
        use crate::tool::{run_tools, FnTool, ToolCallOptions, ToolError, ToolExecutionResult, ToolSet};

        let tools = ToolSet::new().with_tool(FnTool::new("weather", |_: Value, _: ToolCallOptions| {
            ToolExecutionResult::failed(ToolError::execution("boom"))
        }));
        let events = vec![
            Ok(GenerationEvent::StartStep),
            Ok(GenerationEvent::ToolInputAvailable {
                tool_call_id: "call-1".to_string(),
                tool_name: "weather".to_string(),
                input: Some(json!({ "city": "Oslo" })),
                provider_executed: false,
                dynamic: false,
            }),
            Ok(finish_step()),
            Ok(finish(FinishReason::ToolCalls)),
        ];

        let chunks: Vec<_> = transform(
            run_tools(stream::iter(events), Arc::new(tools)),
            UiStreamOptions::default(),
        )
        .collect()
        .await;

        assert_eq!(
            kinds(&chunks),
            vec![
                "start",
                "start-step",
                "tool-input-available",
                "tool-output-error",
                "error",
                "finish-step",
                "finish"
            ]
        );
        assert_eq!(
            chunks[3],
            UiChunk::ToolOutputError {
                tool_call_id: "call-1".to_string(),
                error_text: "Tool execution failed: boom".to_string(),
                provider_executed: None,
            }
        );
        assert_eq!(
            chunks[4],
            UiChunk::Error {
                error_text: "Tool execution failed: boom".to_string()
            }
        );
        assert_eq!(
            chunks[6],
            UiChunk::Finish {
                finish_reason: Some(FinishReason::Error),
                message_metadata: None
            }
        );
    }

    #[tokio::test]
    async fn test_finish_metadata_sums_step_usage() {
        let step = |prompt: u32, completion: u32| GenerationEvent::FinishStep {
            response: Default::default(),
            usage: Usage {
                prompt_tokens: Some(prompt),
                completion_tokens: Some(completion),
                total_tokens: None,
            },
            finish_reason: FinishReason::Stop,
        };
        let options = UiStreamOptions::default().with_message_metadata(|part| match part {
            MessageMetadataPart::Start => None,
            MessageMetadataPart::Finish { total_usage, .. } => Some(json!(total_usage)),
        });

        let events = vec![
            GenerationEvent::StartStep,
            step(10, 5),
            GenerationEvent::StartStep,
            step(20, 7),
            finish(FinishReason::Stop),
        ];
        let chunks = run(events.clone(), options.clone()).await;
        assert_eq!(
            chunks.last(),
            Some(&UiChunk::Finish {
                finish_reason: Some(FinishReason::Stop),
                message_metadata: Some(json!({ "promptTokens": 30, "completionTokens": 12 })),
            })
        );

        let mut reported = events;
        reported.pop();
        reported.push(GenerationEvent::Finish {
            finish_reason: FinishReason::Stop,
            total_usage: Usage {
                prompt_tokens: Some(1),
                completion_tokens: Some(2),
                total_tokens: Some(3),
            },
        });
        let chunks = run(reported, options).await;
        let Some(UiChunk::Finish { message_metadata, .. }) = chunks.last() else {
            panic!("expected finish, got {:?}", chunks.last());
        };
        assert_eq!(
            message_metadata,
            &Some(json!({ "promptTokens": 1, "completionTokens": 2, "totalTokens": 3 }))
        );
    }

    #[test]
    fn test_error_text_of_event_payloads() {
        assert_eq!(error_text(&json!("rate limited")), "rate limited");
        assert_eq!(error_text(&json!({ "message": "bad gateway" })), "bad gateway");
        assert_eq!(error_text(&json!({ "code": 7 })), r#"{"code":7}"#);
    }
}
