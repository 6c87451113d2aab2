//! Tool execution: normalizing tool results into preliminary/final outputs
//! and dispatching tool calls discovered mid-stream.

use futures::future::BoxFuture;
use futures::stream::{BoxStream, SelectAll, Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::ClientError;
use crate::model::GenerationEvent;

/// Errors raised while executing a tool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool execution failed: {0}")]
    Execution(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Streaming tool results must be consumed with `execute`")]
    StreamingResultRequiresConsumption,
}

impl ToolError {
    pub fn execution(error: impl std::fmt::Display) -> Self {
        ToolError::Execution(error.to_string())
    }
}

/// What a tool hands back when invoked.
pub enum ToolExecutionResult<O = Value> {
    /// Computed synchronously.
    Value(O),
    /// Resolves once.
    Future(BoxFuture<'static, Result<O, ToolError>>),
    /// Zero or more incremental outputs; the last one is the final output.
    Stream(BoxStream<'static, Result<O, ToolError>>),
}

impl<O> std::fmt::Debug for ToolExecutionResult<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolExecutionResult::Value(_) => f.write_str("ToolExecutionResult::Value(..)"),
            ToolExecutionResult::Future(_) => f.write_str("ToolExecutionResult::Future(..)"),
            ToolExecutionResult::Stream(_) => f.write_str("ToolExecutionResult::Stream(..)"),
        }
    }
}

impl<O: Send + 'static> ToolExecutionResult<O> {
    pub fn future(future: impl Future<Output = Result<O, ToolError>> + Send + 'static) -> Self {
        ToolExecutionResult::Future(Box::pin(future))
    }

    pub fn stream(stream: impl Stream<Item = Result<O, ToolError>> + Send + 'static) -> Self {
        ToolExecutionResult::Stream(Box::pin(stream))
    }

    /// A result that fails with `error` when awaited.
    pub fn failed(error: ToolError) -> Self {
        Self::future(futures::future::ready(Err(error)))
    }

    /// Collapse a non-streaming result to its value.
    ///
    /// Streaming results are not drained; they fail with
    /// [`ToolError::StreamingResultRequiresConsumption`].
    pub async fn resolve(self) -> Result<O, ToolError> {
        match self {
            ToolExecutionResult::Value(output) => Ok(output),
            ToolExecutionResult::Future(future) => future.await,
            ToolExecutionResult::Stream(_) => Err(ToolError::StreamingResultRequiresConsumption),
        }
    }
}

/// One step of a normalized tool execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolExecutionOutput<O = Value> {
    Preliminary(O),
    /// `None` when a streaming tool produced no output at all.
    Final(Option<O>),
}

/// Normalize a tool result into `preliminary*` followed by exactly one
/// `final`, unless the tool fails, in which case the stream ends with the
/// error and no `final`.
///
/// Dropping the returned stream drops the underlying future or stream.
///
/// # Example
/// ```
/// use futures::StreamExt;
/// use unai::tool::{execute, ToolExecutionOutput, ToolExecutionResult};
///
/// let outputs: Vec<_> =
///     futures::executor::block_on(execute(ToolExecutionResult::Value(42)).collect());
/// assert_eq!(outputs, vec![Ok(ToolExecutionOutput::Final(Some(42)))]);
/// ```
pub fn execute<O>(
    result: ToolExecutionResult<O>,
) -> impl Stream<Item = Result<ToolExecutionOutput<O>, ToolError>> + Send
where
    O: Clone + Send + 'static,
{
    async_stream::try_stream! {
        match result {
            ToolExecutionResult::Value(output) => {
                yield ToolExecutionOutput::Final(Some(output));
            }
            ToolExecutionResult::Future(future) => {
                let output = future.await?;
                yield ToolExecutionOutput::Final(Some(output));
            }
            ToolExecutionResult::Stream(mut stream) => {
                let mut last = None;
                while let Some(item) = stream.next().await {
                    let output = item?;
                    last = Some(output.clone());
                    yield ToolExecutionOutput::Preliminary(output);
                }
                yield ToolExecutionOutput::Final(last);
            }
        }
    }
}

/// Context passed to a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallOptions {
    pub tool_call_id: String,
}

/// A tool the pipeline can execute.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, input: Value, options: ToolCallOptions) -> ToolExecutionResult;
}

/// A [`Tool`] backed by a closure.
pub struct FnTool<F> {
    name: String,
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(Value, ToolCallOptions) -> ToolExecutionResult + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Tool for FnTool<F>
where
    F: Fn(Value, ToolCallOptions) -> ToolExecutionResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: Value, options: ToolCallOptions) -> ToolExecutionResult {
        (self.f)(input, options)
    }
}

/// Tools available to the model, keyed by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.tools.keys()).finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.insert(tool);
        self
    }

    pub fn insert(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Resolve the complete input of a tool call: an explicit input wins,
/// otherwise the accumulated input text must be a complete JSON document.
/// Empty text means no arguments.
pub(crate) fn resolve_tool_input(input: Option<&Value>, input_text: &str) -> Result<Value, String> {
    if let Some(input) = input {
        return Ok(input.clone());
    }
    if input_text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(input_text).map_err(|e| e.to_string())
}

fn output_event(
    tool_call_id: &str,
    tool_name: &str,
    item: Result<ToolExecutionOutput, ToolError>,
) -> GenerationEvent {
    match item {
        Ok(ToolExecutionOutput::Preliminary(output)) => GenerationEvent::ToolResult {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            output,
            preliminary: true,
            provider_executed: false,
        },
        Ok(ToolExecutionOutput::Final(output)) => {
            info!(tool = tool_name, tool_call_id, "Tool executed successfully");
            GenerationEvent::ToolResult {
                tool_call_id: tool_call_id.to_string(),
                tool_name: tool_name.to_string(),
                output: output.unwrap_or(Value::Null),
                preliminary: false,
                provider_executed: false,
            }
        }
        Err(error) => {
            warn!(tool = tool_name, tool_call_id, "Tool execution failed: {}", error);
            GenerationEvent::ToolError {
                tool_call_id: tool_call_id.to_string(),
                tool_name: tool_name.to_string(),
                error: error.to_string(),
                provider_executed: false,
            }
        }
    }
}

fn tool_error_event(tool_call_id: String, tool_name: String, error: ToolError) -> GenerationEvent {
    warn!(tool = %tool_name, tool_call_id = %tool_call_id, "Tool call rejected: {}", error);
    GenerationEvent::ToolError {
        tool_call_id,
        tool_name,
        error: error.to_string(),
        provider_executed: false,
    }
}

enum Next {
    Upstream(Result<GenerationEvent, ClientError>),
    Tool(GenerationEvent),
    Done,
}

/// Execute tool calls as they become available in `events`.
///
/// Every upstream event is forwarded. When a `tool-input-available` event
/// names a tool in `tools` (and the provider did not already execute it),
/// the tool runs concurrently with the rest of the stream and its outputs
/// are re-entered as `tool-result` (preliminary and final) or `tool-error`
/// events. `finish-step` and `finish` are held back until every running
/// execution has completed. An upstream error is forwarded and ends the
/// stream, cancelling running executions.
pub fn run_tools<S>(
    events: S,
    tools: Arc<ToolSet>,
) -> impl Stream<Item = Result<GenerationEvent, ClientError>> + Send
where
    S: Stream<Item = Result<GenerationEvent, ClientError>> + Send + 'static,
{
    async_stream::stream! {
        let mut events = Box::pin(events);
        let mut running: SelectAll<BoxStream<'static, GenerationEvent>> = SelectAll::new();
        let mut input_text: HashMap<String, String> = HashMap::new();

        loop {
            let next = if running.is_empty() {
                events.next().await.map_or(Next::Done, Next::Upstream)
            } else {
                tokio::select! {
                    Some(event) = running.next() => Next::Tool(event),
                    item = events.next() => item.map_or(Next::Done, Next::Upstream),
                }
            };

            let event = match next {
                Next::Tool(event) => {
                    yield Ok(event);
                    continue;
                }
                Next::Done => break,
                Next::Upstream(Err(error)) => {
                    yield Err(error);
                    return;
                }
                Next::Upstream(Ok(event)) => event,
            };

            match event {
                GenerationEvent::FinishStep { .. } | GenerationEvent::Finish { .. } => {
                    while let Some(tool_event) = running.next().await {
                        yield Ok(tool_event);
                    }
                    input_text.clear();
                    yield Ok(event);
                }
                GenerationEvent::ToolInputDelta { ref tool_call_id, ref delta } => {
                    input_text.entry(tool_call_id.clone()).or_default().push_str(delta);
                    yield Ok(event);
                }
                GenerationEvent::ToolInputAvailable {
                    ref tool_call_id,
                    ref tool_name,
                    ref input,
                    provider_executed: false,
                    ..
                } => {
                    let tool_call_id = tool_call_id.clone();
                    let tool_name = tool_name.clone();
                    let text = input_text.remove(&tool_call_id).unwrap_or_default();
                    let input = resolve_tool_input(input.as_ref(), &text);
                    yield Ok(event);

                    let Some(tool) = tools.get(&tool_name) else {
                        yield Ok(tool_error_event(
                            tool_call_id,
                            tool_name.clone(),
                            ToolError::NotFound(tool_name),
                        ));
                        continue;
                    };

                    // Unparseable input is reported by the UI transform.
                    let Ok(input) = input else {
                        continue;
                    };

                    debug!(tool = %tool_name, tool_call_id = %tool_call_id, "Executing tool");
                    let options = ToolCallOptions {
                        tool_call_id: tool_call_id.clone(),
                    };
                    let outputs = execute(tool.execute(input, options))
                        .map(move |item| output_event(&tool_call_id, &tool_name, item));
                    running.push(outputs.boxed());
                }
                event => yield Ok(event),
            }
        }

        while let Some(tool_event) = running.next().await {
            yield Ok(tool_event);
        }
    }
}
